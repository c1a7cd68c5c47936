//! One SSE response and the disconnect state that goes with it.
//!
//! The response body is fed through a bounded channel of capacity 1, so at most
//! one frame sits between the relay and the socket. The transport dropping the
//! body (client gone, connection error) and a failed frame write both funnel
//! into [`SseSession::mark_disconnected`].

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::HeaderValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::sse::RelayFrame;

type Frame = Result<Bytes, io::Error>;

#[derive(Clone, Default)]
struct DisconnectFlag(Arc<AtomicBool>);

impl DisconnectFlag {
    /// Sets the flag. Only the first signal is logged.
    fn mark(&self, signal: &'static str) {
        if self
            .0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!(signal, "client disconnected before completion");
        }
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct SseSession {
    tx: mpsc::Sender<Frame>,
    disconnected: DisconnectFlag,
    watcher: JoinHandle<()>,
    tokens_sent: usize,
}

impl SseSession {
    /// Open a session. The returned response carries the SSE headers and must
    /// be handed back to axum; its body streams whatever the session sends.
    pub fn open() -> (Self, Response) {
        let (tx, rx) = mpsc::channel::<Frame>(1);
        let disconnected = DisconnectFlag::default();

        let watcher = {
            let tx = tx.clone();
            let flag = disconnected.clone();
            tokio::spawn(async move {
                tx.closed().await;
                flag.mark("response closed");
            })
        };

        let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let session = Self {
            tx,
            disconnected,
            watcher,
            tokens_sent: 0,
        };
        (session, response)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.is_set()
    }

    /// Idempotent; whichever signal arrives first wins.
    pub fn mark_disconnected(&self, signal: &'static str) {
        self.disconnected.mark(signal);
    }

    pub fn tokens_sent(&self) -> usize {
        self.tokens_sent
    }

    /// Write one frame, waiting for the transport to take the previous one.
    /// Returns `false` (and writes nothing) once the client is gone.
    pub async fn send(&mut self, frame: &RelayFrame) -> bool {
        if self.is_disconnected() {
            return false;
        }
        if self.tx.send(Ok(frame.to_bytes())).await.is_err() {
            self.mark_disconnected("write failed");
            return false;
        }
        if matches!(frame, RelayFrame::Token(_)) {
            self.tokens_sent += 1;
        }
        true
    }

    /// Close the response. Consumes the session, so it can only happen once.
    pub fn finish(self) {
        tracing::debug!(
            tokens_sent = self.tokens_sent as u64,
            disconnected = self.is_disconnected(),
            "sse session closed"
        );
    }
}

impl Drop for SseSession {
    fn drop(&mut self) {
        // the watcher holds a sender clone; the body only ends once it is gone
        self.watcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn headers_are_set_before_any_frame() {
        let (session, response) = SseSession::open();
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[CACHE_CONTROL], "no-cache, no-transform");
        assert_eq!(headers[CONNECTION], "keep-alive");
        session.finish();
    }

    #[tokio::test]
    async fn frames_reach_the_body_in_order() {
        let (mut session, response) = SseSession::open();
        let reader =
            tokio::spawn(async move { axum::body::to_bytes(response.into_body(), usize::MAX).await });

        assert!(session.send(&RelayFrame::Token("Foo".into())).await);
        assert!(session.send(&RelayFrame::Token("Bar".into())).await);
        assert!(session.send(&RelayFrame::Done).await);
        assert_eq!(session.tokens_sent(), 2);
        session.finish();

        let body = reader.await.unwrap().unwrap();
        assert_eq!(
            body,
            Bytes::from_static(
                b"data: {\"token\":\"Foo\"}\n\ndata: {\"token\":\"Bar\"}\n\nevent: done\ndata: {}\n\n"
            )
        );
    }

    #[tokio::test]
    async fn dropped_body_marks_disconnected() {
        let (mut session, response) = SseSession::open();
        drop(response);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !session.is_disconnected() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("watcher notices the closed body");

        assert!(!session.send(&RelayFrame::Token("late".into())).await);
        assert_eq!(session.tokens_sent(), 0);
    }

    #[tokio::test]
    async fn mark_disconnected_is_idempotent() {
        let (session, _response) = SseSession::open();
        session.mark_disconnected("request aborted");
        session.mark_disconnected("response closed");
        assert!(session.is_disconnected());
    }
}
