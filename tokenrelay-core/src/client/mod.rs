//! Consumer side of the relay: an HTTP client, the SSE frame reader and the
//! submission state machine built on them.

pub mod controller;
pub mod reader;

use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreResult, RelayError};
use crate::sse::SseFrame;

pub use self::controller::{ControllerState, SubmissionController, SubmitOutcome};
pub use self::reader::{FrameBuffer, read_events};

fn transport(err: reqwest::Error) -> RelayError {
    RelayError::Other(err.into())
}

/// HTTP client for a running relay.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: &str) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(transport)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`, returned as raw JSON.
    pub async fn health(&self) -> CoreResult<Value> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;
        resp.json::<Value>().await.map_err(transport)
    }

    /// Submit `prompt` and feed every received frame to `on_event` in order.
    ///
    /// Cancelling `cancel` abandons the transfer with [`RelayError::Aborted`]; a
    /// transfer that has already finished when both are ready wins.
    pub async fn stream_chat<F>(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
        on_event: F,
    ) -> CoreResult<()>
    where
        F: FnMut(SseFrame) -> CoreResult<()>,
    {
        let transfer = async {
            let resp = self
                .http
                .post(format!("{}/api/chat", self.base_url))
                .json(&json!({ "prompt": prompt }))
                .send()
                .await
                .map_err(transport)?;
            let resp = check_status(resp).await?;
            read_events(resp.bytes_stream().map(|r| r.map_err(transport)), on_event).await
        };

        tokio::select! {
            biased;
            result = transfer => result,
            _ = cancel.cancelled() => Err(RelayError::Aborted),
        }
    }
}

async fn check_status(resp: reqwest::Response) -> CoreResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let details = if body.is_empty() {
        format!("Backend responded with status {}", status.as_u16())
    } else {
        body
    };
    Err(RelayError::Backend {
        status: status.as_u16(),
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::spawn_test_server;
    use crate::test_util::{ScriptedClient, delta, stop};
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use std::sync::Arc;

    #[tokio::test]
    async fn streams_frames_from_a_live_relay() {
        let client = Arc::new(ScriptedClient::events(vec![delta("Foo"), delta("Bar"), stop()]));
        let base = spawn_test_server(client, Config::default()).await;
        let chat = ChatClient::new(&format!("{base}/")).unwrap();

        let mut frames = Vec::new();
        chat.stream_chat("hi", &CancellationToken::new(), |f| {
            frames.push(f);
            Ok(())
        })
        .await
        .unwrap();
        let events: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(events, vec!["message", "message", "done"]);
        assert_eq!(frames[0].data, "{\"token\":\"Foo\"}");
    }

    #[tokio::test]
    async fn non_success_uses_body_as_details() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(400).body("{\"error\":\"Prompt is required\"}");
        });
        let chat = ChatClient::new(&server.base_url()).unwrap();
        let err = chat
            .stream_chat("x", &CancellationToken::new(), |_| Ok(()))
            .await
            .unwrap_err();
        match err {
            RelayError::Backend { status, details } => {
                assert_eq!(status, 400);
                assert_eq!(details, "{\"error\":\"Prompt is required\"}");
            }
            other => panic!("expected Backend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_error_body_gets_generic_details() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(503);
        });
        let chat = ChatClient::new(&server.base_url()).unwrap();
        let err = chat
            .stream_chat("x", &CancellationToken::new(), |_| Ok(()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Backend responded with status 503");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_pending_transfer() {
        let (client, _tx) = ScriptedClient::channel();
        let base = spawn_test_server(Arc::new(client), Config::default()).await;
        let chat = ChatClient::new(&base).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = chat.stream_chat("hi", &cancel, |_| Ok(())).await.unwrap_err();
        assert!(err.is_abort());
    }

    #[tokio::test]
    async fn health_returns_document() {
        let base = spawn_test_server(
            Arc::new(ScriptedClient::no_stream()),
            Config::default(),
        )
        .await;
        let doc = ChatClient::new(&base).unwrap().health().await.unwrap();
        assert_eq!(doc["status"], "ok");
    }
}
