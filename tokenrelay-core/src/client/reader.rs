use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::error::{CoreResult, RelayError};
use crate::sse::{DONE_EVENT, FRAME_DELIMITER, SseFrame, parse_frame};

/// Accumulates raw body bytes and pops complete frames off the front.
///
/// Bytes are decoded only once a whole frame is buffered, so a multi-byte
/// character split across two reads is never mangled.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes received after the last complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next non-empty frame, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Option<SseFrame> {
        loop {
            let boundary = self
                .buf
                .windows(FRAME_DELIMITER.len())
                .position(|w| w == FRAME_DELIMITER)?;
            let raw = self.buf.split_to(boundary);
            self.buf.advance(FRAME_DELIMITER.len());

            let text = String::from_utf8_lossy(&raw);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(parse_frame(trimmed));
            }
        }
    }
}

/// Feed a response body through a [`FrameBuffer`], invoking `on_event` for each
/// frame in order.
///
/// Returns after a `done` event (remaining bytes are not read) or when the body
/// ends; an unterminated trailing frame is dropped. An error from `on_event`
/// or from the body stops reading and is returned.
pub async fn read_events<S, E, F>(body: S, mut on_event: F) -> CoreResult<()>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<RelayError>,
    F: FnMut(SseFrame) -> CoreResult<()>,
{
    futures::pin_mut!(body);
    let mut frames = FrameBuffer::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(Into::into)?;
        frames.push(&chunk);
        while let Some(frame) = frames.next_frame() {
            let done = frame.event == DONE_EVENT;
            on_event(frame)?;
            if done {
                return Ok(());
            }
        }
    }

    if frames.pending() > 0 {
        tracing::debug!(bytes = frames.pending() as u64, "discarding unterminated trailing frame");
    }
    Ok(())
}
