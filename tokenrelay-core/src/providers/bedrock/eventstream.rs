//! AWS event-stream framing used by the streaming inference endpoint.
//!
//! Wire layout of one message (all integers big-endian):
//!
//! ```text
//! [total_len u32][headers_len u32][prelude_crc u32][headers ...][payload ...][message_crc u32]
//! ```
//!
//! Each header is `[name_len u8][name][value_type u8][value]`. CRCs are skipped,
//! not verified; the transport is TLS.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::Stream;
use serde::Deserialize;

use crate::error::{CoreResult, RelayError, StreamErrorKind};
use crate::http_client::ByteStream;
use crate::model::{StopReason, TokenUsage};
use crate::stream::ProviderEvent;

const PRELUDE_LEN: usize = 12;
const TRAILER_LEN: usize = 4;
const MIN_MESSAGE_LEN: usize = PRELUDE_LEN + TRAILER_LEN;
/// Upper bound the service documents for a single message.
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// One decoded event-stream message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub headers: HashMap<String, HeaderValue>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Bytes),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl Message {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        match self.headers.get(name) {
            Some(HeaderValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Incremental decoder: feed arbitrary byte chunks, pop whole messages.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: BytesMut,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Returns the next complete message, or `None` if more bytes are needed.
    pub fn next_message(&mut self) -> CoreResult<Option<Message>> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let total_len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        let headers_len =
            u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&total_len)
            || headers_len > total_len - MIN_MESSAGE_LEN
        {
            return Err(RelayError::Decode(format!(
                "invalid prelude: total_len={total_len} headers_len={headers_len}"
            )));
        }
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let mut frame = self.buf.split_to(total_len).freeze();
        frame.advance(PRELUDE_LEN);
        let headers_raw = frame.split_to(headers_len);
        let payload = frame.split_to(total_len - MIN_MESSAGE_LEN - headers_len);
        let headers = decode_headers(headers_raw)?;
        Ok(Some(Message { headers, payload }))
    }
}

fn decode_headers(mut raw: Bytes) -> CoreResult<HashMap<String, HeaderValue>> {
    let mut headers = HashMap::new();
    while raw.has_remaining() {
        let name_len = raw.get_u8() as usize;
        need(&raw, name_len + 1)?;
        let name = String::from_utf8(raw.split_to(name_len).to_vec())
            .map_err(|_| RelayError::Decode("header name is not utf-8".into()))?;
        let value = match raw.get_u8() {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                need(&raw, 1)?;
                HeaderValue::Byte(raw.get_i8())
            }
            3 => {
                need(&raw, 2)?;
                HeaderValue::Short(raw.get_i16())
            }
            4 => {
                need(&raw, 4)?;
                HeaderValue::Int(raw.get_i32())
            }
            5 => {
                need(&raw, 8)?;
                HeaderValue::Long(raw.get_i64())
            }
            6 => HeaderValue::Bytes(length_prefixed(&mut raw)?),
            7 => {
                let bytes = length_prefixed(&mut raw)?;
                HeaderValue::String(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|_| RelayError::Decode(format!("header {name} is not utf-8")))?,
                )
            }
            8 => {
                need(&raw, 8)?;
                HeaderValue::Timestamp(raw.get_i64())
            }
            9 => {
                need(&raw, 16)?;
                let mut uuid = [0u8; 16];
                raw.copy_to_slice(&mut uuid);
                HeaderValue::Uuid(uuid)
            }
            other => {
                return Err(RelayError::Decode(format!(
                    "unknown header value type {other} for {name}"
                )));
            }
        };
        headers.insert(name, value);
    }
    Ok(headers)
}

fn length_prefixed(raw: &mut Bytes) -> CoreResult<Bytes> {
    need(raw, 2)?;
    let len = raw.get_u16() as usize;
    need(raw, len)?;
    Ok(raw.split_to(len))
}

fn need(raw: &Bytes, n: usize) -> CoreResult<()> {
    if raw.remaining() < n {
        Err(RelayError::Decode("truncated header block".into()))
    } else {
        Ok(())
    }
}

// ===== Payload shapes for each event type =====

#[derive(Deserialize)]
struct RoleBody {
    role: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockBody {
    #[serde(default)]
    content_block_index: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeltaBody {
    #[serde(default)]
    content_block_index: u32,
    #[serde(default)]
    delta: Option<DeltaText>,
}

#[derive(Deserialize)]
struct DeltaText {
    text: Option<String>,
}

#[derive(Deserialize)]
struct MetadataBody {
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopBody {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ExceptionBody {
    message: Option<String>,
}

fn parse_body<'a, T: Deserialize<'a>>(event_type: &str, payload: &'a [u8]) -> CoreResult<T> {
    serde_json::from_slice(payload)
        .map_err(|e| RelayError::Decode(format!("{event_type} payload: {e}")))
}

/// Classify a decoded message. `Ok(None)` means the message carries nothing
/// the relay cares about (unknown event type, metadata without usage).
pub fn classify(message: &Message) -> CoreResult<Option<ProviderEvent>> {
    match message.header_str(":message-type") {
        Some("event") => {}
        Some("exception") | Some("error") => return Ok(Some(classify_exception(message))),
        other => {
            return Err(RelayError::Decode(format!(
                "unexpected message type {other:?}"
            )));
        }
    }

    let event_type = message.header_str(":event-type").unwrap_or_default();
    let payload = &message.payload[..];
    let event = match event_type {
        "messageStart" => ProviderEvent::MessageStart {
            role: parse_body::<RoleBody>(event_type, payload)?.role,
        },
        "contentBlockStart" => ProviderEvent::ContentBlockStart {
            index: parse_body::<BlockBody>(event_type, payload)?.content_block_index,
        },
        "contentBlockDelta" => {
            let body = parse_body::<DeltaBody>(event_type, payload)?;
            ProviderEvent::ContentDelta {
                index: body.content_block_index,
                text: body.delta.and_then(|d| d.text).unwrap_or_default(),
            }
        }
        "contentBlockStop" => ProviderEvent::ContentBlockStop {
            index: parse_body::<BlockBody>(event_type, payload)?.content_block_index,
        },
        "metadata" => match parse_body::<MetadataBody>(event_type, payload)?.usage {
            Some(usage) => ProviderEvent::Usage(usage),
            None => return Ok(None),
        },
        "messageStop" => ProviderEvent::MessageStop {
            reason: StopReason::from_provider(
                parse_body::<StopBody>(event_type, payload)?.stop_reason.as_deref(),
            ),
        },
        other => {
            tracing::debug!(event_type = other, "skipping unknown event-stream event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn classify_exception(message: &Message) -> ProviderEvent {
    let name = message
        .header_str(":exception-type")
        .or_else(|| message.header_str(":error-code"))
        .unwrap_or_default();
    let text = serde_json::from_slice::<ExceptionBody>(&message.payload)
        .ok()
        .and_then(|b| b.message)
        .or_else(|| message.header_str(":error-message").map(str::to_string));
    let kind = StreamErrorKind::from_exception_type(name).unwrap_or_else(|| {
        tracing::warn!(exception = name, "unrecognized stream exception");
        StreamErrorKind::InternalServer
    });
    ProviderEvent::Error {
        kind,
        message: text,
    }
}

/// Provider events over a raw response body, decoded as bytes arrive.
pub struct EventStream {
    inner: ByteStream,
    decoder: MessageDecoder,
    finished: bool,
}

impl EventStream {
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            decoder: MessageDecoder::new(),
            finished: false,
        }
    }
}

impl Stream for EventStream {
    type Item = CoreResult<ProviderEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }

            // Drain whole messages already buffered before reading more bytes.
            match self.decoder.next_message() {
                Ok(Some(message)) => match classify(&message) {
                    Ok(Some(event)) => return Poll::Ready(Some(Ok(event))),
                    Ok(None) => continue,
                    Err(e) => {
                        self.finished = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.decoder.push(&chunk);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if self.decoder.has_partial() {
                        return Poll::Ready(Some(Err(RelayError::Decode(
                            "stream ended inside a message".into(),
                        ))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Encode one message with string headers. CRC fields are written as zero.
#[cfg(test)]
pub(crate) fn encode_message(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    use bytes::BufMut;

    let mut header_block = BytesMut::new();
    for (name, value) in headers {
        header_block.put_u8(name.len() as u8);
        header_block.put_slice(name.as_bytes());
        header_block.put_u8(7);
        header_block.put_u16(value.len() as u16);
        header_block.put_slice(value.as_bytes());
    }
    let total = MIN_MESSAGE_LEN + header_block.len() + payload.len();
    let mut out = BytesMut::with_capacity(total);
    out.put_u32(total as u32);
    out.put_u32(header_block.len() as u32);
    out.put_u32(0);
    out.put_slice(&header_block);
    out.put_slice(payload);
    out.put_u32(0);
    out.to_vec()
}

#[cfg(test)]
pub(crate) fn encode_event(event_type: &str, payload: serde_json::Value) -> Vec<u8> {
    encode_message(
        &[
            (":message-type", "event"),
            (":event-type", event_type),
            (":content-type", "application/json"),
        ],
        payload.to_string().as_bytes(),
    )
}

#[cfg(test)]
pub(crate) fn encode_exception(exception_type: &str, message: &str) -> Vec<u8> {
    encode_message(
        &[
            (":message-type", "exception"),
            (":exception-type", exception_type),
            (":content-type", "application/json"),
        ],
        serde_json::json!({ "message": message }).to_string().as_bytes(),
    )
}
