//! Streaming primitives shared by the provider client, the adapter and the relay.
//!
//! Contract:
//! - A provider stream emits events in arrival order; `ContentDelta` is the only
//!   event that carries user-visible text.
//! - `MessageStop` is the only success terminator. `Error` is terminal and fatal.
//! - After a terminal event, no further events are consumed.
//! - Stream items are `CoreResult`s; `RelayError` is not `Clone`, so the item
//!   types are not either.

use crate::error::{CoreResult, StreamErrorKind};
use crate::model::{StopReason, TokenUsage};

/// One classified event from the provider's native stream.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    MessageStart {
        role: Option<String>,
    },
    ContentBlockStart {
        index: u32,
    },
    /// Partial assistant text. Empty text is possible (non-text deltas) and carries nothing.
    ContentDelta {
        index: u32,
        text: String,
    },
    ContentBlockStop {
        index: u32,
    },
    Usage(TokenUsage),
    MessageStop {
        reason: Option<StopReason>,
    },
    Error {
        kind: StreamErrorKind,
        message: Option<String>,
    },
}

impl ProviderEvent {
    /// Returns true if this event ends the stream (`MessageStop` or `Error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop { .. } | Self::Error { .. })
    }

    /// Convenience accessor for non-empty `ContentDelta` text.
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            Self::ContentDelta { text, .. } if !text.is_empty() => Some(text.as_str()),
            _ => None,
        }
    }
}

/// Boxed stream of provider events. A transport or framing failure surfaces as `Err`.
pub type ProviderEventStream = futures::stream::BoxStream<'static, CoreResult<ProviderEvent>>;

/// Lazy, ordered sequence of output-text fragments produced for one relay request.
pub type FragmentStream = futures::stream::BoxStream<'static, CoreResult<String>>;
