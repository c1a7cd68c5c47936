//! Submission state machine: `Idle -> Streaming -> {Done, Errored, Cancelled} -> Idle`.
//!
//! The terminal step is recorded in [`ControllerState::last_outcome`] and the
//! controller is back to idle as soon as `submit` returns.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::ChatClient;
use crate::error::{CoreResult, RelayError};
use crate::sse::{DEFAULT_EVENT, ERROR_EVENT, SseFrame};

pub const EMPTY_PROMPT_TEXT: &str = "Please enter a prompt.";
pub const CANCELLED_TEXT: &str = "Streaming cancelled";
pub const GENERIC_ERROR_TEXT: &str = "Unexpected error while streaming the response.";
pub const REMOTE_ERROR_TEXT: &str = "Bedrock reported an error";
pub const STREAMING_TEXT: &str = "Streaming…";
pub const IDLE_TEXT: &str = "Idle";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    pub prompt: String,
    pub response: String,
    pub is_streaming: bool,
    pub error: Option<String>,
    /// How the most recent submission ended. Cleared when a new one starts.
    pub last_outcome: Option<SubmitOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    EmptyPrompt,
    AlreadyStreaming,
    Done,
    Errored(String),
    Cancelled,
}

#[derive(Default)]
struct Inner {
    state: ControllerState,
    cancel: Option<CancellationToken>,
    aborted_by_user: bool,
}

type FragmentObserver = Arc<dyn Fn(&str) + Send + Sync>;

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn leave_streaming(inner: &mut Inner) {
    inner.cancel = None;
    inner.state.is_streaming = false;
}

/// Owns the `Streaming` state of one submission. [`StreamingGuard::finish`]
/// records the outcome and leaves `Streaming` under a single lock; dropping an
/// unfinished guard (the `submit` future was dropped mid-transfer) still leaves it.
struct StreamingGuard {
    inner: Arc<Mutex<Inner>>,
    armed: bool,
}

impl StreamingGuard {
    fn finish(mut self, result: CoreResult<()>) -> SubmitOutcome {
        self.armed = false;
        let mut inner = lock(&self.inner);
        let (error, outcome) = match result {
            Ok(()) => (None, SubmitOutcome::Done),
            Err(err) if err.is_abort() && inner.aborted_by_user => {
                (Some(CANCELLED_TEXT.to_string()), SubmitOutcome::Cancelled)
            }
            Err(err) => {
                let message = describe_failure(&err);
                tracing::warn!(error = %message, "streaming submission failed");
                (Some(message.clone()), SubmitOutcome::Errored(message))
            }
        };
        inner.state.error = error;
        inner.state.last_outcome = Some(outcome.clone());
        leave_streaming(&mut inner);
        outcome
    }
}

impl Drop for StreamingGuard {
    fn drop(&mut self) {
        if self.armed {
            leave_streaming(&mut lock(&self.inner));
        }
    }
}

#[derive(Deserialize)]
struct TokenPayload {
    token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: Option<String>,
}

/// Drives one relay submission at a time and keeps the user-visible state.
/// Cloning shares the same state.
#[derive(Clone)]
pub struct SubmissionController {
    client: ChatClient,
    inner: Arc<Mutex<Inner>>,
    on_fragment: Option<FragmentObserver>,
}

impl SubmissionController {
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            inner: Arc::new(Mutex::new(Inner::default())),
            on_fragment: None,
        }
    }

    /// Called with every appended fragment, right after it lands in the response.
    pub fn with_fragment_observer(mut self, observer: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_fragment = Some(Arc::new(observer));
        self
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        lock(&self.inner).state.prompt = prompt.into();
    }

    pub fn snapshot(&self) -> ControllerState {
        lock(&self.inner).state.clone()
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.inner).state.is_streaming
    }

    pub fn status_text(&self) -> String {
        let inner = lock(&self.inner);
        match (&inner.state.error, inner.state.is_streaming) {
            (Some(error), _) => error.clone(),
            (None, true) => STREAMING_TEXT.to_string(),
            (None, false) => IDLE_TEXT.to_string(),
        }
    }

    /// Request cancellation of the active submission, if any. Advisory: a
    /// transfer that finishes first keeps its own outcome.
    pub fn cancel(&self) {
        let mut inner = lock(&self.inner);
        if let Some(token) = inner.cancel.clone() {
            inner.aborted_by_user = true;
            token.cancel();
        }
    }

    pub async fn submit(&self) -> SubmitOutcome {
        let (prompt, token) = {
            let mut inner = lock(&self.inner);
            if inner.state.prompt.trim().is_empty() {
                inner.state.error = Some(EMPTY_PROMPT_TEXT.to_string());
                return SubmitOutcome::EmptyPrompt;
            }
            if inner.state.is_streaming {
                return SubmitOutcome::AlreadyStreaming;
            }
            inner.state.is_streaming = true;
            inner.state.response.clear();
            inner.state.error = None;
            inner.state.last_outcome = None;
            inner.aborted_by_user = false;
            let token = CancellationToken::new();
            inner.cancel = Some(token.clone());
            (inner.state.prompt.clone(), token)
        };
        let guard = StreamingGuard {
            inner: self.inner.clone(),
            armed: true,
        };

        let shared = self.inner.clone();
        let observer = self.on_fragment.clone();
        let result = self
            .client
            .stream_chat(&prompt, &token, move |frame| {
                apply_frame(&shared, observer.as_deref(), frame)
            })
            .await;

        guard.finish(result)
    }
}

fn describe_failure(err: &RelayError) -> String {
    if err.is_abort() {
        return GENERIC_ERROR_TEXT.to_string();
    }
    let message = err.to_string();
    if message.trim().is_empty() {
        GENERIC_ERROR_TEXT.to_string()
    } else {
        message
    }
}

fn apply_frame(
    inner: &Mutex<Inner>,
    observer: Option<&(dyn Fn(&str) + Send + Sync)>,
    frame: SseFrame,
) -> CoreResult<()> {
    match frame.event.as_str() {
        DEFAULT_EVENT => {
            if frame.data.is_empty() {
                return Ok(());
            }
            let payload: TokenPayload = serde_json::from_str(&frame.data)
                .map_err(|e| RelayError::Decode(format!("invalid token payload: {e}")))?;
            if let Some(token) = payload.token.filter(|t| !t.is_empty()) {
                lock(inner).state.response.push_str(&token);
                if let Some(observer) = observer {
                    observer(&token);
                }
            }
            Ok(())
        }
        ERROR_EVENT => {
            let message = serde_json::from_str::<ErrorPayload>(&frame.data)
                .ok()
                .and_then(|p| p.message)
                .unwrap_or_else(|| REMOTE_ERROR_TEXT.to_string());
            Err(RelayError::Remote(message))
        }
        _ => Ok(()),
    }
}
