use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::Response;
use futures::StreamExt;
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use super::{ApiError, AppState, SseSession};
use crate::adapter::stream_fragments;
use crate::error::RelayError;
use crate::model::InferenceRequest;
use crate::normalizer::normalize_prompt;
use crate::sse::RelayFrame;
use crate::stream::FragmentStream;
use crate::telemetry::{RelayLog, RelayOutcome, emit_relay};

pub(crate) const PROMPT_REQUIRED: &str = "Prompt is required";
pub(crate) const GENERIC_FAILURE: &str = "Unexpected server error";

/// `POST /api/chat`. Validates the prompt, opens the SSE session and hands
/// the rest of the request to a spawned relay task.
pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    // a missing or non-string prompt counts as empty
    let raw = body.get("prompt").and_then(Value::as_str).unwrap_or_default();
    let prompt =
        normalize_prompt(raw).ok_or_else(|| RelayError::Validation(PROMPT_REQUIRED.into()))?;

    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("chat", req.id = %request_id);
    let req = InferenceRequest::from_prompt(&prompt, &state.config.bedrock)
        .with_request_id(request_id.clone());
    let log = RelayLog::new(&request_id, &req.model_id).prompt_chars(req.prompt_chars());

    let (session, response) = span.in_scope(|| {
        tracing::info!(prompt.chars = req.prompt_chars() as u64, "received prompt");
        SseSession::open()
    });
    let fragments = stream_fragments(state.client.clone(), req);
    tokio::spawn(relay(session, fragments, log).instrument(span));
    Ok(response)
}

/// Pull fragments one at a time and write them to the session until the
/// sequence ends, fails, or the client goes away.
pub async fn relay(mut session: SseSession, mut fragments: FragmentStream, log: RelayLog) {
    let started = Instant::now();
    let mut failure: Option<String> = None;

    loop {
        if session.is_disconnected() {
            break;
        }
        let next = fragments.next().await;
        if session.is_disconnected() {
            break;
        }
        match next {
            Some(Ok(fragment)) => {
                if !session.send(&RelayFrame::Token(fragment)).await {
                    break;
                }
            }
            Some(Err(err)) => {
                let message = match err.to_string() {
                    m if m.trim().is_empty() => GENERIC_FAILURE.to_string(),
                    m => m,
                };
                tracing::error!(error = %message, "error while streaming response");
                session.send(&RelayFrame::Error(message.clone())).await;
                failure = Some(message);
                break;
            }
            None => {
                if session.send(&RelayFrame::Done).await {
                    tracing::info!(tokens_sent = session.tokens_sent() as u64, "completed stream");
                }
                break;
            }
        }
    }
    // abandon whatever the adapter still had in flight
    drop(fragments);

    let outcome = if failure.is_some() {
        RelayOutcome::Failed
    } else if session.is_disconnected() {
        RelayOutcome::Disconnected
    } else {
        RelayOutcome::Completed
    };
    emit_relay(
        &log.fragments(session.tokens_sent())
            .outcome(outcome)
            .latency_ms(started.elapsed().as_millis() as u64)
            .error_message_opt(failure.as_deref()),
    );
    session.finish();
}
