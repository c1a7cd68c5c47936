//! Turns one inference request into an ordered sequence of output-text fragments.
//!
//! The native provider stream is preferred. When no stream can be obtained
//! (open failure, no handle, or a transport failure before the first event)
//! the single-shot call is made instead and its trimmed text becomes the only
//! fragment. Once any stream event has been seen there is no fallback: later
//! failures are fatal, and partial output is never replayed.

use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, StreamExt};

use crate::error::{CoreResult, RelayError};
use crate::model::InferenceRequest;
use crate::provider::InferenceClient;
use crate::stream::{FragmentStream, ProviderEvent};

/// Lazily produce the fragments for `req`. Nothing is sent upstream until the
/// returned stream is first polled.
pub fn stream_fragments(client: Arc<dyn InferenceClient>, req: InferenceRequest) -> FragmentStream {
    Box::pin(fragments(client, req))
}

fn fragments(
    client: Arc<dyn InferenceClient>,
    req: InferenceRequest,
) -> impl Stream<Item = CoreResult<String>> + Send + 'static {
    try_stream! {
        let mut use_fallback = false;
        tracing::info!(
            llm.model = %req.model_id,
            prompt.chars = req.prompt_chars() as u64,
            max_tokens = req.inference_config.max_tokens,
            "invoking provider stream"
        );

        match client.converse_stream(&req).await {
            Ok(Some(mut events)) => {
                let mut seen_event = false;
                let mut stopped = false;
                let mut chunks: u64 = 0;

                while let Some(item) = events.next().await {
                    let event = match item {
                        Ok(event) => event,
                        Err(err) if !seen_event => {
                            tracing::warn!(error = %err, "provider stream failed before the first event, using single-shot call");
                            use_fallback = true;
                            break;
                        }
                        Err(err) => Err(err)?,
                    };
                    seen_event = true;

                    match event {
                        ProviderEvent::ContentDelta { text, .. } => {
                            if !text.is_empty() {
                                chunks += 1;
                                yield text;
                            }
                        }
                        ProviderEvent::MessageStop { reason } => {
                            tracing::info!(stop_reason = reason.map(|r| r.as_str()), chunks, "provider stream stopped");
                            stopped = true;
                            break;
                        }
                        ProviderEvent::Error { kind, message } => {
                            tracing::warn!(kind = kind.as_str(), message = message.as_deref(), "provider reported a stream error");
                            Err::<(), _>(RelayError::Stream { kind, message })?;
                        }
                        ProviderEvent::MessageStart { role } => {
                            tracing::debug!(role = role.as_deref(), "provider message started");
                        }
                        ProviderEvent::ContentBlockStart { index } => {
                            tracing::debug!(index, "content block started");
                        }
                        ProviderEvent::ContentBlockStop { index } => {
                            tracing::debug!(index, "content block stopped");
                        }
                        ProviderEvent::Usage(usage) => {
                            tracing::info!(
                                tokens.prompt = usage.input_tokens,
                                tokens.completion = usage.output_tokens,
                                tokens.total = usage.total_tokens,
                                "provider usage"
                            );
                        }
                    }
                }

                if !use_fallback && !stopped {
                    tracing::warn!(chunks, "provider stream ended without a stop event");
                }
            }
            Ok(None) => {
                tracing::warn!("provider returned no stream handle, using single-shot call");
                use_fallback = true;
            }
            Err(err) => {
                tracing::warn!(error = %err, "opening the provider stream failed, using single-shot call");
                use_fallback = true;
            }
        }

        if use_fallback {
            tracing::info!(llm.model = %req.model_id, "fallback issued");
            let reply = client.converse(&req).await?;
            let text = reply.text.trim();
            tracing::info!(chars = text.chars().count() as u64, "fallback reply received");
            if !text.is_empty() {
                yield text.to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamErrorKind;
    use crate::telemetry::test_span::install_capture;
    use crate::test_util::{ScriptedClient, delta, request, stop};
    use std::sync::atomic::Ordering;

    async fn collect(client: Arc<ScriptedClient>) -> Vec<CoreResult<String>> {
        stream_fragments(client, request("Summarize X")).collect().await
    }

    fn texts(items: &[CoreResult<String>]) -> Vec<String> {
        items.iter().filter_map(|r| r.as_ref().ok().cloned()).collect()
    }

    #[tokio::test]
    async fn deltas_are_yielded_in_order() {
        let client = Arc::new(ScriptedClient::events(vec![
            Ok(ProviderEvent::MessageStart { role: Some("assistant".into()) }),
            delta("Foo"),
            delta(""),
            delta("Bar"),
            stop(),
            delta("after stop"),
        ]));
        let out = collect(client.clone()).await;
        assert_eq!(texts(&out), vec!["Foo", "Bar"]);
        assert!(out.iter().all(|r| r.is_ok()));
        assert_eq!(client.fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_stream_handle_falls_back_exactly_once() {
        let store = install_capture();
        let client = Arc::new(ScriptedClient::no_stream().with_fallback("  Hello there \n"));
        let out = collect(client.clone()).await;
        assert_eq!(texts(&out), vec!["Hello there"]);
        assert_eq!(client.stream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.fallback_calls.load(Ordering::SeqCst), 1);

        assert_eq!(store.events_named("fallback issued").len(), 1);
        let reply = store.last_event("fallback reply received").expect("reply log");
        assert_eq!(reply.field("chars").as_deref(), Some("11"));
    }

    #[tokio::test]
    async fn open_failure_falls_back() {
        let client = Arc::new(
            ScriptedClient::open_fails(RelayError::ProviderUnavailable {
                provider: "bedrock".into(),
            })
            .with_fallback("whole answer"),
        );
        let out = collect(client.clone()).await;
        assert_eq!(texts(&out), vec!["whole answer"]);
        assert_eq!(client.fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_fallback_yields_nothing() {
        let client = Arc::new(ScriptedClient::no_stream().with_fallback("   "));
        let out = collect(client).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn fallback_failure_propagates() {
        let client = Arc::new(ScriptedClient::no_stream());
        let out = collect(client).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].is_err());
    }

    #[tokio::test]
    async fn error_event_after_output_is_fatal_without_fallback() {
        let client = Arc::new(
            ScriptedClient::events(vec![
                delta("Foo"),
                Ok(ProviderEvent::Error {
                    kind: StreamErrorKind::Throttling,
                    message: Some("slow down".into()),
                }),
                delta("never"),
            ])
            .with_fallback("should not be used"),
        );
        let out = collect(client.clone()).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "Foo");
        let err = out[1].as_ref().unwrap_err();
        assert_eq!(err.to_string(), "Bedrock throttled the stream: slow down");
        assert_eq!(client.fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transport_error_before_first_event_falls_back() {
        let client = Arc::new(
            ScriptedClient::events(vec![Err(RelayError::Decode("garbage".into()))])
                .with_fallback("recovered"),
        );
        let out = collect(client.clone()).await;
        assert_eq!(texts(&out), vec!["recovered"]);
        assert_eq!(client.fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_after_first_event_is_fatal() {
        let client = Arc::new(
            ScriptedClient::events(vec![delta("Foo"), Err(RelayError::Decode("garbage".into()))])
                .with_fallback("not used"),
        );
        let out = collect(client.clone()).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(RelayError::Decode(_))));
        assert_eq!(client.fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_end_without_stop_is_success() {
        let client = Arc::new(ScriptedClient::events(vec![delta("Foo"), delta("Bar")]));
        let out = collect(client).await;
        assert_eq!(texts(&out), vec!["Foo", "Bar"]);
        assert!(out.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn nothing_is_requested_until_polled() {
        let client = Arc::new(ScriptedClient::events(vec![stop()]));
        let stream = stream_fragments(client.clone(), request("hi"));
        assert_eq!(client.stream_calls.load(Ordering::SeqCst), 0);
        drop(stream);
        assert_eq!(client.stream_calls.load(Ordering::SeqCst), 0);
    }
}
