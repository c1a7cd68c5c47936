//! Scripted inference client for adapter and relay tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::BedrockCfg;
use crate::error::{CoreResult, RelayError};
use crate::model::{ConverseReply, InferenceRequest, StopReason};
use crate::provider::InferenceClient;
use crate::stream::{ProviderEvent, ProviderEventStream};

enum StreamScript {
    Events(Vec<CoreResult<ProviderEvent>>),
    Channel(mpsc::Receiver<CoreResult<ProviderEvent>>),
    NoStream,
    OpenFails(RelayError),
}

pub struct ScriptedClient {
    script: Mutex<Option<StreamScript>>,
    fallback: Mutex<Option<String>>,
    pub stream_calls: AtomicUsize,
    pub fallback_calls: AtomicUsize,
    pub last_request: Mutex<Option<InferenceRequest>>,
}

impl ScriptedClient {
    fn with_script(script: StreamScript) -> Self {
        Self {
            script: Mutex::new(Some(script)),
            fallback: Mutex::new(None),
            stream_calls: AtomicUsize::new(0),
            fallback_calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Stream that yields the given items, then ends.
    pub fn events(events: Vec<CoreResult<ProviderEvent>>) -> Self {
        Self::with_script(StreamScript::Events(events))
    }

    /// Stream fed by the returned sender; ends when the sender is dropped.
    /// A failed `send` means the consumer dropped the stream.
    pub fn channel() -> (Self, mpsc::Sender<CoreResult<ProviderEvent>>) {
        let (tx, rx) = mpsc::channel(1);
        (Self::with_script(StreamScript::Channel(rx)), tx)
    }

    pub fn no_stream() -> Self {
        Self::with_script(StreamScript::NoStream)
    }

    pub fn open_fails(err: RelayError) -> Self {
        Self::with_script(StreamScript::OpenFails(err))
    }

    /// Text returned by the single-shot call. Without it, that call fails.
    pub fn with_fallback(self, text: &str) -> Self {
        *self.fallback.lock().unwrap() = Some(text.to_string());
        self
    }

    pub fn total_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst) + self.fallback_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn converse_stream(
        &self,
        req: &InferenceRequest,
    ) -> CoreResult<Option<ProviderEventStream>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req.clone());
        let script = self.script.lock().unwrap().take();
        match script {
            Some(StreamScript::Events(events)) => Ok(Some(futures::stream::iter(events).boxed())),
            Some(StreamScript::Channel(rx)) => Ok(Some(ReceiverStream::new(rx).boxed())),
            Some(StreamScript::NoStream) => Ok(None),
            Some(StreamScript::OpenFails(err)) => Err(err),
            None => Err(RelayError::Validation("stream script already consumed".into())),
        }
    }

    async fn converse(&self, req: &InferenceRequest) -> CoreResult<ConverseReply> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req.clone());
        let fallback = self.fallback.lock().unwrap().clone();
        match fallback {
            Some(text) => Ok(ConverseReply {
                text,
                stop_reason: Some(StopReason::EndTurn),
                usage: None,
                provider_request_id: None,
                latency_ms: 1,
            }),
            None => Err(RelayError::ProviderUnavailable {
                provider: "scripted".into(),
            }),
        }
    }
}

pub fn delta(text: &str) -> CoreResult<ProviderEvent> {
    Ok(ProviderEvent::ContentDelta {
        index: 0,
        text: text.to_string(),
    })
}

pub fn stop() -> CoreResult<ProviderEvent> {
    Ok(ProviderEvent::MessageStop {
        reason: Some(StopReason::EndTurn),
    })
}

pub fn request(prompt: &str) -> InferenceRequest {
    InferenceRequest::from_prompt(prompt, &BedrockCfg::default())
}
