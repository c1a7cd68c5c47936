use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{ConverseReply, InferenceRequest, StopReason};
use crate::stream::ProviderEventStream;

/// Seam between the relay and a concrete inference backend.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    fn name(&self) -> &str;

    /// Open the provider's native stream.
    ///
    /// `Ok(None)` means the call succeeded but produced no stream handle; the
    /// caller is expected to fall back to [`InferenceClient::converse`].
    async fn converse_stream(&self, req: &InferenceRequest)
    -> CoreResult<Option<ProviderEventStream>>;

    /// Single-shot inference returning the whole answer at once.
    async fn converse(&self, req: &InferenceRequest) -> CoreResult<ConverseReply>;
}

/// A dummy client that never streams and always returns a canned answer.
/// Used when no provider credentials are configured.
pub struct NullClient;

#[async_trait]
impl InferenceClient for NullClient {
    fn name(&self) -> &str {
        "null"
    }

    async fn converse_stream(
        &self,
        _req: &InferenceRequest,
    ) -> CoreResult<Option<ProviderEventStream>> {
        Ok(None)
    }

    async fn converse(&self, _req: &InferenceRequest) -> CoreResult<ConverseReply> {
        Ok(ConverseReply {
            text: "[null provider response]".into(),
            stop_reason: Some(StopReason::EndTurn),
            usage: None,
            provider_request_id: None,
            latency_ms: 0,
        })
    }
}
