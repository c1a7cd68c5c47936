pub mod eventstream;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{
    error::{CoreResult, RelayError},
    http_client::{HttpClient, RequestCtx},
    model::{ConverseReply, InferenceRequest, StopReason, TokenUsage},
    provider::InferenceClient,
    stream::ProviderEventStream,
};

use self::eventstream::EventStream;

const EVENT_STREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

/// Bedrock runtime client speaking the Converse API with bearer-token auth.
#[derive(Debug, Clone)]
pub struct Bedrock {
    http: HttpClient,
    api_key: SecretString,
    base: String,
    name: String,
}

impl Bedrock {
    pub fn new(http: HttpClient, api_key: SecretString, base: String) -> Self {
        Self {
            http,
            api_key,
            base,
            name: "bedrock".into(),
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key.expose_secret()),
        )]
    }

    /// `<base>/model/<model-id>/<operation>`, with the model id percent-encoded.
    fn url(&self, model_id: &str, operation: &str) -> CoreResult<String> {
        let mut url = Url::parse(&self.base)
            .map_err(|e| RelayError::Validation(format!("invalid endpoint {}: {e}", self.base)))?;
        url.path_segments_mut()
            .map_err(|_| RelayError::Validation(format!("endpoint cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .push("model")
            .push(model_id)
            .push(operation);
        Ok(url.into())
    }
}

// ===== Converse wire types =====

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseResp {
    #[serde(default)]
    output: Option<ConverseOutput>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ConverseOutput {
    message: Option<OutputMessage>,
}

#[derive(Deserialize)]
struct OutputMessage {
    #[serde(default)]
    content: Vec<OutputBlock>,
}

#[derive(Deserialize)]
struct OutputBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl InferenceClient for Bedrock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn converse_stream(
        &self,
        req: &InferenceRequest,
    ) -> CoreResult<Option<ProviderEventStream>> {
        let url = self.url(&req.model_id, "converse-stream")?;
        let ctx = RequestCtx {
            request_id: req.request_id.as_deref(),
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let opened = self
            .http
            .post_stream(&url, req, &hdrs, &ctx, EVENT_STREAM_CONTENT_TYPE)
            .await?;
        Ok(opened.map(|(bytes, provider_request_id)| {
            tracing::debug!(
                llm.model = %req.model_id,
                llm.req_id = provider_request_id.as_deref().unwrap_or_default(),
                "provider stream opened"
            );
            EventStream::new(bytes).boxed()
        }))
    }

    async fn converse(&self, req: &InferenceRequest) -> CoreResult<ConverseReply> {
        let url = self.url(&req.model_id, "converse")?;
        let ctx = RequestCtx {
            request_id: req.request_id.as_deref(),
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let (resp, provider_request_id, latency_ms) = self
            .http
            .post_json::<_, ConverseResp>(&url, req, &hdrs, &ctx)
            .await?;

        let text = resp
            .output
            .and_then(|o| o.message)
            .map(|m| {
                m.content
                    .into_iter()
                    .filter_map(|b| b.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(ConverseReply {
            text,
            stop_reason: StopReason::from_provider(resp.stop_reason.as_deref()),
            usage: resp.usage,
            provider_request_id,
            latency_ms,
        })
    }
}
