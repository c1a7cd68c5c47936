use serde::{Deserialize, Serialize};

use crate::config::BedrockCfg;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    ContentFiltered,
    GuardrailIntervened,
    Other,
}

impl StopReason {
    pub fn from_provider(reason: Option<&str>) -> Option<Self> {
        match reason {
            Some("end_turn") => Some(Self::EndTurn),
            Some("max_tokens") => Some(Self::MaxTokens),
            Some("stop_sequence") => Some(Self::StopSequence),
            Some("tool_use") => Some(Self::ToolUse),
            Some("content_filtered") => Some(Self::ContentFiltered),
            Some("guardrail_intervened") => Some(Self::GuardrailIntervened),
            Some(_) => Some(Self::Other),
            None => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::ToolUse => "tool_use",
            Self::ContentFiltered => "content_filtered",
            Self::GuardrailIntervened => "guardrail_intervened",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

/// Payload for both the streaming and the single-shot inference call.
/// Built once per relay request and never mutated afterwards.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    /// Travels in the URL path, not the body.
    #[serde(skip)]
    pub model_id: String,
    /// Correlation id forwarded upstream as a header.
    #[serde(skip)]
    pub request_id: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Vec<ContentBlock>>,
    pub inference_config: InferenceConfig,
}

impl InferenceRequest {
    /// Wrap a single prompt as one user message with the static inference settings.
    pub fn from_prompt(prompt: &str, cfg: &BedrockCfg) -> Self {
        let inference = &cfg.inference;
        Self {
            model_id: cfg.model_id.clone(),
            request_id: None,
            messages: vec![Message {
                role: Role::User,
                content: vec![ContentBlock {
                    text: prompt.to_string(),
                }],
            }],
            system: inference
                .system_prompt
                .as_ref()
                .map(|text| vec![ContentBlock { text: text.clone() }]),
            inference_config: InferenceConfig {
                max_tokens: inference.max_tokens,
                temperature: inference.temperature,
                top_p: inference.top_p,
                stop_sequences: inference.stop_sequences.clone(),
            },
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn prompt_chars(&self) -> usize {
        self.messages
            .iter()
            .flat_map(|m| m.content.iter())
            .map(|c| c.text.chars().count())
            .sum()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

/// Result of the non-streaming inference call.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConverseReply {
    pub text: String,
    pub stop_reason: Option<StopReason>,
    pub usage: Option<TokenUsage>,
    pub provider_request_id: Option<String>,
    pub latency_ms: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BedrockCfg, InferenceCfg};
    use serde_json::json;

    #[test]
    fn request_serializes_to_wire_shape() {
        let cfg = BedrockCfg {
            inference: InferenceCfg {
                max_tokens: 64,
                temperature: 0.5,
                top_p: 0.75,
                stop_sequences: Some(vec!["END".into()]),
                system_prompt: Some("Be terse.".into()),
            },
            ..BedrockCfg::default()
        };
        let req = InferenceRequest::from_prompt("Summarize X", &cfg).with_request_id("rid-1");

        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(
            wire,
            json!({
                "messages": [{"role": "user", "content": [{"text": "Summarize X"}]}],
                "system": [{"text": "Be terse."}],
                "inferenceConfig": {
                    "maxTokens": 64,
                    "temperature": 0.5,
                    "topP": 0.75,
                    "stopSequences": ["END"]
                }
            })
        );
        assert_eq!(req.model_id, cfg.model_id);
        assert_eq!(req.request_id.as_deref(), Some("rid-1"));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let req = InferenceRequest::from_prompt("hi", &BedrockCfg::default());
        let wire = serde_json::to_value(&req).unwrap();
        assert!(wire.get("system").is_none());
        assert!(wire["inferenceConfig"].get("stopSequences").is_none());
        assert_eq!(wire["inferenceConfig"]["maxTokens"], json!(128));
        assert_eq!(req.prompt_chars(), 2);
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(StopReason::from_provider(Some("end_turn")), Some(StopReason::EndTurn));
        assert_eq!(StopReason::from_provider(Some("max_tokens")), Some(StopReason::MaxTokens));
        assert_eq!(StopReason::from_provider(Some("weird")), Some(StopReason::Other));
        assert_eq!(StopReason::from_provider(None), None);
        assert_eq!(StopReason::StopSequence.as_str(), "stop_sequence");
    }
}
