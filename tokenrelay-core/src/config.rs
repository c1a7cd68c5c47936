use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::normalizer::normalize_inference;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerCfg {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. `None` allows every origin.
    #[serde(default)]
    pub cors_origins: Option<Vec<String>>,
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: None,
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4000
}
fn default_body_limit_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InferenceCfg {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for InferenceCfg {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            stop_sequences: None,
            system_prompt: None,
        }
    }
}

fn default_max_tokens() -> u32 {
    128
}
fn default_temperature() -> f32 {
    0.5
}
fn default_top_p() -> f32 {
    0.9
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BedrockCfg {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Base URL override; derived from `region` when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Name of the environment variable that contains the bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub inference: InferenceCfg,
}

impl Default for BedrockCfg {
    fn default() -> Self {
        Self {
            region: default_region(),
            model_id: default_model_id(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            inference: InferenceCfg::default(),
        }
    }
}

impl BedrockCfg {
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", self.region),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_model_id() -> String {
    "anthropic.claude-3-haiku-20240307-v1:0".to_string()
}
fn default_api_key_env() -> String {
    "AWS_BEARER_TOKEN_BEDROCK".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds. Unset by default: a streamed
    /// answer may legitimately take longer than any fixed bound.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: None,
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerCfg,
    #[serde(default)]
    pub bedrock: BedrockCfg,
    /// HTTP client configuration (timeouts, pooling). Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::RelayError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::RelayError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::RelayError::Other(e.into()))
                })?,
        };
        Ok(cfg.normalized())
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    /// Apply environment-style overrides. Values that fail to parse leave the
    /// current setting untouched.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = parse_var(&lookup, "PORT") {
            self.server.port = port;
        }
        if let Some(host) = lookup("HOST").filter(|h| !h.trim().is_empty()) {
            self.server.host = host.trim().to_string();
        }
        if let Some(origins) = lookup("CORS_ORIGIN") {
            self.server.cors_origins = if origins.trim() == "*" {
                None
            } else {
                split_list(&origins)
            };
        }

        let bedrock = &mut self.bedrock;
        if let Some(region) = lookup("BEDROCK_REGION").filter(|v| !v.is_empty()) {
            bedrock.region = region;
        }
        if let Some(model_id) = lookup("BEDROCK_MODEL_ID").filter(|v| !v.is_empty()) {
            bedrock.model_id = model_id;
        }
        if let Some(endpoint) = lookup("BEDROCK_ENDPOINT").filter(|v| !v.is_empty()) {
            bedrock.endpoint = Some(endpoint);
        }

        let inference = &mut bedrock.inference;
        if let Some(max_tokens) = parse_var(&lookup, "BEDROCK_MAX_TOKENS") {
            inference.max_tokens = max_tokens;
        }
        if let Some(temperature) = parse_var::<f32, _>(&lookup, "BEDROCK_TEMPERATURE")
            .filter(|t| t.is_finite())
        {
            inference.temperature = temperature;
        }
        if let Some(top_p) =
            parse_var::<f32, _>(&lookup, "BEDROCK_TOP_P").filter(|p| p.is_finite())
        {
            inference.top_p = top_p;
        }
        if let Some(stops) = lookup("BEDROCK_STOP_SEQUENCES") {
            inference.stop_sequences = split_list(&stops);
        }
        if let Some(system) = lookup("BEDROCK_SYSTEM_PROMPT") {
            inference.system_prompt = Some(system);
        }

        *self = std::mem::take(self).normalized();
    }

    fn normalized(mut self) -> Self {
        self.bedrock.inference = normalize_inference(self.bedrock.inference);
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse::<T>().ok())
}

fn split_list(value: &str) -> Option<Vec<String>> {
    let items: Vec<String> = value
        .split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() { None } else { Some(items) }
}
