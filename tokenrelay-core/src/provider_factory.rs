use std::sync::Arc;

use secrecy::SecretString;

use crate::config::Config;
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::provider::{InferenceClient, NullClient};
use crate::providers::bedrock::Bedrock;

/// Build the process-wide inference client from configuration.
/// The bearer token is read from the environment variable named by
/// `bedrock.api_key_env`.
pub fn build_inference_client(cfg: &Config) -> CoreResult<Arc<dyn InferenceClient>> {
    let token = std::env::var(&cfg.bedrock.api_key_env)
        .ok()
        .filter(|t| !t.trim().is_empty())
        .map(|t| SecretString::new(t.into()));
    from_parts(cfg, token)
}

/// Same as [`build_inference_client`] with the credential supplied directly.
pub fn from_parts(
    cfg: &Config,
    token: Option<SecretString>,
) -> CoreResult<Arc<dyn InferenceClient>> {
    match token {
        Some(token) => {
            let http = HttpClient::from_cfg(&cfg.http, "bedrock")?;
            Ok(Arc::new(Bedrock::new(http, token, cfg.bedrock.base_url())))
        }
        None => {
            tracing::warn!(
                env = %cfg.bedrock.api_key_env,
                "no Bedrock credential configured; answering with the null provider"
            );
            Ok(Arc::new(NullClient))
        }
    }
}
