use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::HttpCfg;
use crate::error::{CoreResult, RelayError};

/// Request context carries the relay's correlation id upstream.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
}

/// A boxed stream of raw body chunks.
pub type ByteStream =
    std::pin::Pin<Box<dyn futures_util::stream::Stream<Item = CoreResult<Bytes>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    provider: String,
}

impl HttpClient {
    pub fn new_default(provider: &str) -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default(), provider)
    }

    pub fn from_cfg(cfg: &HttpCfg, provider: &str) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(ms) = cfg.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(max) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(max);
        }
        let inner = builder
            .build()
            .map_err(|e| RelayError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("tokenrelay/", env!("CARGO_PKG_VERSION")).to_string(),
            provider: provider.to_string(),
        })
    }

    fn request<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        req
    }

    fn unavailable(&self) -> RelayError {
        RelayError::ProviderUnavailable {
            provider: self.provider.clone(),
        }
    }

    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, Option<String>, u32)> {
        let start = Instant::now();
        let resp = self
            .request(url, body, headers, ctx)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|_e| self.unavailable())?;

        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        let headers = resp.headers().clone();
        let provider_request_id = extract_request_id(&headers);

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let ra = parse_retry_after(&headers);
            return Err(map_http_error(&self.provider, status, ra, &text));
        }

        let parsed = resp
            .json::<R>()
            .await
            .map_err(|e| RelayError::ProviderError {
                provider: self.provider.clone(),
                code: status.as_u16().to_string(),
                message: format!("json decode error: {e}"),
            })?;
        Ok((parsed, provider_request_id, latency))
    }

    /// POST JSON and hand back the response body as a byte stream.
    ///
    /// Returns `Ok(None)` when the upstream answered successfully but not with
    /// the expected streaming content type, i.e. there is no stream to read.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
        content_type: &str,
    ) -> CoreResult<Option<(ByteStream, Option<String>)>> {
        let resp = self
            .request(url, body, headers, ctx)
            .header("Accept", content_type)
            .send()
            .await
            .map_err(|_| self.unavailable())?;

        let status = resp.status();
        let headers = resp.headers().clone();
        if !status.is_success() {
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(&self.provider, status, ra, &body));
        }

        let streaming = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(content_type));
        if !streaming {
            return Ok(None);
        }

        let provider = self.provider.clone();
        let bytes = resp
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|_| RelayError::ProviderUnavailable {
                    provider: provider.clone(),
                })
            })
            .boxed();
        Ok(Some((bytes, extract_request_id(&headers))))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 4] = [
        "x-amzn-requestid",
        "x-amz-request-id",
        "x-request-id",
        "request-id",
    ];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(provider: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> RelayError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RelayError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        s if s.is_server_error() => RelayError::ProviderUnavailable {
            provider: provider.to_string(),
        },
        s => RelayError::ProviderError {
            provider: provider.to_string(),
            code: s.as_u16().to_string(),
            message: error_message(body),
        },
    }
}

/// AWS error bodies look like `{"message": "..."}`; anything else is passed through truncated.
fn error_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => truncate(&parsed.message, 300),
        Err(_) => truncate(body, 300),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
