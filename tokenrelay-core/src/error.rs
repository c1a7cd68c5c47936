use thiserror::Error;

/// Error kinds the provider can signal in-band on an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    InternalServer,
    ModelStreamError,
    Validation,
    Throttling,
    ServiceUnavailable,
}

impl StreamErrorKind {
    /// Map an event-stream `:exception-type` header value.
    pub fn from_exception_type(name: &str) -> Option<Self> {
        match name {
            "internalServerException" => Some(Self::InternalServer),
            "modelStreamErrorException" => Some(Self::ModelStreamError),
            "validationException" => Some(Self::Validation),
            "throttlingException" => Some(Self::Throttling),
            "serviceUnavailableException" => Some(Self::ServiceUnavailable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InternalServer => "internal_server",
            Self::ModelStreamError => "model_stream_error",
            Self::Validation => "validation",
            Self::Throttling => "throttling",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }

    fn describe(&self, message: Option<&str>) -> String {
        match self {
            Self::InternalServer => "Bedrock internal server error during streaming.".to_string(),
            Self::ModelStreamError => format!(
                "Bedrock model stream error: {}",
                message.unwrap_or("unknown error")
            ),
            Self::Validation => format!(
                "Bedrock rejected the stream payload: {}",
                message.unwrap_or_default()
            ),
            Self::Throttling => format!(
                "Bedrock throttled the stream: {}",
                message.unwrap_or_default()
            ),
            Self::ServiceUnavailable => "Bedrock service unavailable during stream.".to_string(),
        }
    }
}

/// Core error type for the relay.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    /// Error-variant event received on an open provider stream. Always fatal.
    #[error("{}", .kind.describe(.message.as_deref()))]
    Stream {
        kind: StreamErrorKind,
        message: Option<String>,
    },

    #[error("rate limited by provider {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("provider unavailable: {provider}")]
    ProviderUnavailable { provider: String },

    #[error("upstream error from {provider}: {code} {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("malformed event stream: {0}")]
    Decode(String),

    /// The relay answered with a non-success status.
    #[error("{details}")]
    Backend { status: u16, details: String },

    /// The relay reported a failure through an `error` frame.
    #[error("{0}")]
    Remote(String),

    #[error("request aborted")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// True when the failure was produced by cancelling the transfer.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

pub type CoreResult<T> = std::result::Result<T, RelayError>;
