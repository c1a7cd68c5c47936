use serde::Serialize;

/// How a relay request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelayOutcome {
    /// `done` frame written.
    #[default]
    Completed,
    /// `error` frame written (or would have been, had the client stayed).
    Failed,
    /// Client went away before a terminal frame.
    Disconnected,
}

impl RelayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Structured summary logged once per relay request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayLog {
    pub request_id: String,
    pub model: String,
    pub prompt_chars: usize,
    pub fragments: usize,
    pub outcome: RelayOutcome,
    pub latency_ms: u64,
    pub error_message: Option<String>,
}

impl RelayLog {
    pub fn new(request_id: &str, model: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            model: model.to_string(),
            ..Default::default()
        }
    }
    pub fn prompt_chars(mut self, v: usize) -> Self { self.prompt_chars = v; self }
    pub fn fragments(mut self, v: usize) -> Self { self.fragments = v; self }
    pub fn outcome(mut self, v: RelayOutcome) -> Self { self.outcome = v; self }
    pub fn latency_ms(mut self, v: u64) -> Self { self.latency_ms = v; self }
    pub fn error_message_opt(mut self, v: Option<&str>) -> Self {
        self.error_message = v.map(|s| s.to_string());
        self
    }
}
