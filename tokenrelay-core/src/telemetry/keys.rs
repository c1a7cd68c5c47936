/// Log field keys for relay events.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_REQUEST_ID: &str = "req.id";
pub const KEY_MODEL: &str = "llm.model";
pub const KEY_PROVIDER_REQUEST_ID: &str = "llm.req_id";
pub const KEY_PROMPT_CHARS: &str = "prompt.chars";

pub const KEY_FRAGMENTS: &str = "relay.fragments";
pub const KEY_OUTCOME: &str = "relay.outcome";
pub const KEY_LATENCY_MS: &str = "latency.ms";

pub const KEY_ERROR_MESSAGE: &str = "error.message";
