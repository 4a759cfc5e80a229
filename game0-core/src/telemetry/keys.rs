/// Span/Log attribute keys for generation attempts.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_TURN_ID: &str = "turn.id";
pub const KEY_ATTEMPT_ID: &str = "attempt.id";
pub const KEY_ENDPOINT: &str = "generation.endpoint";

pub const KEY_BYTES: &str = "generation.bytes";
pub const KEY_LINES: &str = "generation.lines";
pub const KEY_LATENCY_MS: &str = "latency.ms";
pub const KEY_OUTCOME: &str = "outcome";
pub const KEY_EXTRACTION: &str = "extraction.kind";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
pub const KEY_ERROR_MESSAGE: &str = "error.message";
