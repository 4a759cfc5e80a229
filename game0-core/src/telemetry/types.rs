use serde::Serialize;

use super::keys::*;

/// Structured record of one finished generation attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationLog {
    pub turn_id: Option<String>,
    pub attempt_id: Option<String>,
    pub endpoint: Option<String>,
    pub started_at_ms: Option<u64>,
    pub latency_ms: Option<u64>,

    pub bytes: Option<u64>,
    pub lines: Option<u64>,

    /// "completed", "no_game", "cancelled" or "failed".
    pub outcome: Option<String>,
    /// "fenced" or "document" when a game was produced.
    pub extraction: Option<String>,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl GenerationLog {
    pub fn new() -> Self { Self::default() }
    pub fn turn_id(mut self, v: &str) -> Self { self.turn_id = Some(v.to_string()); self }
    pub fn attempt_id(mut self, v: &str) -> Self { self.attempt_id = Some(v.to_string()); self }
    pub fn endpoint_opt(mut self, v: Option<&str>) -> Self { self.endpoint = v.map(|s| s.to_string()); self }
    pub fn started_at_ms(mut self, v: u64) -> Self { self.started_at_ms = Some(v); self }
    pub fn latency_ms(mut self, v: u64) -> Self { self.latency_ms = Some(v); self }
    pub fn progress(mut self, bytes: u64, lines: u64) -> Self {
        self.bytes = Some(bytes);
        self.lines = Some(lines);
        self
    }
    pub fn outcome(mut self, v: &str) -> Self { self.outcome = Some(v.to_string()); self }
    pub fn extraction_opt(mut self, v: Option<&str>) -> Self { self.extraction = v.map(|s| s.to_string()); self }
    pub fn error(mut self, kind: &str, message: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.to_string());
        self
    }

    /// Set fields as `(key, value)` pairs under the stable attribute keys.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let text = [
            (KEY_TURN_ID, &self.turn_id),
            (KEY_ATTEMPT_ID, &self.attempt_id),
            (KEY_ENDPOINT, &self.endpoint),
            (KEY_OUTCOME, &self.outcome),
            (KEY_EXTRACTION, &self.extraction),
            (KEY_ERROR_KIND, &self.error_kind),
            (KEY_ERROR_MESSAGE, &self.error_message),
        ];
        let numbers = [
            (KEY_BYTES, self.bytes),
            (KEY_LINES, self.lines),
            (KEY_LATENCY_MS, self.latency_ms),
        ];
        text.into_iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k, v.clone())))
            .chain(
                numbers
                    .into_iter()
                    .filter_map(|(k, v)| v.map(|v| (k, v.to_string()))),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generation_log_serializes() {
        let log = GenerationLog::new()
            .turn_id("turn-123")
            .attempt_id("att-1")
            .latency_ms(42)
            .progress(1024, 30)
            .outcome("completed")
            .extraction_opt(Some("fenced"));

        let as_json = serde_json::to_value(&log).unwrap();
        assert_eq!(as_json["turn_id"], json!("turn-123"));
        assert_eq!(as_json["latency_ms"], json!(42));
        assert_eq!(as_json["bytes"], json!(1024));
        assert_eq!(as_json["outcome"], json!("completed"));
        assert_eq!(as_json["extraction"], json!("fenced"));
        assert_eq!(as_json["error_kind"], json!(null));
    }

    #[test]
    fn attributes_use_stable_keys() {
        let log = GenerationLog::new()
            .turn_id("t")
            .outcome("no_game")
            .progress(10, 2);
        let attrs = log.attributes();
        assert!(attrs.contains(&(KEY_TURN_ID, "t".to_string())));
        assert!(attrs.contains(&(KEY_OUTCOME, "no_game".to_string())));
        assert!(attrs.contains(&(KEY_BYTES, "10".to_string())));
        assert!(!attrs.iter().any(|(k, _)| *k == KEY_ERROR_KIND));
    }

    #[test]
    fn error_sets_both_fields() {
        let log = GenerationLog::new().outcome("failed").error("transport", "endpoint unavailable");
        assert_eq!(log.error_kind.as_deref(), Some("transport"));
        assert_eq!(log.error_message.as_deref(), Some("endpoint unavailable"));
    }
}
