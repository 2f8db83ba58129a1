use crate::util::parse_bool_str;
use serde_json::Value;

const DEBUG_PAYLOAD_ENV: &str = "TALKSHELL_DEBUG_PAYLOAD";

pub fn debug_payload_enabled() -> bool {
    std::env::var(DEBUG_PAYLOAD_ENV)
        .ok()
        .and_then(|v| parse_bool_str(&v))
        .unwrap_or(false)
}

pub fn emit_debug_payload(request_url: &str, payload: &Value) {
    let formatted_payload = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "<payload serialization error>".to_string());
    tracing::debug!(url = request_url, "payload_request\n{formatted_payload}");
}

pub fn emit_sse_parse_error(json_data: &str, parse_error: &serde_json::Error) {
    tracing::warn!(error = %parse_error, "sse_parse_failed\ndata:\n{json_data}");
}
