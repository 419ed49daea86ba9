//! Shared types for the approval and ask-user state machines (§4.8).

/// Outcome of awaiting a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    TimedOut,
}

/// What the caller should do with an answered (or abandoned) ask-user
/// question.
#[derive(Debug, Clone)]
pub enum AskUserOutcome {
    /// The target session was still alive; the answer was written directly
    /// to `responses/<request_id>.json` for the container to read.
    DeliveredToSession,
    /// The target session had already ended; the caller must enqueue this
    /// synthetic message as a new inbound message to cold-start a fresh
    /// invocation (§4.8 step 3, "cold-start path").
    RequiresColdStart { chat_jid: String, synthetic_message: String },
}

/// Truncates a JSON payload into a human-readable one-line-per-field
/// summary for the approval notification (§4.8 step 2): internal
/// bookkeeping fields are omitted, long values are truncated to 200
/// chars, and an empty object renders as `(no details)`.
pub fn summarize_payload(payload: &serde_json::Value) -> String {
    const OMIT: &[&str] = &["request_id", "type", "source_group"];
    const MAX_VALUE_LEN: usize = 200;

    let Some(obj) = payload.as_object() else {
        return "(no details)".to_string();
    };

    let mut lines = Vec::new();
    for (key, value) in obj {
        if OMIT.contains(&key.as_str()) {
            continue;
        }
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let truncated: String = rendered.chars().take(MAX_VALUE_LEN).collect();
        lines.push(format!("{key}: {truncated}"));
    }

    if lines.is_empty() {
        "(no details)".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_payload_renders_no_details() {
        assert_eq!(summarize_payload(&json!({})), "(no details)");
    }

    #[test]
    fn internal_fields_are_omitted() {
        let payload = json!({"request_id": "r1", "type": "tool_call", "source_group": "acme", "path": "/etc/passwd"});
        let summary = summarize_payload(&payload);
        assert_eq!(summary, "path: /etc/passwd");
    }

    #[test]
    fn long_values_are_truncated() {
        let payload = json!({"body": "x".repeat(500)});
        let summary = summarize_payload(&payload);
        assert_eq!(summary, format!("body: {}", "x".repeat(200)));
    }
}
