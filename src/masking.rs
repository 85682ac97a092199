//! Key-based redaction of structured log details.
//!
//! Any key whose lowercased name contains one of [`SENSITIVE_KEYS`] has its
//! value redacted. Nested objects under other keys are walked; arrays are
//! passed through untouched.

use serde_json::Value;

use crate::config::LogPolicy;
use crate::model::Details;

pub const REDACTION_MARKER: &str = "***";

pub const SENSITIVE_KEYS: [&str; 10] = [
    "password",
    "email",
    "phone",
    "ip_address",
    "user_agent",
    "token",
    "api_key",
    "secret",
    "ssn",
    "credit_card",
];

/// Returns a redacted copy of `details` when the policy asks for masking,
/// otherwise an unchanged copy.
pub fn mask_sensitive_data(policy: &LogPolicy, details: &Details) -> Details {
    if !policy.mask_sensitive_data {
        return details.clone();
    }
    redact_details(details)
}

pub fn redact_details(details: &Details) -> Details {
    details
        .iter()
        .map(|(key, value)| {
            let masked = if is_sensitive_key(key) {
                redact_value(value)
            } else if let Value::Object(nested) = value {
                Value::Object(redact_details(nested))
            } else {
                value.clone()
            };
            (key.clone(), masked)
        })
        .collect()
}

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
}

fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(mask_string(s)),
        v if is_truthy(v) => Value::String(REDACTION_MARKER.to_string()),
        v => v.clone(),
    }
}

fn mask_string(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 4 {
        return REDACTION_MARKER.to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}{}{}", head, REDACTION_MARKER, tail)
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
