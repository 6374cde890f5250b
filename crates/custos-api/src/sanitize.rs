//! Details sanitization for the typed request builders.
//!
//! Audit details describe an access; they should not carry the protected
//! data itself.  `sanitize_details` redacts top-level values whose key names
//! a sensitive attribute and truncates oversized strings.  It is opt-in: the
//! builders in [`crate::request`] apply it, raw submissions are stored as
//! given.

use serde_json::{Map, Value};

/// Key fragments (matched case-insensitively) whose values are redacted.
pub const SENSITIVE_KEYS: [&str; 9] = [
    "ssn",
    "social_security",
    "dob",
    "date_of_birth",
    "address",
    "phone",
    "email",
    "mrn",
    "insurance_id",
];

/// Strings longer than this many characters are replaced by a marker.
pub const MAX_DETAIL_STRING_CHARS: usize = 1000;

pub const REDACTED: &str = "[REDACTED]";

/// Sanitize the top-level fields of a details object.
///
/// Non-object values are returned unchanged.
pub fn sanitize_details(details: Value) -> Value {
    match details {
        Value::Object(fields) => Value::Object(sanitize_fields(fields)),
        other => other,
    }
}

fn sanitize_fields(fields: Map<String, Value>) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| {
            let value = if is_sensitive(&key) {
                Value::String(REDACTED.to_string())
            } else {
                match value {
                    Value::String(s) if s.chars().count() > MAX_DETAIL_STRING_CHARS => {
                        Value::String(format!("[TRUNCATED:{} chars]", s.chars().count()))
                    }
                    other => other,
                }
            };
            (key, value)
        })
        .collect()
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}
