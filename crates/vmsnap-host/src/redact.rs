use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Keys whose values hold disk-encryption material.
const SECRET_KEYS: &[&str] = &["encryptionDetails", "encryptionSettings"];

/// Copy of `value` safe to log: every secret subtree is replaced, whether it
/// appears as a plain object key or as a `{"key": .., "value": ..}` entry.
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let names_secret = map
                .get("key")
                .and_then(Value::as_str)
                .is_some_and(is_secret_key);
            let redacted = map
                .iter()
                .map(|(k, v)| {
                    let v = if is_secret_key(k) || (names_secret && k == "value") {
                        Value::String(REDACTED.into())
                    } else {
                        redact_json(v)
                    };
                    (k.clone(), v)
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}

fn is_secret_key(key: &str) -> bool {
    SECRET_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}
