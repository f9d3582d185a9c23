//! Redaction of credential-looking log fields.

/// Placeholder written in place of a redacted value.
pub const REDACTED: &str = "[REDACTED]";

const SECRET_MARKERS: [&str; 6] = ["KEY", "TOKEN", "SECRET", "PASSWORD", "CREDENTIAL", "AUTH"];

/// Returns true if `key` names something that looks like a credential.
///
/// ```
/// use batch_shim_shared::is_secret_key;
///
/// assert!(is_secret_key("apiKey"));
/// assert!(is_secret_key("Authorization"));
/// assert!(!is_secret_key("receiptHandle"));
/// ```
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// `value`, or [`REDACTED`] when `key` looks like a credential.
#[must_use]
pub fn redact_if_secret(key: &str, value: &str) -> String {
    if is_secret_key(key) { REDACTED } else { value }.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_names_are_detected() {
        for key in ["API_KEY", "accessToken", "CLIENT_SECRET", "db_password", "AWS_CREDENTIALS"] {
            assert!(is_secret_key(key), "{key}");
        }
    }

    #[test]
    fn item_fields_are_not_secret() {
        for key in ["messageId", "trace_id", "body", "stages", "panicStack", "LOG_LEVEL"] {
            assert!(!is_secret_key(key), "{key}");
        }
    }

    #[test]
    fn only_secret_values_are_replaced() {
        assert_eq!(redact_if_secret("password", "hunter2"), REDACTED);
        assert_eq!(redact_if_secret("queue", "orders"), "orders");
    }
}
