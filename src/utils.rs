use chrono::{SecondsFormat, Utc};
use rand::{Rng, distributions::Alphanumeric, thread_rng};

/// ISO-8601 with millisecond precision and a `Z` suffix, the format every
/// stored timestamp uses.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Key for an individual visit log. The random suffix keeps two visits in
/// the same millisecond from clobbering each other.
pub fn visit_key(timestamp: &str) -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(char::from)
        .collect();

    format!("visit_{timestamp}_{}", suffix.to_lowercase())
}
