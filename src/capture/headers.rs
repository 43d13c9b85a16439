use http::HeaderMap;
use std::collections::BTreeMap;

/// Replacement value for credential-bearing headers.
pub const REDACTED: &str = "<redacted>";

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
];

/// Snapshot of a header map with lower-cased keys, repeated values joined by
/// `", "` and credentials replaced by [`REDACTED`]. Empty values are dropped.
pub fn capture_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();

    for name in headers.keys() {
        let key = name.as_str().to_ascii_lowercase();
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        if joined.is_empty() {
            continue;
        }

        let value = if SENSITIVE_HEADERS.contains(&key.as_str()) {
            REDACTED.to_string()
        } else {
            joined
        };
        out.insert(key, value);
    }

    out
}
