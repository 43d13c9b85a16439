use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::PROXY_AUTHORIZATION;
use http::HeaderMap;

pub const CLIENT_ID_HEADER: &str = "x-proxyglass-id";

/// Resolves the logical client: the `x-proxyglass-id` header, then the user
/// of `Proxy-Authorization: Basic`, then `default_id`.
pub fn resolve_client_id(headers: &HeaderMap, default_id: &str) -> String {
    let explicit = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(id) = explicit {
        return id.to_string();
    }

    headers
        .get(PROXY_AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(basic_user)
        .unwrap_or_else(|| default_id.to_string())
}

fn basic_user(value: &str) -> Option<String> {
    let (scheme, credentials) = value.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(credentials.trim()).ok()?;
    let decoded = String::from_utf8_lossy(&decoded);
    let user = decoded.split(':').next().unwrap_or_default().trim();
    (!user.is_empty()).then(|| user.to_string())
}
