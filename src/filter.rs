//! Filter expressions over captured events.
//!
//! A filter is a whitespace-separated list of `key=value` tokens, all of which
//! must hold for an event to match. Single or double quotes group text that
//! contains whitespace, e.g. `path_contains="/a b"`.
//!
//! Two compile modes exist. The management API compiles permissively and
//! ignores tokens it cannot understand; `proxyglassctl` compiles strictly so
//! a typo is reported before any request is sent.

use crate::events::{CaptureEvent, Scheme};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid token (expected k=v): {0}")]
    InvalidToken(String),

    #[error("invalid scheme: {0}")]
    InvalidScheme(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid status_class (expected 2xx): {0}")]
    InvalidStatusClass(String),

    #[error("unknown filter key: {0}")]
    UnknownKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterToken {
    Host(String),
    /// Stored upper-cased.
    Method(String),
    Scheme(Scheme),
    PathContains(String),
    Client(String),
    Status(i64),
    /// Leading digit of a `[1-5]xx` class.
    StatusClass(u8),
}

impl FilterToken {
    fn parse(raw: &str) -> Result<Self, FilterError> {
        let (key, value) = match raw.find('=') {
            Some(idx) if idx > 0 => (&raw[..idx], &raw[idx + 1..]),
            _ => return Err(FilterError::InvalidToken(raw.to_string())),
        };

        let token = match key {
            "host" => FilterToken::Host(value.to_string()),
            "method" => FilterToken::Method(value.to_uppercase()),
            "scheme" => match value {
                "http" => FilterToken::Scheme(Scheme::Http),
                "https" => FilterToken::Scheme(Scheme::Https),
                _ => return Err(FilterError::InvalidScheme(value.to_string())),
            },
            "path_contains" => FilterToken::PathContains(value.to_string()),
            "client" => FilterToken::Client(value.to_string()),
            "status" => match value.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => FilterToken::Status(n.floor() as i64),
                _ => return Err(FilterError::InvalidStatus(value.to_string())),
            },
            "status_class" => match value.as_bytes() {
                [d @ b'1'..=b'5', b'x', b'x'] => FilterToken::StatusClass(d - b'0'),
                _ => return Err(FilterError::InvalidStatusClass(value.to_string())),
            },
            _ => return Err(FilterError::UnknownKey(key.to_string())),
        };

        Ok(token)
    }

    pub fn matches(&self, event: &CaptureEvent) -> bool {
        match self {
            FilterToken::Host(host) => event.dst.host == *host,
            FilterToken::Method(method) => event.http.method.to_uppercase() == *method,
            FilterToken::Scheme(scheme) => event.http.scheme == *scheme,
            FilterToken::PathContains(needle) => event
                .http
                .path
                .as_deref()
                .is_some_and(|path| path.contains(needle.as_str())),
            FilterToken::Client(id) => event.client.id == *id,
            FilterToken::Status(status) => event
                .obs
                .status
                .is_some_and(|actual| i64::from(actual) == *status),
            FilterToken::StatusClass(class) => event
                .obs
                .status
                .is_some_and(|actual| actual / 100 == u16::from(*class)),
        }
    }
}

/// Ordered conjunction of filter tokens. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledFilter {
    tokens: Vec<FilterToken>,
}

impl CompiledFilter {
    pub fn tokens(&self) -> &[FilterToken] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn matches(&self, event: &CaptureEvent) -> bool {
        self.tokens.iter().all(|token| token.matches(event))
    }
}

/// Compiles a filter, silently skipping malformed tokens.
pub fn compile_permissive(query: Option<&str>) -> CompiledFilter {
    let tokens = split_tokens(query.unwrap_or_default().trim())
        .iter()
        .filter_map(|raw| FilterToken::parse(raw).ok())
        .collect();
    CompiledFilter { tokens }
}

/// Compiles a filter, failing on the first malformed token.
pub fn compile_strict(query: &str) -> Result<CompiledFilter, FilterError> {
    let tokens = split_tokens(query.trim())
        .iter()
        .map(|raw| FilterToken::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CompiledFilter { tokens })
}

/// Splits on whitespace outside quotes. Quote characters toggle grouping and
/// are not part of the token.
fn split_tokens(query: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in query.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            None => current.push(ch),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientInfo, Destination, HttpInfo, Observation};
    use chrono::Utc;

    fn connect_event() -> CaptureEvent {
        CaptureEvent {
            ts: Utc::now(),
            client: ClientInfo {
                ip: "10.0.0.1".to_string(),
                port: 1234,
                id: "app".to_string(),
            },
            dst: Destination {
                host: "httpbin.org".to_string(),
                port: 443,
            },
            http: HttpInfo {
                scheme: Scheme::Https,
                method: "CONNECT".to_string(),
                path: None,
                req: None,
                res: None,
            },
            obs: Observation {
                status: Some(200),
                latency_ms: 10,
                bytes_in: 1,
                bytes_out: 2,
            },
        }
    }

    fn http_event(path: Option<&str>, status: Option<u16>) -> CaptureEvent {
        let mut ev = connect_event();
        ev.dst = Destination {
            host: "x".to_string(),
            port: 80,
        };
        ev.http = HttpInfo {
            scheme: Scheme::Http,
            method: "get".to_string(),
            path: path.map(str::to_string),
            req: None,
            res: None,
        };
        ev.obs.status = status;
        ev
    }

    #[test]
    fn test_all_tokens_are_anded() {
        let filter = compile_permissive(Some(
            "scheme=https host=httpbin.org method=CONNECT client=app status_class=2xx",
        ));
        assert_eq!(filter.tokens().len(), 5);

        let ev = connect_event();
        assert!(filter.matches(&ev));

        let mut other_host = ev.clone();
        other_host.dst.host = "example.com".to_string();
        assert!(!filter.matches(&other_host));
    }

    #[test]
    fn test_path_contains_and_case_insensitive_method() {
        let filter = compile_strict("path_contains=/api method=GET").unwrap();
        assert!(filter.matches(&http_event(Some("/v1/api/ping"), Some(200))));
        assert!(!filter.matches(&http_event(Some("/v1/ping"), Some(200))));
        assert!(!filter.matches(&http_event(None, Some(200))));
    }

    #[test]
    fn test_status_tokens_never_match_missing_status() {
        let exact = compile_strict("status=204").unwrap();
        let class = compile_strict("status_class=2xx").unwrap();
        let ev = http_event(Some("/"), None);
        assert!(!exact.matches(&ev));
        assert!(!class.matches(&ev));

        let ev = http_event(Some("/"), Some(204));
        assert!(exact.matches(&ev));
        assert!(class.matches(&ev));
    }

    #[test]
    fn test_status_is_floored() {
        let filter = compile_strict("status=404.9").unwrap();
        assert_eq!(filter.tokens(), &[FilterToken::Status(404)]);
    }

    #[test]
    fn test_empty_query_matches_everything() {
        assert!(compile_permissive(None).is_empty());
        assert!(compile_permissive(Some("   ")).matches(&connect_event()));
        assert!(compile_strict("").unwrap().matches(&connect_event()));
    }

    #[test]
    fn test_permissive_skips_bad_tokens() {
        let filter = compile_permissive(Some("bogus=1 host=a.com scheme=ftp status_class=7xx =x"));
        assert_eq!(filter.tokens(), &[FilterToken::Host("a.com".to_string())]);
    }

    #[test]
    fn test_strict_reports_offending_token() {
        assert_eq!(
            compile_strict("host=a.com bogus=1").unwrap_err().to_string(),
            "unknown filter key: bogus"
        );
        assert_eq!(
            compile_strict("scheme=ftp").unwrap_err(),
            FilterError::InvalidScheme("ftp".to_string())
        );
        assert_eq!(
            compile_strict("status=abc").unwrap_err(),
            FilterError::InvalidStatus("abc".to_string())
        );
        assert_eq!(
            compile_strict("status_class=2XX").unwrap_err(),
            FilterError::InvalidStatusClass("2XX".to_string())
        );
        assert_eq!(
            compile_strict("justtext").unwrap_err().to_string(),
            "invalid token (expected k=v): justtext"
        );
    }

    #[test]
    fn test_quotes_group_whitespace() {
        let filter = compile_strict("path_contains=\"/a b\" client='my app'").unwrap();
        assert_eq!(
            filter.tokens(),
            &[
                FilterToken::PathContains("/a b".to_string()),
                FilterToken::Client("my app".to_string()),
            ]
        );
    }

    #[test]
    fn test_method_value_is_uppercased() {
        let filter = compile_strict("method=post").unwrap();
        assert_eq!(filter.tokens(), &[FilterToken::Method("POST".to_string())]);
    }
}
