//! Captured traffic records.
//!
//! A [`CaptureEvent`] is built once per completed HTTP exchange or per closed
//! CONNECT tunnel and never modified afterwards. The store wraps it in a
//! [`StoredEvent`] that adds the ordering cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureEvent {
    pub ts: DateTime<Utc>,
    pub client: ClientInfo,
    pub dst: Destination,
    pub http: HttpInfo,
    pub obs: Observation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip: String,
    pub port: u16,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpInfo {
    pub scheme: Scheme,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req: Option<MessageCapture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res: Option<MessageCapture>,
}

/// Headers and body sampled from one side of an exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageCapture {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyCapture>,
}

impl MessageCapture {
    pub fn is_empty(&self) -> bool {
        self.headers.is_none() && self.body.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyCapture {
    pub size_bytes: u64,
    pub captured_bytes: u64,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_b64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub latency_ms: u64,
    /// Destination to client.
    pub bytes_in: u64,
    /// Client to destination.
    pub bytes_out: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub cursor: u64,
    #[serde(flatten)]
    pub event: CaptureEvent,
}

impl std::ops::Deref for StoredEvent {
    type Target = CaptureEvent;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

/// `2xx`-style class of a status code.
pub fn status_class(status: u16) -> String {
    format!("{}xx", status / 100)
}
