//! Absolute-form HTTP forwarding.

use super::body::{BodyTap, ObservedBody, SharedTap};
use super::identity::resolve_client_id;
use super::{ProxyBody, UPSTREAM_CONNECT, UPSTREAM_REQUEST};
use crate::capture::capture_headers;
use crate::error::ProxyError;
use crate::events::{
    CaptureEvent, ClientInfo, Destination, HttpInfo, MessageCapture, Observation, Scheme,
};
use crate::state::AppState;
use chrono::Utc;
use http::header::{HeaderValue, CONTENT_TYPE, HOST};
use http::{HeaderMap, Request, Response};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tracing::{debug, warn};
use url::{Host, Url};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
];

/// Where a proxied request is going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Value for the forwarded `Host` header.
    pub authority: String,
    /// Origin-form request target.
    pub path: String,
}

/// Resolves the destination from an absolute-form target, or from the `Host`
/// header when the client sent origin form.
pub fn resolve_target(raw: &str, headers: &HeaderMap) -> Result<Target, ProxyError> {
    let bad_request = || ProxyError::Validation("bad request".to_string());

    let lower = raw.to_ascii_lowercase();
    let url = if lower.starts_with("http://") || lower.starts_with("https://") {
        Url::parse(raw).map_err(|_| bad_request())?
    } else {
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|h| !h.is_empty())
            .ok_or_else(bad_request)?;
        let path = if raw.starts_with('/') {
            raw.to_string()
        } else {
            format!("/{raw}")
        };
        Url::parse(&format!("http://{host}{path}")).map_err(|_| bad_request())?
    };

    if url.scheme() != "http" {
        return Err(ProxyError::Validation(
            "only http proxying is supported; use CONNECT for https".to_string(),
        ));
    }

    // IPv6 literals keep their brackets only in the forwarded Host value.
    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => return Err(bad_request()),
    };
    let host_literal = url.host_str().ok_or_else(bad_request)?;
    let authority = match url.port() {
        Some(port) => format!("{host_literal}:{port}"),
        None => host_literal.to_string(),
    };
    let path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };

    Ok(Target {
        host,
        port: url.port_or_known_default().unwrap_or(80),
        authority,
        path,
    })
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Everything needed to build the event once the response body has ended.
struct Exchange {
    state: Arc<AppState>,
    started: Instant,
    client: ClientInfo,
    target: Target,
    method: String,
    status: u16,
    req_headers: Option<BTreeMap<String, String>>,
    res_headers: Option<BTreeMap<String, String>>,
    req_content_type: Option<String>,
    res_content_type: Option<String>,
    req_tap: SharedTap,
    res_tap: SharedTap,
}

impl Exchange {
    fn complete(self) {
        let elapsed = self.started.elapsed();
        let config = &self.state.config;
        let bytes_out = self.req_tap.lock().bytes();
        let bytes_in = self.res_tap.lock().bytes();

        let metrics = &self.state.metrics;
        metrics.record_http(
            &self.client.id,
            &self.target.host,
            &self.method,
            Some(self.status),
            elapsed,
        );
        metrics.record_bytes(&self.client.id, bytes_in, bytes_out);

        let mut req = MessageCapture {
            headers: self.req_headers,
            body: None,
        };
        let mut res = MessageCapture {
            headers: self.res_headers,
            body: None,
        };
        if config.capture_http_body_bytes > 0 {
            let text = config.capture_http_body_text;
            req.body = self
                .req_tap
                .lock()
                .capture(self.req_content_type.as_deref(), text);
            res.body = self
                .res_tap
                .lock()
                .capture(self.res_content_type.as_deref(), text);
        }

        let event = CaptureEvent {
            ts: Utc::now(),
            client: self.client,
            dst: Destination {
                host: self.target.host,
                port: self.target.port,
            },
            http: HttpInfo {
                scheme: Scheme::Http,
                method: self.method,
                path: Some(self.target.path),
                req: (!req.is_empty()).then_some(req),
                res: (!res.is_empty()).then_some(res),
            },
            obs: Observation {
                status: Some(self.status),
                latency_ms: elapsed.as_millis() as u64,
                bytes_in,
                bytes_out,
            },
        };

        self.state.commit(event);
    }
}

pub async fn handle(
    state: Arc<AppState>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, ProxyError> {
    let started = Instant::now();
    let config = state.config.clone();

    let client = ClientInfo {
        ip: peer.ip().to_string(),
        port: peer.port(),
        id: resolve_client_id(req.headers(), &config.default_client_id),
    };
    let method = req.method().as_str().to_uppercase();
    let target = resolve_target(&req.uri().to_string(), req.headers())?;

    state
        .policy
        .check(&target.host)
        .map_err(|reason| ProxyError::Policy { reason })?;

    let (parts, body) = req.into_parts();
    let req_headers = config
        .capture_http_headers
        .then(|| capture_headers(&parts.headers));
    let req_content_type = content_type(&parts.headers);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);
    let host_value = HeaderValue::from_str(&target.authority)
        .map_err(|_| ProxyError::Validation("bad request".to_string()))?;
    headers.insert(HOST, host_value);

    let req_tap = BodyTap::shared(config.capture_http_body_bytes);
    let mut upstream_req = Request::builder()
        .method(parts.method)
        .uri(target.path.as_str())
        .body(ObservedBody::new(body, req_tap.clone()))
        .map_err(|_| ProxyError::Validation("bad request".to_string()))?;
    *upstream_req.headers_mut() = headers;

    let stream = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .map_err(|e| {
            state.metrics.record_upstream_error(UPSTREAM_CONNECT);
            warn!(host = %target.host, port = target.port, "Upstream connect failed: {}", e);
            ProxyError::Upstream(e.to_string())
        })?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| {
            state.metrics.record_upstream_error(UPSTREAM_REQUEST);
            ProxyError::Upstream(e.to_string())
        })?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Upstream connection closed with error: {}", e);
        }
    });

    let response = sender.send_request(upstream_req).await.map_err(|e| {
        state.metrics.record_upstream_error(UPSTREAM_REQUEST);
        warn!(host = %target.host, "Upstream request failed: {}", e);
        ProxyError::Upstream(e.to_string())
    })?;

    let (mut parts, body) = response.into_parts();
    let res_headers = config
        .capture_http_headers
        .then(|| capture_headers(&parts.headers));
    let res_content_type = content_type(&parts.headers);
    strip_hop_by_hop(&mut parts.headers);

    debug!(
        client = %client.id,
        host = %target.host,
        method = %method,
        status = parts.status.as_u16(),
        "Relaying upstream response"
    );

    let res_tap = BodyTap::shared(config.capture_http_body_bytes);
    let exchange = Exchange {
        state: state.clone(),
        started,
        client,
        target,
        method,
        status: parts.status.as_u16(),
        req_headers,
        res_headers,
        req_content_type,
        res_content_type,
        req_tap,
        res_tap: res_tap.clone(),
    };

    let body = ObservedBody::new(body, res_tap)
        .on_complete(move || exchange.complete())
        .boxed_unsync();

    Ok(Response::from_parts(parts, body))
}
