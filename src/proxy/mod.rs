//! Forward proxy listener.
//!
//! Each accepted connection is served by hyper's HTTP/1 server with upgrades
//! enabled. `CONNECT` requests become tunnels, everything else is forwarded
//! to the destination named by the request target.

use crate::error::{ProxyError, Result};
use crate::state::AppState;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod body;
pub mod connect;
pub mod forward;
pub mod identity;

pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// `kind` label values for upstream failures.
pub const UPSTREAM_CONNECT: &str = "connect";
pub const UPSTREAM_REQUEST: &str = "request";

pub struct ProxyServer {
    state: Arc<AppState>,
}

impl ProxyServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Binds the listener, marks the proxy ready and spawns the accept loop.
    /// The loop stops on the shutdown broadcast.
    pub async fn bind(self, addr: SocketAddr) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        self.state.readiness.mark_proxy_ready();
        info!("Proxy listening on {}", local_addr);

        let handle = tokio::spawn(self.run(listener));
        Ok((local_addr, handle))
    }

    async fn run(self, listener: TcpListener) {
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_connection(self.state.clone(), stream, peer));
                    }
                    Err(e) => {
                        warn!("Failed to accept proxy connection: {}", e);
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Proxy listener stopping");
                    break;
                }
            }
        }
    }
}

async fn serve_connection(state: Arc<AppState>, stream: TcpStream, peer: SocketAddr) {
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let grace = Duration::from_secs(state.config.shutdown_grace_secs);

    let service = service_fn(move |req| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(handle_request(state, peer, req).await) }
    });

    let conn = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        res = conn.as_mut() => {
            if let Err(e) = res {
                debug!("Error serving proxy connection from {}: {}", peer, e);
            }
        }
        _ = shutdown_rx.recv() => {
            conn.as_mut().graceful_shutdown();
            match tokio::time::timeout(grace, conn.as_mut()).await {
                Ok(Err(e)) => debug!("Proxy connection from {} ended with error: {}", peer, e),
                Ok(Ok(())) => {}
                Err(_) => debug!("Dropping proxy connection from {} after grace period", peer),
            }
        }
    }
}

/// Dispatches a proxy request and turns failures into plain-text responses.
pub async fn handle_request(
    state: Arc<AppState>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> Response<ProxyBody> {
    let result = if req.method() == Method::CONNECT {
        connect::handle(state, peer, req).await
    } else {
        forward::handle(state, peer, req).await
    };

    result.unwrap_or_else(|e| {
        debug!(client = %peer, "Proxy request rejected: {}", e);
        error_response(&e)
    })
}

pub fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let body = match err {
        ProxyError::Validation(msg) => msg.clone(),
        ProxyError::Upstream(_) => "bad gateway".to_string(),
        other => other.to_string(),
    };
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    text_response(status, body)
}

pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(
        Full::new(body.into())
            .map_err(|never| match never {})
            .boxed_unsync(),
    );
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

pub fn empty_body() -> ProxyBody {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolicyReason;

    async fn body_text(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_error_response_bodies() {
        let policy = error_response(&ProxyError::Policy {
            reason: PolicyReason::DenyHostRegex,
        });
        assert_eq!(policy.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(policy).await, "blocked by DENY_HOST_REGEX");

        let upstream = error_response(&ProxyError::Upstream("connection refused".into()));
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_text(upstream).await, "bad gateway");

        let invalid = error_response(&ProxyError::Validation("bad request".into()));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            invalid.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain"
        );
        assert_eq!(body_text(invalid).await, "bad request");
    }
}
