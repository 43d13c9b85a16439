//! CONNECT tunnelling.
//!
//! Tunnels are opaque: bytes are relayed and counted in each direction, and a
//! single event is committed when the tunnel closes.

use super::identity::resolve_client_id;
use super::{empty_body, ProxyBody, UPSTREAM_CONNECT};
use crate::error::ProxyError;
use crate::events::{CaptureEvent, ClientInfo, Destination, HttpInfo, Observation, Scheme};
use crate::state::AppState;
use chrono::Utc;
use http::{Request, Response, StatusCode, Uri};
use hyper::body::Incoming;
use hyper::ext::ReasonPhrase;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Parses a CONNECT authority. The port is mandatory and non-zero.
pub fn parse_authority(uri: &Uri) -> Result<(String, u16), ProxyError> {
    let bad_request = || ProxyError::Validation("bad request".to_string());

    let authority = uri.authority().ok_or_else(bad_request)?;
    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    let port = authority.port_u16().filter(|p| *p > 0).ok_or_else(bad_request)?;
    if host.is_empty() {
        return Err(bad_request());
    }
    Ok((host.to_string(), port))
}

/// Fires the tunnel completion exactly once, whichever side finishes first.
pub struct TunnelGuard {
    fired: AtomicBool,
}

impl TunnelGuard {
    pub fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Returns true only for the first caller.
    pub fn fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for TunnelGuard {
    fn default() -> Self {
        Self::new()
    }
}

struct Tunnel {
    state: Arc<AppState>,
    started: Instant,
    client: ClientInfo,
    host: String,
    port: u16,
    guard: TunnelGuard,
}

impl Tunnel {
    async fn run<C>(&self, client: C, upstream: TcpStream)
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut upstream_read, mut upstream_write) = upstream.into_split();
        let mut bytes_out = 0u64;
        let mut bytes_in = 0u64;

        let grace = Duration::from_secs(self.state.config.shutdown_grace_secs);
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();

        tokio::select! {
            res = copy_counting(&mut client_read, &mut upstream_write, &mut bytes_out) => {
                if let Err(e) = res {
                    debug!(host = %self.host, "Tunnel client side closed with error: {}", e);
                }
            }
            res = copy_counting(&mut upstream_read, &mut client_write, &mut bytes_in) => {
                if let Err(e) = res {
                    debug!(host = %self.host, "Tunnel upstream side closed with error: {}", e);
                }
            }
            _ = async {
                let _ = shutdown_rx.recv().await;
                tokio::time::sleep(grace).await;
            } => {
                debug!(host = %self.host, "Closing tunnel after shutdown grace period");
            }
        }

        self.finish(bytes_in, bytes_out);
    }

    fn finish(&self, bytes_in: u64, bytes_out: u64) {
        if !self.guard.fire() {
            return;
        }

        let metrics = &self.state.metrics;
        metrics.record_connect(&self.client.id, &self.host, self.port);
        metrics.record_bytes(&self.client.id, bytes_in, bytes_out);

        let event = CaptureEvent {
            ts: Utc::now(),
            client: self.client.clone(),
            dst: Destination {
                host: self.host.clone(),
                port: self.port,
            },
            http: HttpInfo {
                scheme: Scheme::Https,
                method: "CONNECT".to_string(),
                path: None,
                req: None,
                res: None,
            },
            obs: Observation {
                status: None,
                latency_ms: self.started.elapsed().as_millis() as u64,
                bytes_in,
                bytes_out,
            },
        };
        self.state.commit(event);
    }
}

/// Copies until EOF or error, counting bytes written. EOF is propagated as a
/// write shutdown.
async fn copy_counting<R, W>(reader: &mut R, writer: &mut W, counter: &mut u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        *counter += n as u64;
    }
}

pub async fn handle(
    state: Arc<AppState>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, ProxyError> {
    let started = Instant::now();
    let client = ClientInfo {
        ip: peer.ip().to_string(),
        port: peer.port(),
        id: resolve_client_id(req.headers(), &state.config.default_client_id),
    };

    let (host, port) = parse_authority(req.uri())?;
    state
        .policy
        .check(&host)
        .map_err(|reason| ProxyError::Policy { reason })?;

    let upstream = TcpStream::connect((host.as_str(), port)).await.map_err(|e| {
        state.metrics.record_upstream_error(UPSTREAM_CONNECT);
        warn!(host = %host, port, "CONNECT upstream failed: {}", e);
        ProxyError::Upstream(e.to_string())
    })?;

    debug!(client = %client.id, host = %host, port, "Tunnel established");

    let tunnel = Tunnel {
        state,
        started,
        client,
        host,
        port,
        guard: TunnelGuard::new(),
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => tunnel.run(TokioIo::new(upgraded), upstream).await,
            Err(e) => {
                debug!(host = %tunnel.host, "Client upgrade failed: {}", e);
                tunnel.finish(0, 0);
            }
        }
    });

    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::OK;
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection Established"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authority() {
        let uri: Uri = "example.com:443".parse().unwrap();
        assert_eq!(parse_authority(&uri).unwrap(), ("example.com".to_string(), 443));

        let uri: Uri = "[::1]:8443".parse().unwrap();
        assert_eq!(parse_authority(&uri).unwrap(), ("::1".to_string(), 8443));
    }

    #[test]
    fn test_parse_authority_requires_port() {
        let uri: Uri = "example.com".parse().unwrap();
        assert_eq!(parse_authority(&uri).unwrap_err().status(), 400);

        let uri: Uri = "example.com:0".parse().unwrap();
        assert_eq!(parse_authority(&uri).unwrap_err().status(), 400);
    }

    #[test]
    fn test_guard_fires_once() {
        let guard = TunnelGuard::new();
        assert!(guard.fire());
        assert!(!guard.fire());
        assert!(!guard.fire());
    }

    #[tokio::test]
    async fn test_copy_counting_until_eof() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut sink = Vec::new();
        let mut count = 0;

        a.write_all(b"hello world").await.unwrap();
        drop(a);
        copy_counting(&mut b, &mut sink, &mut count).await.unwrap();

        assert_eq!(sink, b"hello world");
        assert_eq!(count, 11);
    }
}
