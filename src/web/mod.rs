use crate::error::{ProxyError, Result};
use crate::state::AppState;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub mod api;
pub mod query;
pub mod stream;

const UI_HTML: &str = include_str!("ui.html");

/// Binds the management listener, marks it ready and serves until the
/// shutdown broadcast.
pub async fn start_server(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let routes = routes(state.clone());
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown_rx.recv().await;
        })
        .map_err(|e| ProxyError::Io(std::io::Error::other(e)))?;

    state.readiness.mark_mgmt_ready();
    tracing::info!("Management server listening on {}", bound);

    let handle = tokio::spawn(async move {
        server.await;
        tracing::info!("Management server stopped");
    });

    Ok((bound, handle))
}

pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let healthz = warp::path!("healthz")
        .and(warp::get())
        .map(|| text(StatusCode::OK, "ok\n"));

    let readyz = warp::path!("readyz")
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|state: Arc<AppState>| {
            if state.readiness.is_ready() {
                text(StatusCode::OK, "ready\n")
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "not ready\n")
            }
        });

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(authorized(state.clone()))
        .and(with_state(state.clone()))
        .map(|state: Arc<AppState>| {
            warp::reply::with_header(
                state.metrics.render(),
                "content-type",
                "text/plain; version=0.0.4; charset=utf-8",
            )
        });

    let ui = warp::path!("ui")
        .and(warp::get())
        .and(authorized(state.clone()))
        .map(|| warp::reply::html(UI_HTML));

    healthz
        .or(readyz)
        .or(metrics)
        .or(ui)
        .or(api::routes(state))
        .recover(handle_rejection)
}

pub(crate) fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Requires the configured token when `require_token` is set. The token may
/// come from `Authorization: Bearer`, `?token=` or `?access_token=`.
pub(crate) fn authorized(
    state: Arc<AppState>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state(state))
        .and_then(
            |header: Option<String>, query: HashMap<String, String>, state: Arc<AppState>| async move {
                let config = &state.config;
                if !config.require_token {
                    return Ok(());
                }
                let Some(expected) = config.token.as_deref() else {
                    return Err(warp::reject::custom(AuthError::token_not_configured()));
                };
                match presented_token(header.as_deref(), &query) {
                    Some(got) if got == expected => Ok(()),
                    Some(_) => Err(warp::reject::custom(AuthError::invalid_token())),
                    None => Err(warp::reject::custom(AuthError::missing_token())),
                }
            },
        )
        .untuple_one()
}

fn presented_token(header: Option<&str>, query: &HashMap<String, String>) -> Option<String> {
    let bearer = header.and_then(|h| {
        let (scheme, rest) = h.trim().split_once(char::is_whitespace)?;
        scheme
            .eq_ignore_ascii_case("bearer")
            .then(|| rest.trim().to_string())
    });

    bearer
        .or_else(|| query.get("token").cloned())
        .or_else(|| query.get("access_token").cloned())
        .filter(|t| !t.is_empty())
}

#[derive(Debug)]
struct AuthError {
    kind: AuthErrorKind,
}

#[derive(Debug)]
enum AuthErrorKind {
    MissingToken,
    InvalidToken,
    TokenNotConfigured,
}

impl AuthError {
    fn missing_token() -> Self {
        Self {
            kind: AuthErrorKind::MissingToken,
        }
    }

    fn invalid_token() -> Self {
        Self {
            kind: AuthErrorKind::InvalidToken,
        }
    }

    fn token_not_configured() -> Self {
        Self {
            kind: AuthErrorKind::TokenNotConfigured,
        }
    }
}

impl warp::reject::Reject for AuthError {}

fn text(status: StatusCode, body: &'static str) -> warp::reply::Response {
    warp::reply::with_status(
        warp::reply::with_header(body, "content-type", "text/plain; charset=utf-8"),
        status,
    )
    .into_response()
}

async fn handle_rejection(err: Rejection) -> std::result::Result<warp::reply::Response, Infallible> {
    if let Some(auth) = err.find::<AuthError>() {
        tracing::debug!("Rejected management request: {:?}", auth.kind);
        let reply = text(StatusCode::UNAUTHORIZED, "unauthorized\n");
        return Ok(warp::reply::with_header(reply, "www-authenticate", "Bearer").into_response());
    }

    let response = if err.is_not_found() {
        text(StatusCode::NOT_FOUND, "not found\n")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n")
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        text(StatusCode::BAD_REQUEST, "bad request\n")
    } else {
        tracing::warn!("Unhandled rejection: {:?}", err);
        text(StatusCode::INTERNAL_SERVER_ERROR, "internal error\n")
    };

    Ok(response)
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod api_tests;
