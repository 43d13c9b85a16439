//! HTTP client for the management API.

use super::sse::SseDecoder;
use crate::events::StoredEvent;
use crate::filter::FilterError;
use crate::web::api::StatsResponse;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("http {status}")]
    Status { status: u16 },

    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error("failed to decode event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Page returned by `/api/events`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsPage {
    pub events: Vec<StoredEvent>,
    pub next_cursor: u64,
    #[serde(default)]
    pub dropped_total: u64,
}

/// Query parameters forwarded verbatim to the server. Empty values are
/// omitted.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub q: Option<String>,
    pub since: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<usize>,
}

impl QueryParams {
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        let mut push = |key: &'static str, value: Option<String>| {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                pairs.push((key, v));
            }
        };
        push("q", self.q.clone());
        push("since", self.since.clone());
        push("from", self.from.clone());
        push("to", self.to.clone());
        push("limit", self.limit.map(|l| l.to_string()));
        pairs
    }
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, CliError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str, params: &QueryParams) -> RequestBuilder {
        let request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(&params.pairs());
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, CliError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(CliError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    pub async fn events(&self, params: &QueryParams) -> Result<EventsPage, CliError> {
        let response = self.send(self.get("/api/events", params)).await?;
        Ok(response.json().await?)
    }

    pub async fn stats(&self, params: &QueryParams) -> Result<StatsResponse, CliError> {
        let response = self.send(self.get("/api/stats", params)).await?;
        Ok(response.json().await?)
    }

    /// Opens `/api/stream` and yields events until the server closes it.
    /// Frames that do not decode as events are skipped.
    pub async fn stream(
        &self,
        params: &QueryParams,
    ) -> Result<impl Stream<Item = Result<StoredEvent, CliError>>, CliError> {
        let response = self
            .send(self.get("/api/stream", params).header("accept", "text/event-stream"))
            .await?;

        let mut decoder = SseDecoder::new();
        let events = response.bytes_stream().flat_map(move |chunk| {
            let items: Vec<Result<StoredEvent, CliError>> = match chunk {
                Ok(bytes) => decoder
                    .push(&bytes)
                    .into_iter()
                    .filter_map(|frame| match serde_json::from_str(&frame.data) {
                        Ok(event) => Some(Ok(event)),
                        Err(e) => {
                            tracing::debug!("Skipping undecodable frame: {}", e);
                            None
                        }
                    })
                    .collect(),
                Err(e) => vec![Err(CliError::Request(e))],
            };
            futures::stream::iter(items)
        });
        Ok(events)
    }
}
