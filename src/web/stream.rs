//! Replay-then-live event stream over Server-Sent Events.
//!
//! The store subscription is registered before the replay scan, so nothing
//! committed in between is missed; live events at or below the last replayed
//! cursor are discarded. Each client gets a bounded channel. When it fills up
//! the client is disconnected and is expected to resume with `Last-Event-ID`.

use super::query::ApiParams;
use super::{authorized, with_state};
use crate::events::{EventQuery, StoredEvent, MAX_QUERY_LIMIT};
use crate::state::AppState;
use futures::{future, stream, StreamExt};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use warp::sse::Event;
use warp::{Filter, Rejection, Reply};

/// Per-subscriber buffer of live events.
pub const LIVE_BUFFER: usize = 1024;

pub fn route(state: Arc<AppState>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "stream")
        .and(warp::get())
        .and(authorized(state.clone()))
        .and(warp::query::<ApiParams>())
        .and(warp::header::optional::<String>("last-event-id"))
        .and(with_state(state))
        .and_then(stream_events)
}

fn to_sse(event: &StoredEvent) -> Result<Event, serde_json::Error> {
    Event::default()
        .id(event.cursor.to_string())
        .json_data(event)
}

/// Cursor to resume from: `Last-Event-ID + 1` wins over `since`. An id with
/// no successor cursor resumes nothing.
pub fn start_cursor(params: &ApiParams, last_event_id: Option<&str>) -> Option<u64> {
    match last_event_id.and_then(|id| id.trim().parse::<u64>().ok()) {
        Some(id) => id.checked_add(1),
        None => params.stream_cursor(),
    }
}

async fn stream_events(
    params: ApiParams,
    last_event_id: Option<String>,
    state: Arc<AppState>,
) -> Result<impl Reply, Infallible> {
    let filter = params.filter();
    let cursor = start_cursor(&params, last_event_id.as_deref());

    let (tx, rx) = mpsc::channel::<Arc<StoredEvent>>(LIVE_BUFFER);
    let sender = Mutex::new(Some(tx));
    let live_filter = filter.clone();
    let subscription = state.store.subscribe(move |event| {
        let mut slot = sender.lock();
        let Some(tx) = slot.as_ref() else {
            return;
        };
        if !live_filter.matches(event) {
            return;
        }
        match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(cursor = event.cursor, "Stream subscriber lagging; disconnecting");
                *slot = None;
            }
            Err(TrySendError::Closed(_)) => {
                *slot = None;
            }
        }
    });

    let mut replayed = Vec::new();
    if let Some(start) = cursor {
        let mut query = EventQuery {
            since_cursor: Some(start),
            limit: MAX_QUERY_LIMIT,
            ..Default::default()
        };
        loop {
            let page = state.store.query(&query, |ev| filter.matches(ev));
            let full_page = page.events.len() >= MAX_QUERY_LIMIT;
            replayed.extend(page.events);
            if !full_page {
                break;
            }
            query.since_cursor = Some(page.next_cursor);
        }
    }

    let replay_high = replayed.last().map(|ev| ev.cursor).unwrap_or(0);
    let floor = cursor.unwrap_or(0);
    debug!(
        start = ?cursor,
        replayed = replayed.len(),
        "Stream client connected"
    );

    let opening = stream::once(future::ready(Ok::<_, serde_json::Error>(
        Event::default().comment("ok"),
    )));
    let replay = stream::iter(replayed).map(|ev| to_sse(&ev));
    let live = ReceiverStream::new(rx)
        .filter(move |ev| future::ready(ev.cursor > replay_high && ev.cursor >= floor))
        .map(move |ev| {
            // Dropping the stream drops the subscription.
            let _keep = &subscription;
            to_sse(&ev)
        });

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let events = opening.chain(replay).chain(live).take_until(async move {
        let _ = shutdown_rx.recv().await;
    });

    Ok(warp::sse::reply(warp::sse::keep_alive().stream(events)))
}
