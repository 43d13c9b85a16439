use super::query::ApiParams;
use super::{authorized, with_state};
use crate::events::{status_class, EventQuery, EventStore, StoredEvent};
use crate::filter::CompiledFilter;
use crate::state::AppState;
use chrono::Utc;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

const TOP_N: usize = 20;

pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let events = warp::path!("api" / "events")
        .and(warp::get())
        .and(authorized(state.clone()))
        .and(warp::query::<ApiParams>())
        .and(with_state(state.clone()))
        .and_then(list_events);

    let stats = warp::path!("api" / "stats")
        .and(warp::get())
        .and(authorized(state.clone()))
        .and(warp::query::<ApiParams>())
        .and(with_state(state.clone()))
        .and_then(get_stats);

    let stream = super::stream::route(state);

    events.or(stats).or(stream)
}

#[derive(Debug, Serialize)]
pub struct EventsResponse<'a> {
    pub events: Vec<&'a StoredEvent>,
    pub next_cursor: u64,
    pub dropped_total: u64,
}

async fn list_events(params: ApiParams, state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    let filter = params.filter();
    let query = params.event_query(Utc::now());
    let result = state.store.query(&query, |ev| filter.matches(ev));

    let response = EventsResponse {
        events: result.events.iter().map(|e| e.as_ref()).collect(),
        next_cursor: result.next_cursor,
        dropped_total: result.dropped_total,
    };
    Ok(warp::reply::json(&response))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCount {
    pub host: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCount {
    pub client_id: String,
    pub count: u64,
}

/// Status classes in descending count order. Serialized as a JSON object
/// whose key order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusDistribution(pub Vec<(String, u64)>);

impl Serialize for StatusDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (class, count) in &self.0 {
            map.serialize_entry(class, count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StatusDistribution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedCounts;

        impl<'de> Visitor<'de> for OrderedCounts {
            type Value = StatusDistribution;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of status class to count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut counts = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, u64>()? {
                    counts.push(entry);
                }
                Ok(StatusDistribution(counts))
            }
        }

        deserializer.deserialize_map(OrderedCounts)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total: usize,
    pub top_hosts: Vec<HostCount>,
    pub top_clients: Vec<ClientCount>,
    pub status_distribution: StatusDistribution,
    pub dropped_total: u64,
}

/// Counts keys in first-seen order, then sorts by descending count. The sort
/// is stable so ties keep first-seen order.
fn ranked<I: IntoIterator<Item = String>>(keys: I) -> Vec<(String, u64)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<(String, u64)> = Vec::new();
    for key in keys {
        match index.get(&key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(key.clone(), counts.len());
                counts.push((key, 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

pub fn compute_stats(store: &EventStore, query: &EventQuery, filter: &CompiledFilter) -> StatsResponse {
    let events: Vec<Arc<StoredEvent>> = store
        .all()
        .into_iter()
        .filter(|ev| query.admits(ev) && filter.matches(ev))
        .collect();

    let mut top_hosts = ranked(events.iter().map(|ev| ev.dst.host.clone()));
    top_hosts.truncate(TOP_N);
    let mut top_clients = ranked(events.iter().map(|ev| ev.client.id.clone()));
    top_clients.truncate(TOP_N);
    let statuses = ranked(events.iter().map(|ev| match ev.obs.status {
        Some(status) => status_class(status),
        None => "connect".to_string(),
    }));

    StatsResponse {
        total: events.len(),
        top_hosts: top_hosts
            .into_iter()
            .map(|(host, count)| HostCount { host, count })
            .collect(),
        top_clients: top_clients
            .into_iter()
            .map(|(client_id, count)| ClientCount { client_id, count })
            .collect(),
        status_distribution: StatusDistribution(statuses),
        dropped_total: store.dropped_total(),
    }
}

async fn get_stats(params: ApiParams, state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    let filter = params.filter();
    let query = params.event_query(Utc::now());
    Ok(warp::reply::json(&compute_stats(&state.store, &query, &filter)))
}
