use crate::config::{Config, HostPolicy};
use crate::error::Result;
use crate::events::{CaptureEvent, EventStore, StoredEvent};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub mod metrics;

pub use metrics::Metrics;

const DROPPED_RECONCILE_INTERVAL: Duration = Duration::from_secs(2);

/// Bound state of the two listeners.
#[derive(Debug, Default)]
pub struct Readiness {
    proxy: AtomicBool,
    mgmt: AtomicBool,
}

impl Readiness {
    pub fn mark_proxy_ready(&self) {
        self.proxy.store(true, Ordering::SeqCst);
    }

    pub fn mark_mgmt_ready(&self) {
        self.mgmt.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.proxy.load(Ordering::SeqCst) && self.mgmt.load(Ordering::SeqCst)
    }
}

pub struct AppState {
    pub config: Arc<Config>,
    pub policy: HostPolicy,
    pub store: Arc<EventStore>,
    pub metrics: Arc<Metrics>,
    pub readiness: Readiness,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(config: Config) -> Result<(Arc<Self>, broadcast::Receiver<()>)> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
        let policy = HostPolicy::from_config(&config)?;

        let state = Arc::new(Self {
            store: Arc::new(EventStore::new(config.max_events)),
            config: Arc::new(config),
            policy,
            metrics: Arc::new(Metrics::new()),
            readiness: Readiness::default(),
            shutdown_tx,
        });

        Ok((state, shutdown_rx))
    }

    /// Bernoulli draw against the configured sample rate.
    pub fn should_sample(&self) -> bool {
        let rate = self.config.sample_rate;
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 {
            false
        } else {
            rand::thread_rng().gen::<f64>() < rate
        }
    }

    /// Stores a completed event if it survives sampling.
    pub fn commit(&self, event: CaptureEvent) -> Option<Arc<StoredEvent>> {
        if !self.should_sample() {
            debug!(host = %event.dst.host, "Event skipped by sampling");
            return None;
        }

        let stored = self.store.add(event);
        if self.config.log_events {
            match serde_json::to_string(stored.as_ref()) {
                Ok(line) => info!(target: "proxyglass::event", "{}", line),
                Err(e) => debug!("Failed to serialize event {}: {}", stored.cursor, e),
            }
        }
        Some(stored)
    }

    /// Adds store evictions since `last` to the dropped counter and returns
    /// the new baseline.
    pub fn reconcile_dropped(&self, last: u64) -> u64 {
        let current = self.store.dropped_total();
        self.metrics.record_dropped(current.saturating_sub(last));
        current
    }

    pub fn spawn_dropped_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let state = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(DROPPED_RECONCILE_INTERVAL);
            let mut last = 0;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        last = state.reconcile_dropped(last);
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Dropped-events reconciler stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientInfo, Destination, HttpInfo, Observation, Scheme};
    use chrono::Utc;

    fn state_with(config: Config) -> Arc<AppState> {
        AppState::new(config).unwrap().0
    }

    fn event() -> CaptureEvent {
        CaptureEvent {
            ts: Utc::now(),
            client: ClientInfo {
                ip: "127.0.0.1".to_string(),
                port: 1,
                id: "c".to_string(),
            },
            dst: Destination {
                host: "h".to_string(),
                port: 80,
            },
            http: HttpInfo {
                scheme: Scheme::Http,
                method: "GET".to_string(),
                path: Some("/".to_string()),
                req: None,
                res: None,
            },
            obs: Observation {
                status: Some(200),
                latency_ms: 0,
                bytes_in: 0,
                bytes_out: 0,
            },
        }
    }

    #[test]
    fn test_sample_rate_extremes() {
        let never = state_with(Config {
            sample_rate: 0.0,
            ..Config::default()
        });
        assert!((0..100).all(|_| !never.should_sample()));
        assert!(never.commit(event()).is_none());
        assert!(never.store.is_empty());

        let always = state_with(Config::default());
        assert!((0..100).all(|_| always.should_sample()));
        assert_eq!(always.commit(event()).map(|e| e.cursor), Some(1));
    }

    #[test]
    fn test_reconcile_dropped_adds_delta() {
        let state = state_with(Config {
            max_events: 1,
            ..Config::default()
        });
        for _ in 0..4 {
            state.store.add(event());
        }

        let last = state.reconcile_dropped(0);
        assert_eq!(last, 3);
        assert_eq!(state.metrics.dropped_events_total.get(), 3);

        state.store.add(event());
        let last = state.reconcile_dropped(last);
        assert_eq!(last, 4);
        assert_eq!(state.metrics.dropped_events_total.get(), 4);
    }

    #[test]
    fn test_readiness_needs_both_listeners() {
        let readiness = Readiness::default();
        assert!(!readiness.is_ready());
        readiness.mark_proxy_ready();
        assert!(!readiness.is_ready());
        readiness.mark_mgmt_ready();
        assert!(readiness.is_ready());
    }

    #[test]
    fn test_invalid_policy_fails_construction() {
        let result = AppState::new(Config {
            allow_host_regex: Some("[".to_string()),
            ..Config::default()
        });
        assert!(result.is_err());
    }
}
