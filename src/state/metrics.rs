use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

pub struct Metrics {
    registry: Registry,

    // HTTP exchanges
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,

    // CONNECT tunnels
    pub https_connect_total: IntCounterVec,

    pub bytes_total: IntCounterVec,
    pub dropped_events_total: IntCounter,
    pub upstream_errors_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "proxyglass_http_requests_total",
                "Total proxied HTTP requests observed by proxyglass",
            ),
            &["client_id", "host", "method", "status_class"],
        )
        .expect("metric creation failed");
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "proxyglass_http_request_duration_seconds",
                "Observed HTTP request duration in seconds",
            ),
            &["client_id", "host", "method", "status_class"],
        )
        .expect("metric creation failed");

        let https_connect_total = IntCounterVec::new(
            Opts::new(
                "proxyglass_https_connect_total",
                "Total HTTPS CONNECT tunnels observed by proxyglass",
            ),
            &["client_id", "host", "port"],
        )
        .expect("metric creation failed");

        let bytes_total = IntCounterVec::new(
            Opts::new(
                "proxyglass_bytes_total",
                "Observed bytes by direction (in=dst->client, out=client->dst)",
            ),
            &["client_id", "direction"],
        )
        .expect("metric creation failed");
        let dropped_events_total = IntCounter::new(
            "proxyglass_dropped_events_total",
            "Events dropped from the in-memory store by ring buffer overwrite",
        )
        .expect("metric creation failed");
        let upstream_errors_total = IntCounterVec::new(
            Opts::new(
                "proxyglass_upstream_errors_total",
                "Upstream connection or transport failures",
            ),
            &["kind"],
        )
        .expect("metric creation failed");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(http_request_duration.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(https_connect_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(bytes_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(dropped_events_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(upstream_errors_total.clone()))
            .expect("metric registration failed");

        Self {
            registry,
            http_requests_total,
            http_request_duration,
            https_connect_total,
            bytes_total,
            dropped_events_total,
            upstream_errors_total,
        }
    }

    pub fn record_http(
        &self,
        client_id: &str,
        host: &str,
        method: &str,
        status: Option<u16>,
        duration: Duration,
    ) {
        let class = metric_status_class(status);
        let labels = [client_id, host, method, class.as_str()];
        self.http_requests_total.with_label_values(&labels).inc();
        self.http_request_duration
            .with_label_values(&labels)
            .observe(duration.as_secs_f64());
    }

    pub fn record_connect(&self, client_id: &str, host: &str, port: u16) {
        self.https_connect_total
            .with_label_values(&[client_id, host, &port.to_string()])
            .inc();
    }

    pub fn record_bytes(&self, client_id: &str, bytes_in: u64, bytes_out: u64) {
        self.bytes_total
            .with_label_values(&[client_id, "in"])
            .inc_by(bytes_in);
        self.bytes_total
            .with_label_values(&[client_id, "out"])
            .inc_by(bytes_out);
    }

    pub fn record_dropped(&self, delta: u64) {
        if delta > 0 {
            self.dropped_events_total.inc_by(delta);
        }
    }

    pub fn record_upstream_error(&self, kind: &str) {
        self.upstream_errors_total.with_label_values(&[kind]).inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Status class label; a missing status is `0xx`.
pub fn metric_status_class(status: Option<u16>) -> String {
    match status {
        Some(s) if s > 0 => format!("{}xx", s / 100),
        _ => "0xx".to_string(),
    }
}
