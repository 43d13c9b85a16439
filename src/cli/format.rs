use crate::events::StoredEvent;
use crate::web::api::StatsResponse;
use chrono::SecondsFormat;
use std::fmt::Write;

/// One-line human rendering of an event.
pub fn pretty(event: &StoredEvent) -> String {
    let mut line = format!(
        "{} {}@{} -> {} {} {}:{}",
        event.ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        event.client.id,
        event.client.ip,
        event.http.scheme,
        event.http.method,
        event.dst.host,
        event.dst.port,
    );
    if let Some(path) = &event.http.path {
        let _ = write!(line, " {path}");
    }
    if let Some(status) = event.obs.status {
        let _ = write!(line, " {status}");
    }
    let _ = write!(
        line,
        " {}ms in={} out={}",
        event.obs.latency_ms, event.obs.bytes_in, event.obs.bytes_out
    );
    line
}

pub fn render_stats(stats: &StatsResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "total: {}", stats.total);
    let _ = writeln!(out, "dropped_total: {}", stats.dropped_total);

    let _ = writeln!(out, "\nTop hosts:");
    for h in &stats.top_hosts {
        let _ = writeln!(out, "  {}\t{}", h.count, h.host);
    }
    let _ = writeln!(out, "\nTop clients:");
    for c in &stats.top_clients {
        let _ = writeln!(out, "  {}\t{}", c.count, c.client_id);
    }
    let _ = writeln!(out, "\nStatus distribution:");
    for (class, count) in &stats.status_distribution.0 {
        let _ = writeln!(out, "  {count}\t{class}");
    }
    out
}
