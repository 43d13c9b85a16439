/// Benchmarks for the query hot paths: filter compilation and matching, and
/// store insertion and filtered queries over a full ring.
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use proxyglass::events::{
    CaptureEvent, ClientInfo, Destination, EventQuery, EventStore, HttpInfo, Observation, Scheme,
};
use proxyglass::filter::{compile_permissive, compile_strict};
use std::sync::Arc;

fn event(i: usize) -> CaptureEvent {
    CaptureEvent {
        ts: Utc::now(),
        client: ClientInfo {
            ip: "10.0.0.1".to_string(),
            port: 40000,
            id: format!("client-{}", i % 8),
        },
        dst: Destination {
            host: format!("host-{}.example.com", i % 32),
            port: 80,
        },
        http: HttpInfo {
            scheme: Scheme::Http,
            method: if i % 3 == 0 { "POST" } else { "GET" }.to_string(),
            path: Some(format!("/api/v1/items/{i}")),
            req: None,
            res: None,
        },
        obs: Observation {
            status: Some(if i % 10 == 0 { 503 } else { 200 }),
            latency_ms: (i % 250) as u64,
            bytes_in: 1024,
            bytes_out: 128,
        },
    }
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("Filter");
    let query = r#"host=host-3.example.com method=get status_class=2xx path_contains="/api/v1""#;

    group.bench_function("compile_strict", |b| {
        b.iter(|| black_box(compile_strict(black_box(query))))
    });

    group.bench_function("compile_permissive_with_junk", |b| {
        b.iter(|| black_box(compile_permissive(black_box(Some("nope host=a.com x=1 status=abc")))))
    });

    let filter = compile_permissive(Some(query));
    let events: Vec<CaptureEvent> = (0..1000).map(event).collect();
    group.bench_function("match_1000", |b| {
        b.iter(|| black_box(events.iter().filter(|e| filter.matches(e)).count()))
    });

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("EventStore");

    group.bench_function("add_with_eviction", |b| {
        let store = EventStore::new(1000);
        let mut i = 0;
        b.iter(|| {
            i += 1;
            black_box(store.add(event(i)))
        });
    });

    for capacity in [1_000usize, 5_000, 50_000] {
        let store = Arc::new(EventStore::new(capacity));
        for i in 0..capacity {
            store.add(event(i));
        }
        let filter = compile_permissive(Some("status_class=5xx"));
        let query = EventQuery {
            limit: 200,
            ..Default::default()
        };

        group.bench_with_input(BenchmarkId::new("filtered_query", capacity), &capacity, |b, _| {
            b.iter(|| black_box(store.query(&query, |e| filter.matches(e))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_filter, bench_store);
criterion_main!(benches);
