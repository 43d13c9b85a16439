#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::Config;
    use crate::events::{CaptureEvent, ClientInfo, Destination, HttpInfo, Observation, Scheme};
    use crate::web::query::ApiParams;
    use crate::web::stream::start_cursor;
    use chrono::Utc;
    use serde_json::Value;
    use std::time::Duration;
    use warp::test::request;

    fn create_test_state(config: Config) -> Arc<AppState> {
        let (state, _) = AppState::new(config).unwrap();
        state
    }

    fn event(host: &str, client: &str, status: Option<u16>) -> CaptureEvent {
        let (scheme, method, path) = match status {
            Some(_) => (Scheme::Http, "GET", Some("/index".to_string())),
            None => (Scheme::Https, "CONNECT", None),
        };
        CaptureEvent {
            ts: Utc::now(),
            client: ClientInfo {
                ip: "10.1.1.1".to_string(),
                port: 50000,
                id: client.to_string(),
            },
            dst: Destination {
                host: host.to_string(),
                port: if status.is_some() { 80 } else { 443 },
            },
            http: HttpInfo {
                scheme,
                method: method.to_string(),
                path,
                req: None,
                res: None,
            },
            obs: Observation {
                status,
                latency_ms: 3,
                bytes_in: 100,
                bytes_out: 20,
            },
        }
    }

    fn token_config(token: Option<&str>) -> Config {
        Config {
            require_token: true,
            token: token.map(str::to_string),
            ..Config::default()
        }
    }

    fn json_body(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    fn cursors(body: &Value) -> Vec<u64> {
        body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["cursor"].as_u64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_healthz() {
        let routes = routes(create_test_state(Config::default()));
        let resp = request().method("GET").path("/healthz").reply(&routes).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.body(), "ok\n");
    }

    #[tokio::test]
    async fn test_readyz_tracks_both_listeners() {
        let state = create_test_state(Config::default());
        let routes = routes(state.clone());

        let resp = request().method("GET").path("/readyz").reply(&routes).await;
        assert_eq!(resp.status(), 503);
        assert_eq!(resp.body(), "not ready\n");

        state.readiness.mark_proxy_ready();
        state.readiness.mark_mgmt_ready();
        let resp = request().method("GET").path("/readyz").reply(&routes).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.body(), "ready\n");
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let routes = routes(create_test_state(Config::default()));
        let resp = request().method("GET").path("/nope").reply(&routes).await;
        assert_eq!(resp.status(), 404);
        assert_eq!(resp.body(), "not found\n");
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let routes = routes(create_test_state(Config::default()));
        let resp = request().method("POST").path("/api/events").reply(&routes).await;
        assert_eq!(resp.status(), 405);
    }

    #[tokio::test]
    async fn test_token_required() {
        let routes = routes(create_test_state(token_config(Some("s3cret"))));

        let resp = request().method("GET").path("/api/events").reply(&routes).await;
        assert_eq!(resp.status(), 401);
        assert_eq!(resp.body(), "unauthorized\n");
        assert_eq!(resp.headers()["www-authenticate"], "Bearer");

        let resp = request()
            .method("GET")
            .path("/api/events")
            .header("authorization", "Bearer wrong")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), 401);

        let resp = request()
            .method("GET")
            .path("/api/events")
            .header("authorization", "bearer s3cret")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), 200);

        for path in ["/api/stats?token=s3cret", "/metrics?access_token=s3cret", "/ui?token=s3cret"] {
            let resp = request().method("GET").path(path).reply(&routes).await;
            assert_eq!(resp.status(), 200, "{path}");
        }

        let resp = request().method("GET").path("/healthz").reply(&routes).await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_required_token_without_configured_token_rejects_all() {
        let routes = routes(create_test_state(token_config(None)));
        for path in ["/api/events", "/api/events?token=", "/metrics?token=anything", "/ui"] {
            let resp = request().method("GET").path(path).reply(&routes).await;
            assert_eq!(resp.status(), 401, "{path}");
        }
    }

    #[tokio::test]
    async fn test_events_pagination() {
        let state = create_test_state(Config::default());
        for host in ["a.com", "b.com", "a.com"] {
            state.store.add(event(host, "app", Some(200)));
        }
        let routes = routes(state);

        let resp = request()
            .method("GET")
            .path("/api/events?limit=2")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), 200);
        let body = json_body(resp.body());
        assert_eq!(cursors(&body), vec![1, 2]);
        assert_eq!(body["next_cursor"], 3);
        assert_eq!(body["dropped_total"], 0);
        assert_eq!(body["events"][0]["dst"]["host"], "a.com");
        assert_eq!(body["events"][0]["http"]["scheme"], "http");

        let resp = request()
            .method("GET")
            .path("/api/events?since=3")
            .reply(&routes)
            .await;
        let body = json_body(resp.body());
        assert_eq!(cursors(&body), vec![3]);
        assert_eq!(body["next_cursor"], 4);
    }

    #[tokio::test]
    async fn test_events_filter_and_limit_zero() {
        let state = create_test_state(Config::default());
        state.store.add(event("a.com", "app", Some(200)));
        state.store.add(event("b.com", "app", Some(500)));
        state.store.add(event("a.com", "other", None));
        let routes = routes(state);

        let resp = request()
            .method("GET")
            .path("/api/events?q=host%3Da.com%20client%3Dapp")
            .reply(&routes)
            .await;
        assert_eq!(cursors(&json_body(resp.body())), vec![1]);

        let resp = request()
            .method("GET")
            .path("/api/events?q=status_class%3D5xx%20bogus")
            .reply(&routes)
            .await;
        assert_eq!(cursors(&json_body(resp.body())), vec![2]);

        let resp = request()
            .method("GET")
            .path("/api/events?limit=0")
            .reply(&routes)
            .await;
        let body = json_body(resp.body());
        assert!(cursors(&body).is_empty());
        assert_eq!(body["next_cursor"], 4);
    }

    #[tokio::test]
    async fn test_events_report_evictions() {
        let state = create_test_state(Config {
            max_events: 2,
            ..Config::default()
        });
        for _ in 0..3 {
            state.store.add(event("a.com", "app", Some(200)));
        }
        let routes = routes(state);

        let resp = request().method("GET").path("/api/events").reply(&routes).await;
        let body = json_body(resp.body());
        assert_eq!(cursors(&body), vec![2, 3]);
        assert_eq!(body["next_cursor"], 4);
        assert_eq!(body["dropped_total"], 1);
    }

    #[tokio::test]
    async fn test_events_time_window() {
        let state = create_test_state(Config::default());
        state.store.add(event("a.com", "app", Some(200)));
        let routes = routes(state);

        let resp = request()
            .method("GET")
            .path("/api/events?from=2999-01-01")
            .reply(&routes)
            .await;
        assert!(cursors(&json_body(resp.body())).is_empty());

        let resp = request()
            .method("GET")
            .path("/api/events?since=1h")
            .reply(&routes)
            .await;
        assert_eq!(cursors(&json_body(resp.body())), vec![1]);
    }

    #[tokio::test]
    async fn test_stats() {
        let state = create_test_state(Config::default());
        state.store.add(event("b.com", "app", Some(200)));
        state.store.add(event("a.com", "app", Some(404)));
        state.store.add(event("a.com", "ops", Some(201)));
        state.store.add(event("c.com", "ops", None));
        state.store.add(event("b.com", "ops", Some(204)));
        let routes = routes(state);

        let resp = request().method("GET").path("/api/stats").reply(&routes).await;
        assert_eq!(resp.status(), 200);
        let raw = String::from_utf8(resp.body().to_vec()).unwrap();
        let body: Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(body["total"], 5);
        assert_eq!(body["dropped_total"], 0);
        assert_eq!(
            body["top_hosts"],
            serde_json::json!([
                {"host": "b.com", "count": 2},
                {"host": "a.com", "count": 2},
                {"host": "c.com", "count": 1},
            ])
        );
        assert_eq!(
            body["top_clients"],
            serde_json::json!([
                {"client_id": "ops", "count": 3},
                {"client_id": "app", "count": 2},
            ])
        );
        assert!(raw.contains(r#""status_distribution":{"2xx":3,"4xx":1,"connect":1}"#));

        let resp = request()
            .method("GET")
            .path("/api/stats?q=client%3Dapp")
            .reply(&routes)
            .await;
        let body = json_body(resp.body());
        assert_eq!(body["total"], 2);
    }

    #[tokio::test]
    async fn test_metrics_and_ui() {
        let state = create_test_state(Config::default());
        state.metrics.record_connect("app", "a.com", 443);
        let routes = routes(state);

        let resp = request().method("GET").path("/metrics").reply(&routes).await;
        assert_eq!(resp.status(), 200);
        let text = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(text.contains("proxyglass_https_connect_total"));

        let resp = request().method("GET").path("/ui").reply(&routes).await;
        assert_eq!(resp.status(), 200);
        assert!(String::from_utf8_lossy(resp.body()).contains("/api/stream"));
    }

    #[test]
    fn test_stream_start_cursor() {
        let params = ApiParams {
            since: Some("5".to_string()),
            ..Default::default()
        };
        assert_eq!(start_cursor(&params, None), Some(5));
        assert_eq!(start_cursor(&params, Some("9")), Some(10));
        assert_eq!(start_cursor(&params, Some("junk")), Some(5));
        assert_eq!(start_cursor(&ApiParams::default(), None), None);
        assert_eq!(start_cursor(&params, Some("18446744073709551615")), None);
        assert_eq!(
            start_cursor(&ApiParams::default(), Some("18446744073709551614")),
            Some(u64::MAX)
        );

        let duration = ApiParams {
            since: Some("5m".to_string()),
            ..Default::default()
        };
        assert_eq!(start_cursor(&duration, None), None);
    }

    fn sse_ids(body: &str) -> Vec<u64> {
        body.lines()
            .filter_map(|l| l.strip_prefix("id:"))
            .map(|id| id.trim().parse().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_stream_replays_then_goes_live() {
        let state = create_test_state(Config::default());
        state.store.add(event("a.com", "app", Some(200)));
        state.store.add(event("b.com", "app", Some(200)));
        state.store.add(event("a.com", "app", Some(200)));
        let routes = routes(state.clone());

        let driver = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            state.store.add(event("b.com", "app", Some(200)));
            state.store.add(event("a.com", "app", Some(200)));
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = state.shutdown_tx.send(());
        };
        let reply = request()
            .method("GET")
            .path("/api/stream?since=2&q=host%3Da.com")
            .reply(&routes);

        let (resp, ()) = tokio::join!(reply, driver);
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "text/event-stream");

        let body = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(body.starts_with(":ok\n"));
        assert_eq!(sse_ids(&body), vec![3, 5]);
        assert!(body.contains("data:{\"cursor\":3"));
        assert_eq!(state.store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_resumes_after_last_event_id() {
        let state = create_test_state(Config::default());
        for _ in 0..4 {
            state.store.add(event("a.com", "app", Some(200)));
        }
        let routes = routes(state.clone());

        let driver = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = state.shutdown_tx.send(());
        };
        let reply = request()
            .method("GET")
            .path("/api/stream?since=1")
            .header("last-event-id", "2")
            .reply(&routes);

        let (resp, ()) = tokio::join!(reply, driver);
        let body = String::from_utf8(resp.body().to_vec()).unwrap();
        assert_eq!(sse_ids(&body), vec![3, 4]);
    }
}
