/// Integration tests for the data layer and the orchestration built on it
///
/// These tests drive the full flow from scheduler tick through the response
/// cache to component fan-out, using a scripted transport and tokio's paused
/// clock. The HTTP transport is exercised against a local socket.

#[cfg(test)]
mod integration_tests {
    use super::super::*;
    use crate::context::{RefreshContext, RefreshContextBuilder};
    use crate::data_sync::transport::mock::MockTransport;
    use crate::logic::capabilities::Component;
    use crate::logic::capabilities::testing::{Failure, RecordingWidget};
    use crate::logic::registry::RefreshOptions;
    use crate::utils::constants::{Endpoint, INSIGHTS_ROOT, TaskName};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tokio::time::Duration;

    fn dashboard(transport: &Arc<MockTransport>) -> RefreshContext {
        RefreshContextBuilder::new()
            .with_config(RefreshConfig::default())
            .with_transport(transport.clone())
            .build()
            .unwrap()
    }

    fn scripted_backend() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.respond(INSIGHTS_ROOT, json!([{"id": 1}, {"id": 2}, {"id": 3}]));
        transport.respond("/api/insights/NASDAQ:AAPL", json!([{"id": 7}]));
        transport.respond(Endpoint::TASK_STATS, json!({"pending": 2, "running": 1, "completed": 40}));
        transport.respond(Endpoint::DELETE, json!({"success": true}));
        transport
    }

    #[tokio::test(start_paused = true)]
    async fn test_dashboard_lifecycle() {
        let transport = scripted_backend();
        let context = dashboard(&transport);

        let table = Arc::new(RecordingWidget::table("insights-table"));
        let header = Arc::new(RecordingWidget { clock: true, counters: true, ..RecordingWidget::new("header") });
        let broken = Arc::new(RecordingWidget::table("broken").failing(Failure::Error));
        assert!(context.register_component(table.clone()));
        assert!(context.register_component(header.clone()));
        assert!(context.register_component(broken.clone()));

        context.start();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        // table poll runs once at start, the unified tick at 0, 1000 and 2000
        assert_eq!(table.refresh_calls(), 1);
        assert_eq!(table.last_batch_len.load(Ordering::SeqCst), 3);
        assert_eq!(broken.refresh_calls(), 1);
        assert_eq!(header.time_updates.load(Ordering::SeqCst), 3);
        assert_eq!(header.last_counters.lock().unwrap().map(|c| c.active()), Some(3));

        // counters are read once per tick despite the 5s cache TTL
        assert_eq!(transport.calls_to(Endpoint::TASK_STATS), 3);

        context.cleanup();
        assert_eq!(context.scheduler().task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_every_task() {
        let transport = scripted_backend();
        let context = dashboard(&transport);
        let header = Arc::new(RecordingWidget { clock: true, ..RecordingWidget::new("header") });
        context.register_component(header.clone());
        context.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(header.time_updates.load(Ordering::SeqCst), 1);

        context.scheduler().pause();
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(header.time_updates.load(Ordering::SeqCst), 1);

        context.scheduler().resume();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(header.time_updates.load(Ordering::SeqCst), 2);

        context.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_drives_filters_and_panels() {
        let transport = scripted_backend();
        let context = dashboard(&transport);
        let table = Arc::new(RecordingWidget::table("table"));
        let panel = Arc::new(RecordingWidget { symbol_panel: true, ..RecordingWidget::new("panel") });
        context.register_component(table.clone());
        context.register_component(panel.clone());

        assert!(context.navigate("/api/insights/NASDAQ:AAPL").await);
        assert_eq!(table.last_batch_len.load(Ordering::SeqCst), 1);
        assert_eq!(context.navigator().current_filters().exchange, "NASDAQ");

        let report = context.ticker().tick().await;
        assert_eq!(report.symbol_visible, Some(Some("AAPL".to_string())));
        assert_eq!(panel.visibility_pushes.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_and_forced_refresh_reach_backend() {
        let transport = scripted_backend();
        let context = dashboard(&transport);
        context.register_component(Arc::new(RecordingWidget::table("table")));

        assert!(context.refresh_now(RefreshOptions::default()).await);
        assert!(context.refresh_now(RefreshOptions::default()).await);
        assert_eq!(transport.calls_to(INSIGHTS_ROOT), 1);

        assert!(context.refresh_now(RefreshOptions::forced()).await);
        assert_eq!(transport.calls_to(INSIGHTS_ROOT), 2);

        // a successful delete clears the cache so the next poll refetches
        assert!(context.api().delete_insight(2).await.unwrap().success);
        assert!(context.refresh_now(RefreshOptions::default()).await);
        assert_eq!(transport.calls_to(INSIGHTS_ROOT), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopping_poll_does_not_cancel_request_in_flight() {
        let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(500)));
        transport.respond(INSIGHTS_ROOT, json!([]));
        let context = dashboard(&transport);
        let component: Arc<dyn Component> = Arc::new(RecordingWidget::table("table"));
        context.register_component(component.clone());

        context.manager().start_auto_refresh(None);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(context.client().pending_count(), 1);

        context.unregister_component(&component);
        assert!(!context.scheduler().is_registered(TaskName::TABLE));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(context.client().pending_count(), 0);
        assert_eq!(context.client().cache_size(), 1);
    }
}

#[cfg(test)]
mod unit_tests {
    use super::super::*;
    use crate::error::RefreshError;
    use crate::utils::config_loader::SectionLoaderSync;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned HTTP responses, one per connection, in order.
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_transport_round_trip() {
        let base_url = serve(vec![(200, r#"[{"id":1}]"#), (503, ""), (200, ""), (200, "not json")]).await;
        let transport = HttpTransport::new(&base_url, Duration::from_secs(5)).unwrap();

        let payload = transport.send("/api/insights", &RequestOptions::get().param("page", 1)).await.unwrap();
        assert_eq!(payload, json!([{"id": 1}]));

        let err = transport.send("/api/status", &RequestOptions::get()).await.unwrap_err();
        assert!(matches!(err, RefreshError::HttpStatus { status: 503, .. }));

        let empty = transport.send("/api/insights/delete", &RequestOptions::with_method(HttpMethod::Delete)).await;
        assert_eq!(empty.unwrap(), serde_json::Value::Null);

        let err = transport.send("/api/status", &RequestOptions::get()).await.unwrap_err();
        assert!(err.is_shape());
    }

    #[tokio::test]
    async fn test_http_transport_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let transport = HttpTransport::new(&base_url, Duration::from_secs(1)).unwrap();
        let err = transport.send("/api/status", &RequestOptions::get()).await.unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpTransport::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_load_section_from_file() {
        let path = std::env::temp_dir().join(format!("insights-refresh-{}.toml", std::process::id()));
        std::fs::write(&path, "[refresh]\nbase_url = \"http://localhost:9000\"\ncache_ttl_ms = 250\n").unwrap();

        let config = RefreshConfig::load_section_from_file_sync(path.to_string_lossy().into_owned()).unwrap();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.cache_ttl(), Duration::from_millis(250));
        assert_eq!(config.unified_interval(), Duration::from_secs(1));

        std::fs::remove_file(&path).ok();
    }
}
