use axum::Json;
use axum::routing::get;
use monitor::channel::TransportState;
use monitor::ui_events::MonitorUiEvent;
use monitor::{KvStore, MemoryStore, Monitor, load_config_from_str};
use rr_test_utils::MockGateway;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tag_core::CaseStatus;

fn monitor_for(base_url: &str, device_url: Option<&str>) -> Arc<Monitor> {
    let device = device_url
        .map(|u| format!("api_base_url = \"{u}\"\n"))
        .unwrap_or_default();
    let toml = format!(
        r#"
schema_version = 1

[upstream]
base_url = "{base_url}"

[device]
{device}status_poll_secs = 1

[control]
refresh_ms = 100
"#
    );
    let cfg = load_config_from_str(&toml).unwrap();
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    Arc::new(Monitor::new(cfg, store).unwrap())
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn spawn_device_api() -> String {
    let app = axum::Router::new().route(
        "/api/readers/{id}/status",
        get(|| async { Json(json!({ "connected": true, "reading": true })) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn reads_from_both_transports_reconcile_a_case() {
    let gateway = MockGateway::start().await.unwrap();
    let monitor = monitor_for(&gateway.http_base(), None);
    monitor
        .cases()
        .add("E2801160600002084E2C0001", &["E2801160600002084E2C0002".to_owned()])
        .unwrap();

    monitor.connect(None);
    wait_until("connected", || monitor.is_connected()).await;
    assert_eq!(monitor.reconciliation().status, CaseStatus::Incomplete);

    wait_until("both transports", || {
        gateway.sse_requests().len() == 1 && gateway.ws_requests().len() == 1
    })
    .await;
    wait_until("both open", || {
        let h = monitor.status().health;
        h.server_push == TransportState::Open
            && h.socket == TransportState::Open
    })
    .await;

    gateway.send_ws(r#"{"epc":"E2801160600002084E2C0001"}"#);
    gateway.send_sse(r#"{"data":{"tag":{"tagId":"E2801160600002084E2C0002"}}}"#);
    wait_until("two tags", || monitor.status().unique_tags == 2).await;
    assert_eq!(monitor.reconciliation().status, CaseStatus::Complete);

    gateway.send_sse(r#"{"tags":[{"epc":"E2801160600002084E2C0099"}]}"#);
    wait_until("stray tag", || monitor.status().unique_tags == 3).await;
    let report = monitor.reconciliation();
    assert_eq!(report.status, CaseStatus::Anomalous);
    assert_eq!(report.unlisted, vec!["E2801160600002084E2C0099".to_owned()]);

    monitor.disconnect();
    assert!(!monitor.is_connected());
    assert_eq!(monitor.timers_active(), (false, false));
}

#[tokio::test]
async fn undecodable_messages_are_wrapped_and_logged() {
    let gateway = MockGateway::start().await.unwrap();
    let monitor = monitor_for(&gateway.http_base(), None);
    monitor.connect(None);
    wait_until("socket open", || {
        monitor.status().health.socket == TransportState::Open
    })
    .await;

    gateway.send_ws("not json at all");
    wait_until("event logged", || monitor.status().events_received == 1).await;
    let events = monitor.events();
    assert_eq!(events[0].data, json!({ "raw": "not json at all" }));
    // The loose string fallback still extracts the wrapped text.
    assert_eq!(monitor.status().unique_tags, 1);
    monitor.disconnect();
}

#[tokio::test]
async fn status_poll_records_reader_status_until_disconnect() {
    let gateway = MockGateway::start().await.unwrap();
    let device = spawn_device_api().await;
    let monitor = monitor_for(&gateway.http_base(), Some(&device));

    monitor.connect(Some("R1"));
    assert_eq!(monitor.timers_active(), (true, true));
    wait_until("reader status", || monitor.reader_status().is_some()).await;
    let status = monitor.reader_status().unwrap();
    assert!(status.connected);
    assert!(status.reading);
    assert_eq!(monitor.status().reader_id.as_deref(), Some("R1"));

    monitor.disconnect();
    assert_eq!(monitor.timers_active(), (false, false));
    assert_eq!(monitor.reader_status(), None);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(monitor.reader_status(), None);
}

#[tokio::test]
async fn connection_changes_reach_ui_subscribers() {
    let gateway = MockGateway::start().await.unwrap();
    let monitor = monitor_for(&gateway.http_base(), None);
    let mut ui = monitor.subscribe_ui();
    let _forwarder = monitor.forward_connection_changes();

    monitor.connect(None);
    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(event @ MonitorUiEvent::ConnectionChanged { .. }) =
                ui.recv().await
            {
                return event;
            }
        }
    })
    .await
    .unwrap();
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "connection_changed");
    assert_eq!(json["connected"], true);
    monitor.disconnect();
}
