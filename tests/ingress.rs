//! Hook ingress over real loopback HTTP.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use agentcockpit_lib::config::IngressConfig;
use agentcockpit_lib::models::{HookEventKind, SlotId};
use agentcockpit_lib::services::{
    AnySlot, DedupCache, HookAck, IngressServer, NotificationBus, SlotDirectory,
};

struct LiveSlots(Vec<u32>);

impl SlotDirectory for LiveSlots {
    fn is_live(&self, slot: SlotId) -> bool {
        self.0.contains(&slot.0)
    }
}

struct Harness {
    server: IngressServer,
    bus: Arc<NotificationBus>,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn start(window: Duration, directory: Arc<dyn SlotDirectory>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(NotificationBus::open(dir.path()).unwrap());
        let config = IngressConfig {
            port: 0,
            ..IngressConfig::default()
        };
        let server =
            IngressServer::start(&config, DedupCache::new(window, 4), bus.clone(), directory).unwrap();
        Self {
            server,
            bus,
            client: reqwest::Client::new(),
            _dir: dir,
        }
    }

    async fn post(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.server.url())
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn post_ack(&self, body: Value) -> HookAck {
        let response = self.post(body).await;
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_burst_yields_one_record() {
    let h = Harness::start(Duration::from_secs(3), Arc::new(AnySlot));
    let report = json!({"type": "session-finished", "terminalId": "1"});

    let first = h.post_ack(report.clone()).await;
    let second = h.post_ack(report.clone()).await;
    let third = h.post_ack(report).await;

    assert!(first.forwarded);
    assert!(!first.duplicate);
    for ack in [second, third] {
        assert!(!ack.forwarded);
        assert!(ack.duplicate);
    }

    let records = h.bus.records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, HookEventKind::SessionFinished);
    assert_eq!(records[0].terminal_id, "1");
    assert_eq!(first.id, Some(records[0].id));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_report_after_window_is_forwarded_again() {
    let h = Harness::start(Duration::from_millis(200), Arc::new(AnySlot));
    let report = json!({"type": "confirmation_needed", "terminalId": "2", "tool": "bash"});

    assert!(h.post_ack(report.clone()).await.forwarded);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.post_ack(report).await.forwarded);

    assert_eq!(h.bus.records().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_input_is_rejected_and_server_survives() {
    let h = Harness::start(Duration::from_secs(3), Arc::new(AnySlot));

    let not_json = h
        .client
        .post(h.server.url())
        .header("content-type", "application/json")
        .body("{ definitely not json")
        .send()
        .await
        .unwrap();
    assert_eq!(not_json.status(), 400);

    let unknown = h.post(json!({"type": "reboot", "terminalId": "1"})).await;
    assert_eq!(unknown.status(), 400);
    let body: Value = unknown.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("reboot"));

    let bad_slot = h.post(json!({"type": "stop", "terminalId": "abc"})).await;
    assert_eq!(bad_slot.status(), 400);

    let missing_title = h.post(json!({"type": "title_update", "terminalId": "1"})).await;
    assert_eq!(missing_title.status(), 400);

    assert!(h.bus.records().unwrap().is_empty());

    let ok = h.post_ack(json!({"type": "session_finished", "terminalId": "1"})).await;
    assert!(ok.forwarded);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_distinct_titles_are_both_forwarded() {
    let h = Harness::start(Duration::from_secs(3), Arc::new(AnySlot));

    let a = h
        .post_ack(json!({"type": "title_update", "terminalId": "1", "title": "Fix login"}))
        .await;
    let b = h
        .post_ack(json!({"type": "title_update", "terminalId": "1", "title": "Add tests"}))
        .await;
    let repeat = h
        .post_ack(json!({"type": "title_update", "terminalId": "1", "title": "Fix login"}))
        .await;

    assert!(a.forwarded);
    assert!(b.forwarded);
    assert!(repeat.duplicate);
    assert_eq!(h.bus.records().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reports_for_dead_slots_are_flagged_unroutable() {
    let h = Harness::start(Duration::from_secs(3), Arc::new(LiveSlots(vec![1])));

    let live = h.post_ack(json!({"type": "stop", "terminalId": "1"})).await;
    let dead = h.post_ack(json!({"type": "stop", "terminalId": "3"})).await;
    let sentinel = h.post_ack(json!({"type": "stop", "terminalId": "0"})).await;

    assert!(!live.unroutable);
    assert!(dead.forwarded && dead.unroutable);
    assert!(sentinel.forwarded && sentinel.unroutable);

    let records = h.bus.records().unwrap();
    let routable: Vec<bool> = records.iter().map(|r| r.is_routable()).collect();
    assert_eq!(routable, vec![true, false, false]);
}

#[test]
fn test_taken_port_is_reported_at_start() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(NotificationBus::open(dir.path()).unwrap());
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config = IngressConfig {
        port: holder.local_addr().unwrap().port(),
        ..IngressConfig::default()
    };

    let result = IngressServer::start(
        &config,
        DedupCache::new(Duration::from_secs(3), 4),
        bus,
        Arc::new(AnySlot),
    );
    assert!(matches!(
        result,
        Err(agentcockpit_lib::IngressError::Bind { .. })
    ));
}

#[test]
fn test_non_loopback_host_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(NotificationBus::open(dir.path()).unwrap());
    let config = IngressConfig {
        host: "0.0.0.0".parse().unwrap(),
        port: 0,
        ..IngressConfig::default()
    };

    let result = IngressServer::start(
        &config,
        DedupCache::new(Duration::from_secs(3), 4),
        bus,
        Arc::new(AnySlot),
    );
    assert!(matches!(
        result,
        Err(agentcockpit_lib::IngressError::NotLoopback(addr)) if addr.ip().is_unspecified()
    ));
}
