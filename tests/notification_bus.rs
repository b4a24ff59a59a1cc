//! Notification bus behaviour across handles, threads and damaged files.

use std::fs;
use std::thread;
use std::time::Duration;

use agentcockpit_lib::models::{HookEvent, HookReport, Routing};
use agentcockpit_lib::services::{NotificationBus, RetentionPolicy};

fn event(kind: &str, terminal: &str) -> HookEvent {
    HookEvent::try_from(HookReport::new(kind, terminal)).unwrap()
}

fn keep_everything() -> RetentionPolicy {
    RetentionPolicy {
        max_age: Duration::from_secs(3600),
        max_processed: 1000,
    }
}

#[test]
fn test_missing_store_reads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let bus = NotificationBus::open(dir.path().join("fresh")).unwrap();
    assert!(bus.fetch_unprocessed().unwrap().is_empty());
    assert!(!bus.mark_processed(1).unwrap());
}

#[test]
fn test_fetch_then_mark_drains_store() {
    let dir = tempfile::tempdir().unwrap();
    let bus = NotificationBus::open(dir.path()).unwrap();
    bus.append(&event("session_finished", "1"), Routing::Routable).unwrap();
    bus.append(&event("confirmation_needed", "2"), Routing::Routable).unwrap();

    let pending = bus.fetch_unprocessed().unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending[0].id < pending[1].id);

    for record in &pending {
        assert!(bus.mark_processed(record.id).unwrap());
    }
    assert!(bus.fetch_unprocessed().unwrap().is_empty());

    // Marking twice is a no-op
    assert!(!bus.mark_processed(pending[0].id).unwrap());
    assert_eq!(bus.records().unwrap().len(), 2);
}

#[test]
fn test_second_handle_sees_producer_writes() {
    let dir = tempfile::tempdir().unwrap();
    let producer = NotificationBus::open(dir.path()).unwrap();
    let consumer = NotificationBus::open(dir.path()).unwrap();

    let record = producer
        .append(&event("session_finished", "4"), Routing::Routable)
        .unwrap();
    let pending = consumer.fetch_unprocessed().unwrap();
    assert_eq!(pending, vec![record.clone()]);

    consumer.mark_processed(record.id).unwrap();
    assert!(producer.fetch_unprocessed().unwrap().is_empty());
}

#[test]
fn test_prune_never_drops_unprocessed() {
    let dir = tempfile::tempdir().unwrap();
    let bus = NotificationBus::open(dir.path()).unwrap();
    let ids: Vec<u64> = (1..=5)
        .map(|slot| {
            bus.append(&event("session_finished", &slot.to_string()), Routing::Routable)
                .unwrap()
                .id
        })
        .collect();
    bus.mark_processed(ids[0]).unwrap();
    bus.mark_processed(ids[2]).unwrap();

    let removed = bus
        .prune(RetentionPolicy {
            max_age: Duration::ZERO,
            max_processed: 0,
        })
        .unwrap();
    assert_eq!(removed, 2);

    let left: Vec<u64> = bus.records().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(left, vec![ids[1], ids[3], ids[4]]);
    assert_eq!(bus.fetch_unprocessed().unwrap().len(), 3);
}

#[test]
fn test_prune_keeps_newest_processed() {
    let dir = tempfile::tempdir().unwrap();
    let bus = NotificationBus::open(dir.path()).unwrap();
    for _ in 0..4 {
        let record = bus.append(&event("stop", "1"), Routing::Routable).unwrap();
        bus.mark_processed(record.id).unwrap();
    }

    let removed = bus
        .prune(RetentionPolicy {
            max_age: Duration::from_secs(3600),
            max_processed: 1,
        })
        .unwrap();
    assert_eq!(removed, 3);
    let left = bus.records().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, 4);
    assert!(left[0].processed);
}

#[test]
fn test_prune_with_nothing_to_drop_leaves_file() {
    let dir = tempfile::tempdir().unwrap();
    let bus = NotificationBus::open(dir.path()).unwrap();
    bus.append(&event("stop", "1"), Routing::Routable).unwrap();
    let before = fs::read_to_string(bus.path()).unwrap();
    assert_eq!(bus.prune(keep_everything()).unwrap(), 0);
    assert_eq!(fs::read_to_string(bus.path()).unwrap(), before);
}

#[test]
fn test_corrupt_store_heals_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let bus = NotificationBus::open(dir.path()).unwrap();
    fs::write(bus.path(), "this is not json\n").unwrap();

    assert!(bus.fetch_unprocessed().unwrap().is_empty());

    let quarantined = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
    assert!(quarantined);

    let record = bus.append(&event("stop", "1"), Routing::Routable).unwrap();
    assert_eq!(bus.fetch_unprocessed().unwrap(), vec![record]);
}

#[test]
fn test_concurrent_appends_get_unique_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let path = path.clone();
            thread::spawn(move || {
                // A handle per thread, as separate processes would have
                let bus = NotificationBus::open(&path).unwrap();
                (0..10)
                    .map(|_| {
                        bus.append(&event("stop", &(worker + 1).to_string()), Routing::Routable)
                            .unwrap()
                            .id
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 40);

    let bus = NotificationBus::open(&path).unwrap();
    assert_eq!(bus.records().unwrap().len(), 40);
}

#[test]
fn test_unroutable_flag_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    NotificationBus::open(dir.path())
        .unwrap()
        .append(&event("stop", "0"), Routing::Unroutable)
        .unwrap();

    let records = NotificationBus::open(dir.path()).unwrap().records().unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].is_routable());
}
