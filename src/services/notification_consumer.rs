/// Notification consumer
/// Polls the bus from the UI process, hands each record to the bridge and
/// only then marks it processed. A crash between the two replays the record
/// on the next poll, so bridge effects must be idempotent per record id.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::BusError;
use crate::services::bridge::UiBridge;
use crate::services::notification_bus::{NotificationBus, RetentionPolicy};

pub struct NotificationConsumer {
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl NotificationConsumer {
    pub fn start(
        bus: Arc<NotificationBus>,
        bridge: Arc<dyn UiBridge>,
        poll_interval: Duration,
        retention: RetentionPolicy,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = channel::<()>();
        let handle = thread::Builder::new()
            .name("notification-consumer".to_string())
            .spawn(move || loop {
                if let Err(e) = drain_once(&bus, bridge.as_ref(), retention) {
                    log::warn!("Notification poll failed: {}", e);
                }
                match stop_rx.recv_timeout(poll_interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NotificationConsumer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Deliver one batch of unprocessed records; returns how many were handled.
///
/// Unroutable records are marked processed without reaching the bridge: the
/// slot they name had no session when they were reported, and a session
/// created there later must not inherit them.
pub fn drain_once(
    bus: &NotificationBus,
    bridge: &dyn UiBridge,
    retention: RetentionPolicy,
) -> Result<usize, BusError> {
    let pending = bus.fetch_unprocessed()?;
    if pending.is_empty() {
        return Ok(0);
    }

    for record in &pending {
        if record.is_routable() {
            bridge.notification(record);
        } else {
            log::info!(
                "Dropping notification #{} ({}) for terminal {} with no live session",
                record.id,
                record.kind.name(),
                record.terminal_id
            );
        }
        bus.mark_processed(record.id)?;
    }

    bus.prune(retention)?;
    Ok(pending.len())
}
