/// UI bridge
/// The seam between the session host and whatever renders it: the Tauri
/// webview, the headless daemon's log, or a test harness.

use std::sync::mpsc::{channel, Receiver, Sender};

use crate::models::{NotificationRecord, SessionState, SlotId};

/// Receives per-slot output and per-record notifications.
///
/// Calls arrive on the session manager's pump thread while it holds the
/// manager lock, so implementations must not call back into the manager.
pub trait UiBridge: Send + Sync + 'static {
    /// A chunk of PTY output, verbatim and in order
    fn output(&self, slot: SlotId, data: &[u8]);

    /// The session in `slot` reached a terminal state
    fn session_closed(&self, slot: SlotId, state: &SessionState);

    /// A hook notification for a routable slot
    fn notification(&self, record: &NotificationRecord);
}

/// Logs everything; used by the headless daemon
#[derive(Debug, Default)]
pub struct LogBridge;

impl UiBridge for LogBridge {
    fn output(&self, slot: SlotId, data: &[u8]) {
        log::trace!("slot {}: {} bytes of output", slot, data.len());
    }

    fn session_closed(&self, slot: SlotId, state: &SessionState) {
        log::info!("slot {} closed: {:?}", slot, state);
    }

    fn notification(&self, record: &NotificationRecord) {
        log::info!(
            "notification #{} for terminal {}: {:?}",
            record.id,
            record.terminal_id,
            record.kind
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Output { slot: SlotId, data: Vec<u8> },
    Closed { slot: SlotId, state: SessionState },
    Notification(NotificationRecord),
}

/// Forwards every call as a `UiEvent` over a channel
#[derive(Debug)]
pub struct ChannelBridge {
    tx: Sender<UiEvent>,
}

impl ChannelBridge {
    pub fn new() -> (Self, Receiver<UiEvent>) {
        let (tx, rx) = channel();
        (Self { tx }, rx)
    }
}

impl UiBridge for ChannelBridge {
    fn output(&self, slot: SlotId, data: &[u8]) {
        let _ = self.tx.send(UiEvent::Output {
            slot,
            data: data.to_vec(),
        });
    }

    fn session_closed(&self, slot: SlotId, state: &SessionState) {
        let _ = self.tx.send(UiEvent::Closed {
            slot,
            state: state.clone(),
        });
    }

    fn notification(&self, record: &NotificationRecord) {
        let _ = self.tx.send(UiEvent::Notification(record.clone()));
    }
}

/// Re-chunks PTY bytes at UTF-8 boundaries for text consumers; a code point
/// split across two reads is held back until its tail arrives
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // incomplete sequence at the end
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let rest = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_code_point_is_held_back() {
        let bytes = "héllo".as_bytes();
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&bytes[..2]), "h");
        assert_eq!(carry.push(&bytes[2..]), "éllo");
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn channel_bridge_forwards_in_order() {
        let (bridge, rx) = ChannelBridge::new();
        bridge.output(SlotId(1), b"one");
        bridge.output(SlotId(1), b"two");
        bridge.session_closed(SlotId(1), &SessionState::Exited { code: Some(0) });
        let events: Vec<UiEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                UiEvent::Output { slot: SlotId(1), data: b"one".to_vec() },
                UiEvent::Output { slot: SlotId(1), data: b"two".to_vec() },
                UiEvent::Closed { slot: SlotId(1), state: SessionState::Exited { code: Some(0) } },
            ]
        );
    }
}
