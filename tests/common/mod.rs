//! Shared harness for tests that spawn real shells.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use agentcockpit_lib::config::SessionConfig;
use agentcockpit_lib::models::{NotificationRecord, SessionState, SlotId};
use agentcockpit_lib::services::UiEvent;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Plain `/bin/sh`, no login profile, inherited `PATH`
pub fn shell_config(cwd: &Path) -> SessionConfig {
    SessionConfig {
        shell: Some("/bin/sh".to_string()),
        login_shell: false,
        extend_path: false,
        default_cwd: Some(cwd.to_path_buf()),
        shutdown_grace_ms: 500,
        ..SessionConfig::default()
    }
}

/// Folds the bridge's event stream into per-slot transcripts
pub struct Collector {
    rx: Receiver<UiEvent>,
    pub output: HashMap<SlotId, Vec<u8>>,
    pub closed: HashMap<SlotId, SessionState>,
    pub notifications: Vec<NotificationRecord>,
}

impl Collector {
    pub fn new(rx: Receiver<UiEvent>) -> Self {
        Self {
            rx,
            output: HashMap::new(),
            closed: HashMap::new(),
            notifications: Vec::new(),
        }
    }

    fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Output { slot, data } => self.output.entry(slot).or_default().extend(data),
            UiEvent::Closed { slot, state } => {
                self.closed.insert(slot, state);
            }
            UiEvent::Notification(record) => self.notifications.push(record),
        }
    }

    /// Consume events until `done` holds; false on timeout
    pub fn wait_until(&mut self, timeout: Duration, done: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while !done(self) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if let Ok(event) = self.rx.recv_timeout(deadline - now) {
                self.apply(event);
            }
        }
        true
    }

    /// Consume whatever arrives within `period`
    pub fn drain_for(&mut self, period: Duration) {
        let deadline = Instant::now() + period;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            if let Ok(event) = self.rx.recv_timeout(deadline - now) {
                self.apply(event);
            }
        }
    }

    pub fn text(&self, slot: u32) -> String {
        self.output
            .get(&SlotId(slot))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }

    pub fn closed_state(&self, slot: u32) -> Option<&SessionState> {
        self.closed.get(&SlotId(slot))
    }
}
