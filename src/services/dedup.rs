/// Dedup Cache
/// Time-windowed suppression of repeated hook reports. A tool that asks for
/// confirmation three times in one turn fires three identical reports; only
/// the first reaches the notification bus.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::DedupConfig;
use crate::models::{HookEvent, HookEventKind};

/// `(terminal id, event type)` plus a payload fingerprint for kinds whose
/// payload changes what the UI shows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    terminal_id: String,
    event_type: &'static str,
    fingerprint: Option<String>,
}

impl DedupKey {
    pub fn for_event(event: &HookEvent) -> Self {
        let fingerprint = match &event.kind {
            HookEventKind::TitleUpdate { title } => Some(fingerprint(title)),
            HookEventKind::SessionFinished | HookEventKind::ConfirmationNeeded { .. } => None,
        };
        Self {
            terminal_id: event.terminal_id.clone(),
            event_type: event.kind.name(),
            fingerprint,
        }
    }
}

fn fingerprint(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Accept,
    Suppress,
}

#[derive(Debug)]
pub struct DedupCache {
    window: Duration,
    eviction_age: Duration,
    last_accepted: HashMap<DedupKey, Instant>,
    last_sweep: Option<Instant>,
}

impl DedupCache {
    /// `eviction_multiple` windows after its last acceptance a key is forgotten
    pub fn new(window: Duration, eviction_multiple: u32) -> Self {
        Self {
            window,
            eviction_age: window * eviction_multiple.max(1),
            last_accepted: HashMap::new(),
            last_sweep: None,
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.window(), config.eviction_multiple)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&mut self, key: DedupKey) -> DedupDecision {
        self.check_at(key, Instant::now())
    }

    /// Accept when the key is unseen or its last acceptance is older than
    /// the window; suppress otherwise. Suppressed reports do not extend the
    /// window.
    pub fn check_at(&mut self, key: DedupKey, now: Instant) -> DedupDecision {
        let due = self
            .last_sweep
            .map_or(true, |at| now.saturating_duration_since(at) >= self.eviction_age);
        if due {
            self.sweep(now);
        }

        if self.window.is_zero() {
            return DedupDecision::Accept;
        }

        match self.last_accepted.get(&key) {
            Some(&at) if now.saturating_duration_since(at) <= self.window => DedupDecision::Suppress,
            _ => {
                self.last_accepted.insert(key, now);
                DedupDecision::Accept
            }
        }
    }

    /// Drop a key so the next identical report is accepted, e.g. when the
    /// accepted one could not be stored
    pub fn forget(&mut self, key: &DedupKey) {
        self.last_accepted.remove(key);
    }

    /// Evict entries older than the eviction age; returns how many went
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.last_accepted.len();
        let max_age = self.eviction_age;
        self.last_accepted
            .retain(|_, at| now.saturating_duration_since(*at) < max_age);
        self.last_sweep = Some(now);
        before - self.last_accepted.len()
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}
