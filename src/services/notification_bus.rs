/// Notification Bus
/// Durable, ordered store of notification records shared between the hook
/// ingress (the producer, possibly in another process) and the UI (the
/// consumer).
///
/// On disk it is an append-only JSON-lines log:
///
/// ```text
/// {"op":"watermark","next_id":42}
/// {"op":"append","record":{"id":42,"type":"session_finished",...}}
/// {"op":"processed","id":42}
/// ```
///
/// A record's `processed` flag is the fold of the log; record lines are never
/// edited. `prune` compacts the log into a new file and renames it over the
/// old one. Writers hold an exclusive `flock` on a sibling lock file for the
/// whole read-modify-write, readers hold a shared one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BusError;
use crate::models::{HookEvent, NotificationRecord, Routing};

const STORE_FILE: &str = "notifications.jsonl";
const LOCK_FILE: &str = "notifications.lock";

/// Which processed records `prune` keeps. Unprocessed records are always kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Processed records older than this are removed
    pub max_age: Duration,
    /// At most this many processed records survive, newest first
    pub max_processed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Append { record: NotificationRecord },
    Processed { id: u64 },
    Watermark { next_id: u64 },
}

struct Snapshot {
    records: Vec<NotificationRecord>,
    positions: HashMap<u64, usize>,
    next_id: u64,
    /// Bytes up to and including the last complete line
    valid_len: u64,
    torn: bool,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            positions: HashMap::new(),
            next_id: 1,
            valid_len: 0,
            torn: false,
        }
    }

    fn apply(&mut self, entry: LogEntry) {
        match entry {
            LogEntry::Append { record } => {
                self.next_id = self.next_id.max(record.id.saturating_add(1));
                if self.positions.contains_key(&record.id) {
                    log::warn!("Ignoring duplicate notification id {}", record.id);
                    return;
                }
                self.positions.insert(record.id, self.records.len());
                self.records.push(record);
            }
            LogEntry::Processed { id } => {
                if let Some(&index) = self.positions.get(&id) {
                    self.records[index].processed = true;
                }
            }
            LogEntry::Watermark { next_id } => {
                self.next_id = self.next_id.max(next_id);
            }
        }
    }

    fn get(&self, id: u64) -> Option<&NotificationRecord> {
        self.positions.get(&id).map(|&index| &self.records[index])
    }
}

pub struct NotificationBus {
    path: PathBuf,
    lock_path: PathBuf,
}

impl NotificationBus {
    /// Open (or create) the store in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, BusError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(STORE_FILE),
            lock_path: dir.join(LOCK_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append a record for `event`; returns it with its new id
    pub fn append(&self, event: &HookEvent, routing: Routing) -> Result<NotificationRecord, BusError> {
        let _lock = StoreLock::acquire(&self.lock_path, LockMode::Exclusive)?;
        let snapshot = self.load_locked()?;

        let record = NotificationRecord {
            id: snapshot.next_id,
            kind: event.kind.clone(),
            terminal_id: event.terminal_id.clone(),
            task_id: event.task_id.clone(),
            timestamp: event.received_at,
            processed: false,
            unroutable: routing == Routing::Unroutable,
        };
        self.append_entry(&LogEntry::Append {
            record: record.clone(),
        })?;
        log::debug!(
            "Appended notification #{} ({}) for terminal {}",
            record.id,
            record.kind.name(),
            record.terminal_id
        );
        Ok(record)
    }

    /// Unprocessed records in append order.
    ///
    /// A corrupt store is moved aside and reads as empty.
    pub fn fetch_unprocessed(&self) -> Result<Vec<NotificationRecord>, BusError> {
        Ok(self
            .read_shared()?
            .records
            .into_iter()
            .filter(|r| !r.processed)
            .collect())
    }

    /// Every record still in the store, in append order
    pub fn records(&self) -> Result<Vec<NotificationRecord>, BusError> {
        Ok(self.read_shared()?.records)
    }

    /// Flag record `id` as processed. Returns false when it already was, or
    /// when no such record exists (e.g. it was pruned).
    pub fn mark_processed(&self, id: u64) -> Result<bool, BusError> {
        let _lock = StoreLock::acquire(&self.lock_path, LockMode::Exclusive)?;
        let snapshot = self.load_locked()?;
        match snapshot.get(id) {
            Some(record) if !record.processed => {
                self.append_entry(&LogEntry::Processed { id })?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                log::debug!("mark_processed for unknown notification {}", id);
                Ok(false)
            }
        }
    }

    /// Drop processed records outside `policy`; returns how many went.
    pub fn prune(&self, policy: RetentionPolicy) -> Result<usize, BusError> {
        let _lock = StoreLock::acquire(&self.lock_path, LockMode::Exclusive)?;
        let snapshot = self.load_locked()?;
        let now = Utc::now();

        let fresh: Vec<usize> = snapshot
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.processed)
            .filter(|(_, r)| (now - r.timestamp).to_std().unwrap_or(Duration::ZERO) <= policy.max_age)
            .map(|(index, _)| index)
            .collect();
        let keep_processed: Vec<usize> = fresh
            .iter()
            .skip(fresh.len().saturating_sub(policy.max_processed))
            .copied()
            .collect();

        let kept: Vec<&NotificationRecord> = snapshot
            .records
            .iter()
            .enumerate()
            .filter(|(index, r)| !r.processed || keep_processed.binary_search(index).is_ok())
            .map(|(_, r)| r)
            .collect();

        let removed = snapshot.records.len() - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut body = serde_json::to_string(&LogEntry::Watermark {
            next_id: snapshot.next_id,
        })?;
        body.push('\n');
        for record in kept {
            body.push_str(&serde_json::to_string(&LogEntry::Append {
                record: record.clone(),
            })?);
            body.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        log::info!("Pruned {} processed notifications", removed);
        Ok(removed)
    }

    fn read_shared(&self) -> Result<Snapshot, BusError> {
        let result = {
            let _lock = StoreLock::acquire(&self.lock_path, LockMode::Shared)?;
            read_snapshot(&self.path)
        };
        match result {
            Err(BusError::Corruption { .. }) => {
                let _lock = StoreLock::acquire(&self.lock_path, LockMode::Exclusive)?;
                self.load_locked()
            }
            other => other,
        }
    }

    /// Read the store while holding the exclusive lock, repairing a torn
    /// tail and quarantining a corrupt file
    fn load_locked(&self) -> Result<Snapshot, BusError> {
        match read_snapshot(&self.path) {
            Ok(snapshot) => {
                if snapshot.torn {
                    log::warn!(
                        "Truncating incomplete trailing line in {}",
                        self.path.display()
                    );
                    let file = OpenOptions::new().write(true).open(&self.path)?;
                    file.set_len(snapshot.valid_len)?;
                }
                Ok(Snapshot {
                    torn: false,
                    ..snapshot
                })
            }
            Err(err @ BusError::Corruption { .. }) => {
                log::error!("{}; starting with an empty store", err);
                // Ids of quarantined records must not be handed out again
                let next_id = salvage_next_id(&self.path);
                self.quarantine()?;
                self.append_entry(&LogEntry::Watermark { next_id })?;
                Ok(Snapshot {
                    next_id,
                    ..Snapshot::empty()
                })
            }
            Err(err) => Err(err),
        }
    }

    fn quarantine(&self) -> Result<(), BusError> {
        let target = self
            .path
            .with_extension(format!("jsonl.corrupt-{}", Utc::now().timestamp_millis()));
        match fs::rename(&self.path, &target) {
            Ok(()) => {
                log::warn!("Moved corrupt notification store to {}", target.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                log::warn!("Could not move corrupt store aside ({}), removing it", e);
                fs::remove_file(&self.path)?;
                Ok(())
            }
        }
    }

    fn append_entry(&self, entry: &LogEntry) -> Result<(), BusError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot, BusError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Snapshot::empty()),
        Err(e) => return Err(e.into()),
    };
    let corruption = |line: usize, reason: String| BusError::Corruption {
        path: path.to_path_buf(),
        line,
        reason,
    };
    let text = String::from_utf8(bytes).map_err(|e| corruption(0, e.to_string()))?;

    let mut snapshot = Snapshot::empty();
    let complete = match text.rfind('\n') {
        Some(end) => &text[..=end],
        None => "",
    };
    snapshot.valid_len = complete.len() as u64;
    snapshot.torn = complete.len() < text.len();

    for (index, line) in complete.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: LogEntry =
            serde_json::from_str(line).map_err(|e| corruption(index + 1, e.to_string()))?;
        snapshot.apply(entry);
    }
    Ok(snapshot)
}

/// One past the highest id any readable line of a damaged log mentions.
/// When no line is readable the clock stands in, which stays above every id
/// a store of this age can have issued.
fn salvage_next_id(path: &Path) -> u64 {
    let bytes = fs::read(path).unwrap_or_default();
    let next_id = String::from_utf8_lossy(&bytes)
        .lines()
        .filter_map(|line| serde_json::from_str::<LogEntry>(line).ok())
        .map(|entry| match entry {
            LogEntry::Append { record } => record.id.saturating_add(1),
            LogEntry::Processed { id } => id.saturating_add(1),
            LogEntry::Watermark { next_id } => next_id,
        })
        .max()
        .unwrap_or(0);
    if next_id > 1 {
        next_id
    } else {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Advisory lock on the store's lock file, released on drop
struct StoreLock {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: File,
}

impl StoreLock {
    #[cfg(unix)]
    fn acquire(path: &Path, mode: LockMode) -> Result<Self, BusError> {
        use std::os::unix::io::AsRawFd;
        use std::time::Instant;

        const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let operation = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };

        let fd = file.as_raw_fd();
        let start = Instant::now();
        let mut backoff = Duration::from_millis(1);

        loop {
            // SAFETY: `fd` comes from `file`, which stays open for the whole
            // loop. LOCK_NB makes the call return instead of blocking.
            let result = unsafe { libc::flock(fd, operation | libc::LOCK_NB) };
            if result == 0 {
                return Ok(Self { file });
            }

            let err = std::io::Error::last_os_error();
            let retry = matches!(
                err.raw_os_error(),
                Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN || code == libc::EINTR
            );
            if !retry {
                return Err(BusError::Lock {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                });
            }

            if start.elapsed() > LOCK_TIMEOUT {
                return Err(BusError::Lock {
                    path: path.to_path_buf(),
                    reason: "lock acquisition timed out after 5 seconds".to_string(),
                });
            }

            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(Duration::from_millis(100));
        }
    }

    // Single-process fallback: no cross-process exclusion
    #[cfg(not(unix))]
    fn acquire(path: &Path, _mode: LockMode) -> Result<Self, BusError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor is owned by `self.file` and still open.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HookEventKind, HookReport};

    fn event(kind: &str, terminal: &str) -> HookEvent {
        HookEvent::try_from(HookReport::new(kind, terminal)).unwrap()
    }

    #[test]
    fn torn_tail_is_ignored_and_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let bus = NotificationBus::open(dir.path()).unwrap();
        let first = bus.append(&event("stop", "1"), Routing::Routable).unwrap();

        let mut file = OpenOptions::new().append(true).open(bus.path()).unwrap();
        file.write_all(br#"{"op":"append","rec"#).unwrap();
        drop(file);

        assert_eq!(bus.fetch_unprocessed().unwrap().len(), 1);

        let second = bus.append(&event("stop", "2"), Routing::Routable).unwrap();
        assert_eq!(second.id, first.id + 1);
        let ids: Vec<u64> = bus.records().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn watermark_keeps_ids_monotonic_after_prune() {
        let dir = tempfile::tempdir().unwrap();
        let bus = NotificationBus::open(dir.path()).unwrap();
        let record = bus.append(&event("stop", "1"), Routing::Routable).unwrap();
        bus.mark_processed(record.id).unwrap();
        let removed = bus
            .prune(RetentionPolicy {
                max_age: Duration::from_secs(3600),
                max_processed: 0,
            })
            .unwrap();
        assert_eq!(removed, 1);
        assert!(bus.records().unwrap().is_empty());

        let next = bus.append(&event("stop", "1"), Routing::Routable).unwrap();
        assert!(next.id > record.id);
    }

    #[test]
    fn ids_stay_fresh_after_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let bus = NotificationBus::open(dir.path()).unwrap();
        let mut issued = Vec::new();
        for terminal in ["1", "2", "3"] {
            issued.push(bus.append(&event("stop", terminal), Routing::Routable).unwrap().id);
        }

        let mut file = OpenOptions::new().append(true).open(bus.path()).unwrap();
        file.write_all(b"not a log entry\n").unwrap();
        drop(file);

        assert!(bus.fetch_unprocessed().unwrap().is_empty());
        let next = bus.append(&event("stop", "1"), Routing::Routable).unwrap();
        assert!(issued.iter().all(|&id| next.id > id));

        let quarantined = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(quarantined, 1);
    }

    #[test]
    fn unreadable_store_falls_back_to_clock_ids() {
        let dir = tempfile::tempdir().unwrap();
        let bus = NotificationBus::open(dir.path()).unwrap();
        fs::write(bus.path(), b"\xff\xfe garbage\n").unwrap();

        let record = bus.append(&event("stop", "1"), Routing::Routable).unwrap();
        assert!(record.id > 1_000_000_000_000);
    }

    #[test]
    fn log_lines_are_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let bus = NotificationBus::open(dir.path()).unwrap();
        let record = bus
            .append(&event("confirmation_needed", "3"), Routing::Unroutable)
            .unwrap();
        bus.mark_processed(record.id).unwrap();

        let text = fs::read_to_string(bus.path()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0]["op"], "append");
        assert_eq!(lines[0]["record"]["type"], "confirmation_needed");
        assert_eq!(lines[0]["record"]["unroutable"], true);
        assert_eq!(lines[1], serde_json::json!({"op": "processed", "id": record.id}));
        assert_eq!(record.kind, HookEventKind::ConfirmationNeeded { tool: None });
    }
}
