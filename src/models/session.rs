/// Session models
/// Slot identifiers, terminal geometry and the session state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Stable identifier of one UI terminal position.
///
/// Slot 0 is the sentinel reported by hook scripts running outside any
/// cockpit session. It never hosts a session and is never routable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub u32);

impl SlotId {
    pub const SENTINEL: SlotId = SlotId(0);

    pub fn is_sentinel(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SlotId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(SlotId)
    }
}

impl From<u32> for SlotId {
    fn from(value: u32) -> Self {
        SlotId(value)
    }
}

/// Terminal size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalDimensions {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalDimensions {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalDimensions {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Lifecycle of a terminal session.
///
/// `Created -> Running -> Exited | Killed`. The last two are terminal: a
/// session in either state is no longer in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Running,
    Exited { code: Option<u32> },
    Killed,
}

impl SessionState {
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Created | SessionState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

/// Snapshot of a session for the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub slot: SlotId,
    pub pid: Option<u32>,
    pub working_dir: PathBuf,
    pub dimensions: TerminalDimensions,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}
