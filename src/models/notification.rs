/// Notification models
/// One durable unit on the notification bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{HookEventKind, SlotId};

/// Whether the reporting slot had a live session when the report arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Routable,
    Unroutable,
}

/// A correlated hook event, as stored in the notification log.
///
/// `processed` flips false -> true once, after the consumer applied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: u64,
    #[serde(flatten)]
    pub kind: HookEventKind,
    pub terminal_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub unroutable: bool,
}

impl NotificationRecord {
    /// Slot this record belongs to, if the terminal id names one
    pub fn slot(&self) -> Option<SlotId> {
        self.terminal_id.parse().ok()
    }

    pub fn is_routable(&self) -> bool {
        !self.unroutable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_flat_store_layout() {
        let record = NotificationRecord {
            id: 7,
            kind: HookEventKind::TitleUpdate { title: "Refactor".into() },
            terminal_id: "2".into(),
            task_id: Some("task-9".into()),
            timestamp: Utc::now(),
            processed: false,
            unroutable: false,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "title_update");
        assert_eq!(json["title"], "Refactor");
        assert_eq!(json["terminal_id"], "2");
        assert_eq!(json["task_id"], "task-9");
        assert_eq!(json["processed"], false);

        let back: NotificationRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.slot(), Some(SlotId(2)));
    }
}
