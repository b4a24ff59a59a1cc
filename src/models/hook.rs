/// Hook event models
/// The JSON body hook scripts POST to the ingress, and the typed event it
/// is parsed into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SlotId;
use crate::error::IngressError;

/// Raw hook report as it arrives on the wire.
///
/// `{type, terminalId, tool?, title?, taskId?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookReport {
    #[serde(rename = "type")]
    pub event_type: String,
    pub terminal_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl HookReport {
    pub fn new(event_type: impl Into<String>, terminal_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            terminal_id: terminal_id.into(),
            tool: None,
            title: None,
            task_id: None,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// What happened, with the payload each kind requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookEventKind {
    /// The CLI finished its turn
    SessionFinished,
    /// The CLI is waiting for the user to approve something
    ConfirmationNeeded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },
    /// The CLI proposed a new title for the terminal
    TitleUpdate { title: String },
}

impl HookEventKind {
    /// Stable wire name, also used in dedup keys
    pub fn name(&self) -> &'static str {
        match self {
            HookEventKind::SessionFinished => "session_finished",
            HookEventKind::ConfirmationNeeded { .. } => "confirmation_needed",
            HookEventKind::TitleUpdate { .. } => "title_update",
        }
    }

    /// Parse a wire type name plus its optional payload fields.
    ///
    /// Names are case-insensitive and accept `-` or `_` separators, so
    /// `session-finished` and `SESSION_FINISHED` are the same event.
    pub fn parse(
        event_type: &str,
        tool: Option<String>,
        title: Option<String>,
    ) -> Result<Self, IngressError> {
        let normalized = event_type.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "session_finished" | "stop" => Ok(HookEventKind::SessionFinished),
            "confirmation_needed" | "notification" | "permission_request" => {
                Ok(HookEventKind::ConfirmationNeeded {
                    tool: tool.filter(|t| !t.trim().is_empty()),
                })
            }
            "title_update" | "title" => match title {
                Some(title) if !title.trim().is_empty() => Ok(HookEventKind::TitleUpdate { title }),
                _ => Err(IngressError::Parse(
                    "title_update requires a non-empty title".to_string(),
                )),
            },
            "" => Err(IngressError::Parse("missing event type".to_string())),
            other => Err(IngressError::Parse(format!("unknown event type '{}'", other))),
        }
    }
}

/// A validated hook report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEvent {
    pub kind: HookEventKind,
    /// Correlation key exactly as the script reported it
    pub terminal_id: String,
    pub slot: SlotId,
    pub task_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl TryFrom<HookReport> for HookEvent {
    type Error = IngressError;

    fn try_from(report: HookReport) -> Result<Self, Self::Error> {
        let terminal_id = report.terminal_id.trim().to_string();
        if terminal_id.is_empty() {
            return Err(IngressError::Parse("missing terminalId".to_string()));
        }
        let slot = terminal_id.parse::<SlotId>().map_err(|e| {
            IngressError::Parse(format!("terminalId '{}' is not a slot number: {}", terminal_id, e))
        })?;
        let kind = HookEventKind::parse(&report.event_type, report.tool, report.title)?;

        Ok(HookEvent {
            kind,
            terminal_id,
            slot,
            task_id: report.task_id.filter(|t| !t.is_empty()),
            received_at: Utc::now(),
        })
    }
}
