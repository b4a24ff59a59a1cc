/// Models module
/// Shared data types between the session host, the hook ingress and the UI.
/// Everything here is serializable, either for IPC or for the notification store.

pub mod hook;
pub mod notification;
pub mod session;

pub use hook::{HookEvent, HookEventKind, HookReport};
pub use notification::{NotificationRecord, Routing};
pub use session::{SessionInfo, SessionState, SlotId, TerminalDimensions};
