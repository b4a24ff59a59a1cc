/// Services module
/// Business logic: PTY sessions, the hook ingress, deduplication and the
/// notification bus. Separated from commands so the desktop shell and the
/// headless daemon share it.

pub mod bridge;
pub mod dedup;
pub mod hook_installer;
pub mod ingress;
pub mod notification_bus;
pub mod notification_consumer;
pub mod pty;
pub mod registry;
pub mod session_manager;
pub mod shell_env;

pub use bridge::{ChannelBridge, LogBridge, UiBridge, UiEvent, Utf8Carry};
pub use dedup::{DedupCache, DedupDecision, DedupKey};
pub use hook_installer::{ClaudeSettingsInstaller, HookInstaller, HookStatus};
pub use ingress::{AnySlot, HookAck, IngressServer, SlotDirectory};
pub use notification_bus::{NotificationBus, RetentionPolicy};
pub use notification_consumer::{drain_once, NotificationConsumer};
pub use pty::PtySession;
pub use registry::SessionRegistry;
pub use session_manager::{SessionManager, SessionRequest};
