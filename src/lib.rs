/// AgentCockpit backend
/// Multi-slot terminal host for AI coding CLIs: one PTY per UI slot, a
/// loopback ingress for the CLI's hook scripts, and a file-backed bus that
/// carries their reports to the UI process exactly once.
///
/// Module structure:
/// - models: Shared data types (slots, sessions, hook reports, records)
/// - services: Sessions, ingress, dedup, notification bus and consumer
/// - commands: Tauri IPC handlers (feature `desktop`)
/// - desktop: Tauri builder and exit hook (feature `desktop`)

pub mod config;
pub mod error;
pub mod models;
pub mod services;

#[cfg(feature = "desktop")]
pub mod commands;
#[cfg(feature = "desktop")]
pub mod desktop;

pub use config::CockpitConfig;
pub use error::{BusError, ConfigError, IngressError, InstallError, RegistryError, SessionError};
