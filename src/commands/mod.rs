/// Commands module
/// Tauri IPC handlers, the boundary between the webview and the services.
/// Errors cross it as strings.

pub mod hooks;
pub mod pty;
