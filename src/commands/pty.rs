/// PTY Commands
/// One terminal per UI slot; output streams back as `pty-output-{slot}`
/// events emitted by the desktop bridge.

use std::path::PathBuf;
use std::sync::Arc;
use tauri::State;

use crate::models::{SessionInfo, SlotId};
use crate::services::{SessionManager, SessionRequest};

/// Spawn a shell in `slot`, optionally running `command` instead of an
/// interactive prompt
#[tauri::command]
pub fn pty_spawn(
    slot: u32,
    cwd: Option<String>,
    cols: u16,
    rows: u16,
    command: Option<String>,
    manager: State<'_, Arc<SessionManager>>,
) -> Result<SessionInfo, String> {
    let mut request = SessionRequest::new(slot).with_dimensions(cols, rows);
    if let Some(cwd) = cwd.filter(|c| !c.trim().is_empty()) {
        request = request.with_working_dir(PathBuf::from(cwd));
    }
    if let Some(command) = command.filter(|c| !c.trim().is_empty()) {
        request = request.with_command(command);
    }
    manager.create_session(request).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn pty_write(slot: u32, data: String, manager: State<'_, Arc<SessionManager>>) {
    manager.write(SlotId(slot), data.as_bytes());
}

#[tauri::command]
pub fn pty_resize(
    slot: u32,
    cols: u16,
    rows: u16,
    manager: State<'_, Arc<SessionManager>>,
) -> Result<(), String> {
    manager
        .resize(SlotId(slot), cols, rows)
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn pty_close(slot: u32, manager: State<'_, Arc<SessionManager>>) -> Result<(), String> {
    manager
        .destroy_session(SlotId(slot))
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn pty_list(manager: State<'_, Arc<SessionManager>>) -> Vec<SessionInfo> {
    manager.list()
}
