/// Hook Commands
/// Lets the settings screen show and fix the CLI hook registration.

use std::sync::Arc;
use tauri::State;

use crate::services::{HookInstaller, HookStatus};

#[tauri::command]
pub fn hooks_status(installer: State<'_, Arc<dyn HookInstaller>>) -> Result<HookStatus, String> {
    installer.status().map_err(|e| e.to_string())
}

/// Install the hooks and report the resulting status
#[tauri::command]
pub fn hooks_install(installer: State<'_, Arc<dyn HookInstaller>>) -> Result<HookStatus, String> {
    installer.install().map_err(|e| e.to_string())?;
    installer.status().map_err(|e| e.to_string())
}
