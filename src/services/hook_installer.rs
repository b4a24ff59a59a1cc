/// Hook Installer
/// Registers `cockpit-hook` with the external CLI so its lifecycle events
/// reach the ingress. The core only needs the trait; the Claude settings
/// implementation edits `settings.json` in place and leaves every other key
/// alone.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::InstallError;

pub const HOOK_BINARY_NAME: &str = "cockpit-hook";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    NotInstalled,
    Partial,
    Installed,
}

pub trait HookInstaller: Send + Sync {
    fn status(&self) -> Result<HookStatus, InstallError>;

    /// Register every hook; calling it again changes nothing
    fn install(&self) -> Result<(), InstallError>;

    fn is_installed(&self) -> bool {
        matches!(self.status(), Ok(HookStatus::Installed))
    }
}

/// CLI lifecycle event -> cockpit event type
const REGISTRATIONS: &[(&str, &str)] = &[
    ("Stop", "session_finished"),
    ("Notification", "confirmation_needed"),
];

#[derive(Debug, Clone)]
pub struct ClaudeSettingsInstaller {
    settings_path: PathBuf,
    hook_binary: PathBuf,
}

impl ClaudeSettingsInstaller {
    pub fn new(settings_path: impl Into<PathBuf>, hook_binary: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: settings_path.into(),
            hook_binary: hook_binary.into(),
        }
    }

    /// `~/.claude/settings.json`, with the hook binary next to the running
    /// executable when it is there and resolved through `PATH` otherwise
    pub fn default_for_user() -> Result<Self, InstallError> {
        let home = dirs::home_dir().ok_or(InstallError::NoHomeDir)?;
        let sibling = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(HOOK_BINARY_NAME)))
            .filter(|path| path.exists());
        let hook_binary = sibling.unwrap_or_else(|| PathBuf::from(HOOK_BINARY_NAME));
        Ok(Self::new(home.join(".claude").join("settings.json"), hook_binary))
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    fn command_for(&self, event_type: &str) -> String {
        let binary = self.hook_binary.to_string_lossy();
        if binary.contains(' ') {
            format!("\"{}\" {}", binary, event_type)
        } else {
            format!("{} {}", binary, event_type)
        }
    }

    fn read_settings(&self) -> Result<Map<String, Value>, InstallError> {
        let path = &self.settings_path;
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(InstallError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(InstallError::Layout {
                path: path.clone(),
                reason: "top level is not an object".to_string(),
            }),
            Err(source) => Err(InstallError::Parse {
                path: path.clone(),
                source,
            }),
        }
    }

    fn write_settings(&self, settings: &Map<String, Value>) -> Result<(), InstallError> {
        let path = &self.settings_path;
        let io_err = |source| InstallError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(settings).map_err(|source| InstallError::Parse {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }
}

impl HookInstaller for ClaudeSettingsInstaller {
    fn status(&self) -> Result<HookStatus, InstallError> {
        let settings = self.read_settings()?;
        let present = REGISTRATIONS
            .iter()
            .filter(|(cli_event, event_type)| {
                has_registration(&settings, cli_event, &self.command_for(event_type))
            })
            .count();
        Ok(match present {
            0 => HookStatus::NotInstalled,
            n if n == REGISTRATIONS.len() => HookStatus::Installed,
            _ => HookStatus::Partial,
        })
    }

    fn install(&self) -> Result<(), InstallError> {
        let mut settings = self.read_settings()?;
        let path = &self.settings_path;
        let layout_err = |reason: &str| InstallError::Layout {
            path: path.clone(),
            reason: reason.to_string(),
        };

        let mut changed = false;
        for (cli_event, event_type) in REGISTRATIONS {
            let command = self.command_for(event_type);
            if has_registration(&settings, cli_event, &command) {
                continue;
            }
            let hooks = settings
                .entry("hooks")
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
                .ok_or_else(|| layout_err("\"hooks\" is not an object"))?;
            let matchers = hooks
                .entry(cli_event.to_string())
                .or_insert_with(|| Value::Array(Vec::new()))
                .as_array_mut()
                .ok_or_else(|| layout_err("hook event entry is not an array"))?;
            matchers.push(json!({
                "matcher": "",
                "hooks": [{ "type": "command", "command": command }],
            }));
            changed = true;
        }

        if changed {
            self.write_settings(&settings)?;
            log::info!("Installed cockpit hooks into {}", path.display());
        } else {
            log::debug!("Cockpit hooks already present in {}", path.display());
        }
        Ok(())
    }
}

fn has_registration(settings: &Map<String, Value>, cli_event: &str, command: &str) -> bool {
    settings
        .get("hooks")
        .and_then(|hooks| hooks.get(cli_event))
        .and_then(Value::as_array)
        .map(|matchers| {
            matchers
                .iter()
                .filter_map(|m| m.get("hooks").and_then(Value::as_array))
                .flatten()
                .any(|hook| hook.get("command").and_then(Value::as_str) == Some(command))
        })
        .unwrap_or(false)
}
