/// Configuration
/// Loaded from `<config dir>/agentcockpit/config.json`, falling back to
/// defaults, then overridden from the environment.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::TerminalDimensions;
use crate::services::notification_bus::RetentionPolicy;

/// Names the owning slot inside every spawned session
pub const TERMINAL_ID_ENV: &str = "AGENTCOCKPIT_TERMINAL_ID";
/// Where hook scripts should POST their reports
pub const HOOK_URL_ENV: &str = "AGENTCOCKPIT_HOOK_URL";

pub const DEFAULT_INGRESS_PORT: u16 = 19847;
pub const DEFAULT_INGRESS_PATH: &str = "/hook";

const PORT_ENV: &str = "AGENTCOCKPIT_INGRESS_PORT";
const DEDUP_WINDOW_ENV: &str = "AGENTCOCKPIT_DEDUP_WINDOW_SECS";
const DATA_DIR_ENV: &str = "AGENTCOCKPIT_DATA_DIR";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct CockpitConfig {
    pub sessions: SessionConfig,
    pub ingress: IngressConfig,
    pub dedup: DedupConfig,
    pub bus: BusConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell binary; `$SHELL` or `/bin/bash` when unset
    pub shell: Option<String>,
    /// Start shells with `-l`
    pub login_shell: bool,
    /// Prepend NVM/Homebrew/local bin directories to `PATH`
    pub extend_path: bool,
    /// Working directory when a request names none; home directory when unset
    pub default_cwd: Option<PathBuf>,
    pub default_cols: u16,
    pub default_rows: u16,
    /// Bound of the PTY output hand-off; readers block when it is full
    pub output_channel_capacity: usize,
    /// How long a slot stays unavailable after its session ended
    pub slot_reuse_delay_ms: u64,
    /// How long shutdown waits for children before escalating
    pub shutdown_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: None,
            login_shell: true,
            extend_path: true,
            default_cwd: None,
            default_cols: 80,
            default_rows: 24,
            output_channel_capacity: 256,
            slot_reuse_delay_ms: 0,
            shutdown_grace_ms: 1500,
        }
    }
}

impl SessionConfig {
    pub fn default_dimensions(&self) -> TerminalDimensions {
        TerminalDimensions::new(self.default_cols, self.default_rows)
    }

    pub fn slot_reuse_delay(&self) -> Duration {
        Duration::from_millis(self.slot_reuse_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn default_working_dir(&self) -> PathBuf {
        self.default_cwd
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct IngressConfig {
    pub host: IpAddr,
    pub port: u16,
    pub path: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_INGRESS_PORT,
            path: DEFAULT_INGRESS_PATH.to_string(),
        }
    }
}

impl IngressConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn hook_url(&self) -> String {
        hook_url_for(self.socket_addr(), &self.path)
    }
}

/// `http://host:port/path` for an ingress listening on `addr`
pub fn hook_url_for(addr: SocketAddr, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    format!("http://{}{}", addr, path)
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DedupConfig {
    /// Suppression window in seconds
    pub window_secs: u64,
    /// Entries older than `window_secs * eviction_multiple` are evicted
    pub eviction_multiple: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: 3,
            eviction_multiple: 4,
        }
    }
}

impl DedupConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BusConfig {
    /// Store directory; platform data dir when unset
    pub dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub retention_max_age_secs: u64,
    pub retention_max_processed: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dir: None,
            poll_interval_ms: 500,
            retention_max_age_secs: 24 * 60 * 60,
            retention_max_processed: 500,
        }
    }
}

impl BusConfig {
    pub fn store_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("agentcockpit")
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: Duration::from_secs(self.retention_max_age_secs),
            max_processed: self.retention_max_processed,
        }
    }
}

impl CockpitConfig {
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("agentcockpit").join("config.json"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location and apply environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(io_err)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|var| std::env::var(var).ok())
    }

    fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(PORT_ENV) {
            self.ingress.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var: PORT_ENV, value })?;
        }
        if let Some(value) = lookup(DEDUP_WINDOW_ENV) {
            self.dedup.window_secs = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var: DEDUP_WINDOW_ENV, value })?;
        }
        if let Some(value) = lookup(DATA_DIR_ENV) {
            if !value.trim().is_empty() {
                self.bus.dir = Some(PathBuf::from(value));
            }
        }
        Ok(())
    }
}

/// Slot id a hook script should report, from its inherited environment.
///
/// Falls back to the sentinel `"0"` outside cockpit sessions.
pub fn terminal_id_from_env() -> String {
    std::env::var(TERMINAL_ID_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "0".to_string())
}

/// Ingress URL a hook script should POST to
pub fn hook_url_from_env() -> String {
    std::env::var(HOOK_URL_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| IngressConfig::default().hook_url())
}
