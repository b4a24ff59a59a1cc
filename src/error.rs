/// Error types
/// One enum per concern. The desktop command layer flattens these to
/// `String` with `map_err(|e| e.to_string())`.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::SlotId;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn session for slot {slot}: {reason}")]
    Spawn { slot: SlotId, reason: String },
    #[error("slot {0} already has a live session")]
    SlotBusy(SlotId),
    #[error("slot {0} cannot host a session")]
    InvalidSlot(SlotId),
    #[error("no session in slot {0}")]
    NotFound(SlotId),
    #[error("pty operation failed for slot {slot}: {reason}")]
    Pty { slot: SlotId, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("slot {0} is already occupied")]
    DuplicateSlot(SlotId),
    #[error("slot {0} is empty")]
    NotFound(SlotId),
}

impl From<RegistryError> for SessionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateSlot(slot) => SessionError::SlotBusy(slot),
            RegistryError::NotFound(slot) => SessionError::NotFound(slot),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("malformed hook report: {0}")]
    Parse(String),
    #[error("cannot bind hook ingress on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("hook ingress must listen on a loopback address, not {0}")]
    NotLoopback(SocketAddr),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("notification store i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not lock notification store {path}: {reason}")]
    Lock { path: PathBuf, reason: String },
    #[error("notification store {path} is corrupt at line {line}: {reason}")]
    Corruption {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("could not encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no home directory to locate CLI settings")]
    NoHomeDir,
    #[error("could not access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("settings file {path} has an unexpected layout: {reason}")]
    Layout { path: PathBuf, reason: String },
}
