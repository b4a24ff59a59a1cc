/// Session Manager
/// The only component that creates or destroys sessions. All lifecycle
/// transitions happen under one lock: commands from the UI take it directly,
/// and asynchronous completions (output, EOF, reaped children) are applied by
/// a single pump thread that drains the session event channel in FIFO order.
///
/// A session leaves its slot on whichever of EOF or the shell's exit comes
/// first. Each generation is reported closed exactly once: `destroy_session`
/// reports `Killed` itself; otherwise the exit status decides `Exited`, even
/// if the slot was reused in between.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{SessionConfig, HOOK_URL_ENV};
use crate::error::SessionError;
use crate::models::{SessionInfo, SessionState, SlotId, TerminalDimensions};
use crate::services::bridge::UiBridge;
use crate::services::ingress::SlotDirectory;
use crate::services::pty::{PtySession, SessionEvent, ShellOptions};
use crate::services::registry::SessionRegistry;
use crate::services::shell_env;

/// What to spawn; unset fields fall back to `SessionConfig`
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub slot: SlotId,
    pub working_dir: Option<PathBuf>,
    pub dimensions: Option<TerminalDimensions>,
    pub command: Option<String>,
}

impl SessionRequest {
    pub fn new(slot: u32) -> Self {
        Self {
            slot: SlotId(slot),
            working_dir: None,
            dimensions: None,
            command: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_dimensions(mut self, cols: u16, rows: u16) -> Self {
        self.dimensions = Some(TerminalDimensions::new(cols, rows));
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

struct ManagerState {
    registry: SessionRegistry,
    /// When each slot was last vacated, for the reuse delay
    released: HashMap<SlotId, Instant>,
    /// Generations that hit EOF first and still owe their exit report
    awaiting_exit: HashSet<u64>,
    next_generation: u64,
    shut_down: bool,
}

pub struct SessionManager {
    state: Arc<Mutex<ManagerState>>,
    events: SyncSender<SessionEvent>,
    config: SessionConfig,
    shell: ShellOptions,
    bridge: Arc<dyn UiBridge>,
    pump: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SessionManager {
    /// Start the manager and its pump thread.
    ///
    /// `hook_url` is exported to every session so hook scripts know where
    /// the ingress listens.
    pub fn new(config: SessionConfig, hook_url: Option<String>, bridge: Arc<dyn UiBridge>) -> Self {
        let (events_tx, events_rx) = sync_channel(config.output_channel_capacity.max(1));
        let state = Arc::new(Mutex::new(ManagerState {
            registry: SessionRegistry::new(),
            released: HashMap::new(),
            awaiting_exit: HashSet::new(),
            next_generation: 1,
            shut_down: false,
        }));

        let mut shell = ShellOptions {
            program: config.shell.clone().unwrap_or_else(shell_env::default_shell),
            login: config.login_shell,
            extend_path: config.extend_path,
            env: Vec::new(),
        };
        if let Some(url) = hook_url {
            shell.env.push((HOOK_URL_ENV.to_string(), url));
        }

        let pump_state = state.clone();
        let pump_bridge = bridge.clone();
        let pump = thread::Builder::new()
            .name("session-pump".to_string())
            .spawn(move || run_pump(pump_state, events_rx, pump_bridge))
            .map_err(|e| log::error!("Failed to start session pump: {}", e))
            .ok();

        Self {
            state,
            events: events_tx,
            config,
            shell,
            bridge,
            pump: Mutex::new(pump),
        }
    }

    /// Spawn a shell for `request.slot`
    pub fn create_session(&self, request: SessionRequest) -> Result<SessionInfo, SessionError> {
        let slot = request.slot;
        if slot.is_sentinel() {
            return Err(SessionError::InvalidSlot(slot));
        }

        let mut state = self.state.lock();
        if state.shut_down {
            return Err(SessionError::Spawn {
                slot,
                reason: "session manager is shutting down".to_string(),
            });
        }
        if state.registry.contains(slot) {
            return Err(SessionError::SlotBusy(slot));
        }
        if let Some(released_at) = state.released.get(&slot) {
            if released_at.elapsed() < self.config.slot_reuse_delay() {
                return Err(SessionError::SlotBusy(slot));
            }
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let working_dir = request
            .working_dir
            .unwrap_or_else(|| self.config.default_working_dir());
        let dimensions = request
            .dimensions
            .unwrap_or_else(|| self.config.default_dimensions());

        let session = PtySession::spawn(
            slot,
            generation,
            &working_dir,
            dimensions,
            &self.shell,
            request.command.as_deref(),
            self.events.clone(),
        )?;
        let info = session.info();
        state.registry.put(slot, session)?;
        state.released.remove(&slot);
        Ok(info)
    }

    /// Kill the session in `slot` and free the slot.
    ///
    /// The slot is freed even when the signal could not be delivered.
    pub fn destroy_session(&self, slot: SlotId) -> Result<(), SessionError> {
        let session = {
            let mut state = self.state.lock();
            let mut session = state
                .registry
                .remove(slot)
                .ok_or(SessionError::NotFound(slot))?;
            state.released.insert(slot, Instant::now());
            if let Err(e) = session.kill() {
                log::warn!("Kill for slot {} failed: {}", slot, e);
            }
            session
        };
        log::info!("Destroyed session in slot {}", slot);
        self.bridge.session_closed(slot, session.state());
        Ok(())
    }

    /// Forward input to the session in `slot`.
    ///
    /// Input for an empty slot is dropped; the UI may still be typing into
    /// a terminal whose shell just exited.
    pub fn write(&self, slot: SlotId, data: &[u8]) {
        let mut state = self.state.lock();
        match state.registry.get_mut(slot) {
            Ok(session) => {
                session.write(data);
            }
            Err(_) => log::debug!("Dropping {} input bytes for empty slot {}", data.len(), slot),
        }
    }

    pub fn resize(&self, slot: SlotId, cols: u16, rows: u16) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let session = state.registry.get_mut(slot)?;
        session.resize(TerminalDimensions::new(cols, rows))
    }

    pub fn is_live(&self, slot: SlotId) -> bool {
        let state = self.state.lock();
        state
            .registry
            .get(slot)
            .map(|s| s.state().is_live())
            .unwrap_or(false)
    }

    pub fn session(&self, slot: SlotId) -> Result<SessionInfo, SessionError> {
        let state = self.state.lock();
        Ok(state.registry.get(slot)?.info())
    }

    /// Live sessions ordered by slot
    pub fn list(&self) -> Vec<SessionInfo> {
        let state = self.state.lock();
        let mut sessions: Vec<SessionInfo> =
            state.registry.iter().map(|(_, s)| s.info()).collect();
        sessions.sort_by_key(|s| s.slot);
        sessions
    }

    /// Kill every session, wait up to the grace period for the children,
    /// SIGKILL whatever is left and stop the pump. Idempotent.
    pub fn shutdown(&self) {
        let sessions = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.registry.drain()
        };

        if !sessions.is_empty() {
            log::info!("Shutting down {} terminal sessions", sessions.len());
        }

        let mut sessions: Vec<(SlotId, PtySession)> = sessions
            .into_iter()
            .map(|(slot, mut session)| {
                if let Err(e) = session.kill() {
                    log::warn!("Kill for slot {} failed: {}", slot, e);
                }
                (slot, session)
            })
            .collect();

        let deadline = Instant::now() + self.config.shutdown_grace();
        while !sessions.is_empty() && Instant::now() < deadline {
            sessions.retain(|(_, session)| !session.has_exited());
            if !sessions.is_empty() {
                thread::sleep(Duration::from_millis(20));
            }
        }
        for (slot, mut session) in sessions {
            log::warn!("Slot {} did not exit within the grace period", slot);
            session.force_kill();
        }

        let _ = self.events.send(SessionEvent::Shutdown);
        if let Some(pump) = self.pump.lock().take() {
            let _ = pump.join();
        }
    }
}

impl SlotDirectory for SessionManager {
    fn is_live(&self, slot: SlotId) -> bool {
        SessionManager::is_live(self, slot)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_pump(
    state: Arc<Mutex<ManagerState>>,
    events: Receiver<SessionEvent>,
    bridge: Arc<dyn UiBridge>,
) {
    for event in events {
        match event {
            SessionEvent::Output {
                slot,
                generation,
                data,
            } => {
                let state = state.lock();
                match state.registry.get(slot) {
                    Ok(session) if session.generation() == generation && session.state().is_live() => {
                        bridge.output(slot, &data);
                    }
                    _ => log::trace!("Discarding {} late bytes for slot {}", data.len(), slot),
                }
            }
            SessionEvent::Closed { slot, generation } => {
                let mut state = state.lock();
                if take_current(&mut state, slot, generation).is_some() {
                    // The exit report follows once the waiter collects the shell
                    state.awaiting_exit.insert(generation);
                    log::debug!("PTY for slot {} closed", slot);
                }
            }
            SessionEvent::Reaped {
                slot,
                generation,
                code,
            } => {
                let mut state = state.lock();
                let closed = if state.awaiting_exit.remove(&generation) {
                    SessionState::Exited { code }
                } else if let Some(mut session) = take_current(&mut state, slot, generation) {
                    // Something that inherited the PTY outlives the shell
                    session.mark_exited(code);
                    session.state().clone()
                } else {
                    // Destroyed, already reported
                    continue;
                };
                log::info!("Session in slot {} exited with {:?}", slot, code);
                bridge.session_closed(slot, &closed);
            }
            SessionEvent::Shutdown => break,
        }
    }
}

/// Remove the session in `slot` if it is still `generation`, and start the
/// reuse delay
fn take_current(state: &mut ManagerState, slot: SlotId, generation: u64) -> Option<PtySession> {
    let current = state
        .registry
        .get(slot)
        .map(|s| s.generation() == generation)
        .unwrap_or(false);
    if !current {
        return None;
    }
    let session = state.registry.remove(slot)?;
    state.released.insert(slot, Instant::now());
    Some(session)
}
