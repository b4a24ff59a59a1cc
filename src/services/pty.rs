/// PTY Session
/// One pseudo-terminal-backed shell bound to a slot.
///
/// Output is read on a dedicated thread and handed to the session manager
/// through a bounded channel. When the channel is full the reader blocks,
/// which in turn stalls the child on a full PTY buffer; no bytes are dropped.
/// Input goes the other way through a writer thread, so a child that stops
/// reading stdin never blocks the caller.
///
/// The shell's exit is watched on a third thread that owns the child and
/// reports `Reaped` once it is collected. PTY EOF alone is not enough: a
/// background job that inherited the terminal keeps it open after the shell
/// is gone. The waiter gives the reader `EXIT_LINGER` to reach EOF first so
/// the last output lands before the exit.
///
/// `kill()` is advisory. It signals the shell's process group and returns
/// without waiting. Descendants that moved to another process group (shell
/// job control, daemons) are not signalled.

use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::TERMINAL_ID_ENV;
use crate::error::SessionError;
use crate::models::{SessionInfo, SessionState, SlotId, TerminalDimensions};
use crate::services::shell_env;

/// How long the waiter holds an exit back for the reader to drain the PTY
const EXIT_LINGER: Duration = Duration::from_millis(250);

/// Everything the reader and waiter threads report back to the manager.
///
/// `generation` tells a reused slot's new session apart from its predecessor.
#[derive(Debug)]
pub enum SessionEvent {
    Output {
        slot: SlotId,
        generation: u64,
        data: Vec<u8>,
    },
    /// The PTY reached EOF
    Closed { slot: SlotId, generation: u64 },
    /// The shell exited and was collected
    Reaped {
        slot: SlotId,
        generation: u64,
        code: Option<u32>,
    },
    Shutdown,
}

/// How to launch the shell
#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub program: String,
    pub login: bool,
    pub extend_path: bool,
    /// Extra variables, e.g. the hook ingress URL
    pub env: Vec<(String, String)>,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            program: shell_env::default_shell(),
            login: true,
            extend_path: true,
            env: Vec::new(),
        }
    }
}

pub struct PtySession {
    slot: SlotId,
    generation: u64,
    master: Box<dyn MasterPty + Send>,
    input: Option<Sender<Vec<u8>>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
    working_dir: PathBuf,
    dimensions: TerminalDimensions,
    state: SessionState,
    created_at: DateTime<Utc>,
}

impl PtySession {
    /// Spawn the shell in `working_dir` with the slot id in its environment.
    ///
    /// `command`, when given, runs as `shell -c <command>`.
    pub fn spawn(
        slot: SlotId,
        generation: u64,
        working_dir: &Path,
        dimensions: TerminalDimensions,
        shell: &ShellOptions,
        command: Option<&str>,
        events: SyncSender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let spawn_err = |reason: String| SessionError::Spawn { slot, reason };

        if !working_dir.is_dir() {
            return Err(spawn_err(format!(
                "working directory {} does not exist",
                working_dir.display()
            )));
        }

        let path_var = if shell.extend_path {
            shell_env::build_extended_path()
        } else {
            std::env::var("PATH").unwrap_or_default()
        };
        let program = shell_env::locate_program(&shell.program, &path_var)
            .ok_or_else(|| spawn_err(format!("shell '{}' not found", shell.program)))?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(to_pty_size(dimensions))
            .map_err(|e| spawn_err(format!("failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&program);
        if shell.login {
            cmd.arg("-l");
        }
        if let Some(command) = command {
            cmd.arg("-c");
            cmd.arg(command);
        }
        cmd.cwd(working_dir);

        // Set environment variables for proper terminal
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("PWD", working_dir);
        cmd.env("PATH", &path_var);
        cmd.env(TERMINAL_ID_ENV, slot.to_string());
        for (key, value) in &shell.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_err(format!("failed to spawn shell: {}", e)))?;
        // The child holds its own copy; ours would keep the PTY open past exit
        drop(pair.slave);

        let mut killer = child.clone_killer();
        let pid = child.process_id();
        let exited = Arc::new(AtomicBool::new(false));
        let (eof_tx, eof_rx) = channel::<()>();

        let started = spawn_waiter(slot, generation, child, exited.clone(), eof_rx, events.clone())
            .map_err(|e| spawn_err(format!("failed to start PTY threads: {}", e)))
            .and_then(|()| {
                pair.master
                    .try_clone_reader()
                    .and_then(|reader| Ok((reader, pair.master.take_writer()?)))
                    .map_err(|e| spawn_err(format!("failed to attach to PTY: {}", e)))
            })
            .and_then(|(reader, writer)| {
                spawn_reader(slot, generation, reader, eof_tx, events)
                    .and_then(|()| spawn_writer(slot, writer))
                    .map_err(|e| spawn_err(format!("failed to start PTY threads: {}", e)))
            });

        let input = match started {
            Ok(input) => input,
            Err(err) => {
                let _ = killer.kill();
                return Err(err);
            }
        };

        log::info!(
            "Spawned {} for slot {} (pid {:?}) in {}",
            program.display(),
            slot,
            pid,
            working_dir.display()
        );

        Ok(Self {
            slot,
            generation,
            master: pair.master,
            input: Some(input),
            killer,
            pid,
            exited,
            working_dir: working_dir.to_path_buf(),
            dimensions,
            state: SessionState::Running,
            created_at: Utc::now(),
        })
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn process_id(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the waiter thread has collected the shell
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub fn dimensions(&self) -> TerminalDimensions {
        self.dimensions
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            slot: self.slot,
            pid: self.process_id(),
            working_dir: self.working_dir.clone(),
            dimensions: self.dimensions,
            state: self.state.clone(),
            created_at: self.created_at,
        }
    }

    /// Queue raw input for the PTY.
    ///
    /// Returns whether the bytes were queued. Input for a session that is no
    /// longer running is dropped and logged, as is input the PTY refuses
    /// during the exit race.
    pub fn write(&mut self, data: &[u8]) -> bool {
        let queued = self.state.is_live()
            && self
                .input
                .as_ref()
                .is_some_and(|input| input.send(data.to_vec()).is_ok());
        if !queued {
            log::debug!(
                "Dropping {} input bytes for slot {} ({:?})",
                data.len(),
                self.slot,
                self.state
            );
        }
        queued
    }

    /// Propagate a size change; the child sees SIGWINCH
    pub fn resize(&mut self, dimensions: TerminalDimensions) -> Result<(), SessionError> {
        if !self.state.is_live() {
            return Ok(());
        }
        self.master
            .resize(to_pty_size(dimensions))
            .map_err(|e| SessionError::Pty {
                slot: self.slot,
                reason: format!("resize failed: {}", e),
            })?;
        self.dimensions = dimensions;
        Ok(())
    }

    /// Ask the shell to terminate. See the module docs for the limits.
    pub fn kill(&mut self) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        self.state = SessionState::Killed;

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                signal_process_group(pid, libc::SIGHUP).map_err(|e| SessionError::Pty {
                    slot: self.slot,
                    reason: format!("SIGHUP failed: {}", e),
                })?;
                signal_process_group(pid, libc::SIGTERM).map_err(|e| SessionError::Pty {
                    slot: self.slot,
                    reason: format!("SIGTERM failed: {}", e),
                })?;
                return Ok(());
            }
        }

        self.killer.kill().map_err(|e| SessionError::Pty {
            slot: self.slot,
            reason: format!("kill failed: {}", e),
        })
    }

    /// Last-resort termination once the shutdown grace period ran out
    pub fn force_kill(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                if let Err(e) = signal_process_group(pid, libc::SIGKILL) {
                    log::warn!("SIGKILL to process group {} failed: {}", pid, e);
                }
                return;
            }
        }

        if let Err(e) = self.killer.kill() {
            log::warn!("Kill for slot {} failed: {}", self.slot, e);
        }
    }

    /// Record natural exit; a killed session stays `Killed`
    pub fn mark_exited(&mut self, code: Option<u32>) {
        if self.state.is_live() {
            self.state = SessionState::Exited { code };
        }
    }
}

fn to_pty_size(dimensions: TerminalDimensions) -> PtySize {
    PtySize {
        rows: dimensions.rows,
        cols: dimensions.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn spawn_reader(
    slot: SlotId,
    generation: u64,
    mut reader: Box<dyn Read + Send>,
    eof: Sender<()>,
    events: SyncSender<SessionEvent>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-reader-{}", slot))
        .spawn(move || {
            // Dropped after `Closed` is queued, which releases the waiter
            let _eof = eof;
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let event = SessionEvent::Output {
                            slot,
                            generation,
                            data: buf[..n].to_vec(),
                        };
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    // EIO once the child side is gone
                    Err(_) => break,
                }
            }
            let _ = events.send(SessionEvent::Closed { slot, generation });
        })
        .map(|_| ())
}

fn spawn_waiter(
    slot: SlotId,
    generation: u64,
    mut child: Box<dyn Child + Send + Sync>,
    exited: Arc<AtomicBool>,
    eof: Receiver<()>,
    events: SyncSender<SessionEvent>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-waiter-{}", slot))
        .spawn(move || {
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code()),
                Err(e) => {
                    log::warn!("Waiting on the shell in slot {} failed: {}", slot, e);
                    None
                }
            };
            exited.store(true, Ordering::SeqCst);
            let _ = eof.recv_timeout(EXIT_LINGER);
            let _ = events.send(SessionEvent::Reaped {
                slot,
                generation,
                code,
            });
        })
        .map(|_| ())
}

fn spawn_writer(
    slot: SlotId,
    mut writer: Box<dyn Write + Send>,
) -> std::io::Result<Sender<Vec<u8>>> {
    let (tx, rx) = channel::<Vec<u8>>();
    thread::Builder::new()
        .name(format!("pty-writer-{}", slot))
        .spawn(move || {
            for data in rx {
                if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                    log::debug!("Dropping {} input bytes for slot {}: {}", data.len(), slot, e);
                }
            }
        })?;
    Ok(tx)
}

/// Send `signal` to the process group led by `pid`. A group that no longer
/// exists is not an error.
#[cfg(unix)]
pub fn signal_process_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let Ok(pgid) = i32::try_from(pid) else {
        return Ok(());
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group.
    let result = unsafe { libc::kill(-pgid, signal) };
    if result == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}
