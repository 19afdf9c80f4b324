//! Pseudo-terminal transport for bridge shells.
//!
//! A session never talks to `portable-pty` directly. It asks a
//! [`TransportSpawner`] for a [`PtyProcess`] running the bridge's shell
//! subcommand against one device, which keeps the pump testable against
//! in-memory fakes.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};

use super::pty::SessionError;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

impl TermSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl From<TermSize> for PtySize {
    fn from(size: TermSize) -> Self {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Command line for a bridge subcommand bound to one device.
///
/// Renders as `<program> -s <device_id> <subcommand>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCommand {
    pub program: PathBuf,
    pub device_id: String,
    pub subcommand: String,
}

impl BridgeCommand {
    /// Interactive shell on `device_id`.
    pub fn shell(program: &Path, device_id: &str) -> Self {
        Self {
            program: program.to_path_buf(),
            device_id: device_id.to_string(),
            subcommand: "shell".to_string(),
        }
    }

    /// Arguments passed after the program path.
    pub fn args(&self) -> Vec<String> {
        vec![
            "-s".to_string(),
            self.device_id.clone(),
            self.subcommand.clone(),
        ]
    }
}

/// A child process attached to a pseudo-terminal.
///
/// Implementations are owned by exactly one session and accessed behind its
/// process mutex, so methods take `&mut self`. Input goes through the writer
/// handed out by [`take_writer`](Self::take_writer), which the session keeps
/// behind its own lock.
pub trait PtyProcess: Send {
    /// Hands out the output stream. Called once, right after spawning; the
    /// reader is moved onto a dedicated blocking thread.
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, SessionError>;

    /// Hands out the terminal input. Called once, right after spawning.
    fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, SessionError>;

    /// Returns the exit code if the process has exited, without blocking.
    fn try_wait(&mut self) -> io::Result<Option<u32>>;

    /// Asks the process to exit (SIGTERM).
    fn terminate(&mut self) -> io::Result<()>;

    /// Forcefully kills the process.
    fn kill(&mut self) -> io::Result<()>;

    /// Changes the terminal window size.
    fn resize(&mut self, size: TermSize) -> io::Result<()>;

    fn process_id(&self) -> Option<u32>;
}

/// Starts bridge commands under a pseudo-terminal.
pub trait TransportSpawner: Send + Sync {
    fn spawn(
        &self,
        command: &BridgeCommand,
        size: TermSize,
    ) -> Result<Box<dyn PtyProcess>, SessionError>;
}

/// Spawner backed by the platform's native pty implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySpawner;

impl TransportSpawner for NativePtySpawner {
    fn spawn(
        &self,
        command: &BridgeCommand,
        size: TermSize,
    ) -> Result<Box<dyn PtyProcess>, SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(size.into())
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(command.args());

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        // The slave must be closed on our side or the master never sees EOF
        // once the child exits.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        tracing::debug!(
            program = %command.program.display(),
            device_id = %command.device_id,
            pid = ?child.process_id(),
            "Spawned bridge shell"
        );

        Ok(Box::new(NativePtyProcess {
            master: pair.master,
            writer: Some(writer),
            child,
        }))
    }
}

/// [`PtyProcess`] over a `portable-pty` master and child.
struct NativePtyProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyProcess for NativePtyProcess {
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, SessionError> {
        self.master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(format!("failed to get PTY reader: {}", e)))
    }

    fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, SessionError> {
        self.writer
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("PTY writer already taken".into()))
    }

    fn try_wait(&mut self) -> io::Result<Option<u32>> {
        Ok(self.child.try_wait()?.map(|status| status.exit_code()))
    }

    fn terminate(&mut self) -> io::Result<()> {
        match self.child.process_id() {
            Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from),
            None => self.child.kill(),
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn resize(&mut self, size: TermSize) -> io::Result<()> {
        self.master.resize(size.into()).map_err(|e| io::Error::other(e.to_string()))
    }

    fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }
}
