//! PTY-backed bridge shell sessions.
//!
//! A [`Session`] owns one remote shell started through the bridge CLI under
//! a pseudo-terminal. Output is moved off the pty by a dedicated blocking
//! reader thread and handed over a channel to the session's pump task, which
//! sanitizes it, appends it to the output buffer and notifies callbacks.
//!
//! The pump is the only writer of the buffer and, together with
//! [`Session::close`], the only code that flips `active` to false.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::transport::{BridgeCommand, PtyProcess, TermSize, TransportSpawner};
use crate::sanitize::sanitize;

/// Unique identifier for a session.
pub type SessionId = String;

/// Push-style output listener, called with `(session_id, chunk)`.
pub type OutputCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Appended when the pty reports EOF or a read error.
pub const PROCESS_TERMINATED_MARKER: &str = "\n[Process terminated]\n";

/// Appended when the process is found dead while the pty is idle.
pub const CONNECTION_CLOSED_MARKER: &str = "\n[Connection closed]\n";

/// Buffer size for reading from the pty.
const READ_BUFFER_SIZE: usize = 4096;

/// How often `close` checks whether a terminated process has exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long `close` waits for a killed process to be reaped.
const KILL_REAP_TIMEOUT: Duration = Duration::from_millis(200);

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session was not found.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The session is no longer active.
    #[error("session already terminated: {0}")]
    AlreadyTerminated(SessionId),

    /// The bridge executable could not be located.
    #[error("device bridge is not available")]
    BridgeUnavailable,

    /// No device was given and none is connected.
    #[error("no connected device")]
    NoDevice,

    /// Listing devices through the bridge failed.
    #[error("failed to query devices: {0}")]
    DeviceQuery(String),

    /// The configured session limit has been reached.
    #[error("maximum number of sessions reached ({0})")]
    LimitReached(usize),

    /// Failed to spawn the bridge shell.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the pty.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the pty.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),
}

impl SessionError {
    /// Short machine-readable classification, used on the IPC wire.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "not_found",
            SessionError::AlreadyTerminated(_) => "terminated",
            SessionError::BridgeUnavailable
            | SessionError::NoDevice
            | SessionError::DeviceQuery(_) => "unavailable",
            SessionError::LimitReached(_) => "limit_reached",
            SessionError::SpawnFailed(_) => "spawn_failed",
            SessionError::WriteFailed(_) | SessionError::ResizeFailed(_) => "io",
        }
    }
}

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Initial terminal size.
    pub size: TermSize,
    /// Longest the pump waits for output before checking liveness.
    pub poll_interval: Duration,
    /// How long `close` waits after SIGTERM before killing.
    pub close_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            size: TermSize::default(),
            poll_interval: Duration::from_millis(50),
            close_grace: Duration::from_millis(500),
        }
    }
}

/// Result of a drain: buffered text plus the liveness flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledOutput {
    pub output: String,
    pub active: bool,
}

/// A remote shell running under a pseudo-terminal.
pub struct Session {
    id: SessionId,
    device_id: String,
    created_at: u64,
    pid: Option<u32>,
    close_grace: Duration,

    /// The child process and pty master; `None` once the session has been
    /// closed.
    process: Mutex<Option<Box<dyn PtyProcess>>>,

    /// Terminal input. Kept apart from `process` so a blocked write cannot
    /// hold up the liveness check or `close`.
    writer: Mutex<Option<Box<dyn Write + Send>>>,

    active: AtomicBool,

    /// Sanitized chunks since the last drain.
    buffer: Mutex<Vec<String>>,

    callbacks: RwLock<HashMap<String, OutputCallback>>,

    size: Mutex<TermSize>,
}

impl Session {
    /// Spawns `<bridge> -s <device_id> shell` under a pty and starts the pump.
    ///
    /// Must be called from within a Tokio runtime. On error nothing is left
    /// running.
    pub fn start(
        id: SessionId,
        device_id: &str,
        bridge: &Path,
        spawner: &dyn TransportSpawner,
        options: &SessionOptions,
    ) -> Result<Arc<Self>, SessionError> {
        let command = BridgeCommand::shell(bridge, device_id);
        let mut process = spawner.spawn(&command, options.size)?;

        let (reader, writer) = match process
            .take_reader()
            .and_then(|reader| Ok((reader, process.take_writer()?)))
        {
            Ok(pair) => pair,
            Err(e) => {
                let _ = process.kill();
                return Err(e);
            }
        };

        let session = Arc::new(Self {
            id,
            device_id: device_id.to_string(),
            created_at: unix_now(),
            pid: process.process_id(),
            close_grace: options.close_grace,
            process: Mutex::new(Some(process)),
            writer: Mutex::new(Some(writer)),
            active: AtomicBool::new(true),
            buffer: Mutex::new(Vec::new()),
            callbacks: RwLock::new(HashMap::new()),
            size: Mutex::new(options.size),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = std::thread::Builder::new()
            .name(format!("pty-reader-{}", session.id))
            .spawn(move || read_loop(reader, tx));

        if let Err(e) = spawned {
            session.active.store(false, Ordering::SeqCst);
            if let Some(mut process) = lock(&session.process).take() {
                let _ = process.kill();
            }
            return Err(SessionError::SpawnFailed(format!(
                "failed to start reader thread: {}",
                e
            )));
        }

        tokio::spawn(pump(Arc::clone(&session), rx, options.poll_interval));

        info!(
            session_id = %session.id,
            device_id = %session.device_id,
            pid = ?session.pid,
            "Started bridge shell session"
        );

        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Unix timestamp (seconds) of creation.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn size(&self) -> TermSize {
        *lock(&self.size)
    }

    /// Whether the shell is alive and the pump is running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Sends a line of input to the shell.
    ///
    /// A trailing newline is appended unless `data` already ends with one.
    pub fn write_input(&self, data: &str) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::AlreadyTerminated(self.id.clone()));
        }

        let mut payload = data.to_string();
        if !payload.ends_with('\n') {
            payload.push('\n');
        }

        let mut guard = lock(&self.writer);
        let writer = guard
            .as_mut()
            .ok_or_else(|| SessionError::AlreadyTerminated(self.id.clone()))?;

        writer
            .write_all(payload.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| {
                warn!(session_id = %self.id, error = %e, "Failed to write to PTY");
                SessionError::WriteFailed(e.to_string())
            })
    }

    /// Resizes the pseudo-terminal. Failure leaves the session usable.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::AlreadyTerminated(self.id.clone()));
        }

        let size = TermSize::new(rows, cols);
        let mut guard = lock(&self.process);
        let process = guard
            .as_mut()
            .ok_or_else(|| SessionError::AlreadyTerminated(self.id.clone()))?;

        process
            .resize(size)
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;
        *lock(&self.size) = size;

        debug!(session_id = %self.id, rows, cols, "Resized PTY");
        Ok(())
    }

    /// Concatenation of all chunks buffered since the last drain.
    pub fn get_buffer(&self) -> String {
        lock(&self.buffer).concat()
    }

    /// Empties the buffer.
    ///
    /// Paired with [`get_buffer`](Self::get_buffer) this is best effort: a
    /// chunk appended between the two calls is lost. Use
    /// [`drain_buffer`](Self::drain_buffer) for an atomic drain.
    pub fn clear_buffer(&self) {
        lock(&self.buffer).clear();
    }

    /// Takes and clears the buffer in one step.
    pub fn drain_buffer(&self) -> String {
        std::mem::take(&mut *lock(&self.buffer)).concat()
    }

    /// Reads the liveness flag, then drains.
    ///
    /// The pump appends its exit marker before it clears `active`, so a poll
    /// that reports `active == false` has already received the marker.
    pub fn poll(&self) -> PolledOutput {
        let active = self.is_active();
        PolledOutput {
            output: self.drain_buffer(),
            active,
        }
    }

    /// Number of chunks buffered since the last drain.
    pub fn buffered_chunks(&self) -> usize {
        lock(&self.buffer).len()
    }

    /// Registers a listener invoked with every new sanitized chunk.
    pub fn add_callback(&self, callback_id: impl Into<String>, callback: OutputCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(callback_id.into(), callback);
    }

    /// Removes a listener. Returns whether it was registered.
    pub fn remove_callback(&self, callback_id: &str) -> bool {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(callback_id)
            .is_some()
    }

    /// Stops the session and releases the process.
    ///
    /// Sends SIGTERM, waits up to the grace period, then kills. Does not wait
    /// for the pump; it notices `active == false` on its next iteration, nor
    /// for a write in progress. Closing an already closed session does
    /// nothing.
    pub async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);

        let Some(mut process) = lock(&self.process).take() else {
            return;
        };
        self.release_writer();

        if let Ok(Some(code)) = process.try_wait() {
            debug!(session_id = %self.id, exit_code = code, "Process already exited");
            return;
        }

        if let Err(e) = process.terminate() {
            debug!(session_id = %self.id, error = %e, "Failed to send SIGTERM");
        }

        if let Some(code) = wait_for_exit(process.as_mut(), self.close_grace).await {
            info!(session_id = %self.id, exit_code = code, "Session closed");
            return;
        }

        if let Err(e) = process.kill() {
            warn!(session_id = %self.id, error = %e, "Failed to kill process");
        }
        let _ = wait_for_exit(process.as_mut(), KILL_REAP_TIMEOUT).await;

        info!(session_id = %self.id, "Session killed after grace period");
    }

    /// Drops the writer unless a write holds it; a blocked writer is released
    /// with the session.
    fn release_writer(&self) {
        match self.writer.try_lock() {
            Ok(mut writer) => drop(writer.take()),
            Err(TryLockError::Poisoned(poisoned)) => drop(poisoned.into_inner().take()),
            Err(TryLockError::WouldBlock) => {
                debug!(session_id = %self.id, "Write in progress; writer released on drop");
            }
        }
    }

    /// Sanitizes a decoded chunk, buffers it and notifies callbacks.
    fn handle_output(&self, raw: &str) {
        let clean = sanitize(raw);
        if clean.is_empty() {
            return;
        }
        lock(&self.buffer).push(clean.clone());
        self.notify(&clean);
    }

    /// Marks the session inactive and buffers `marker`, unless something
    /// else already ended the session.
    fn finish(&self, marker: &str) {
        let clean = sanitize(marker);
        {
            let mut buffer = lock(&self.buffer);
            if !self.active.load(Ordering::SeqCst) {
                return;
            }
            buffer.push(clean.clone());
            self.active.store(false, Ordering::SeqCst);
        }
        self.notify(&clean);
    }

    fn notify(&self, chunk: &str) {
        // Snapshot so callbacks may add or remove listeners.
        let callbacks: Vec<(String, OutputCallback)> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, cb)| (id.clone(), Arc::clone(cb)))
            .collect();

        for (callback_id, callback) in callbacks {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&self.id, chunk)
            }));
            if result.is_err() {
                error!(
                    session_id = %self.id,
                    callback_id = %callback_id,
                    "Output callback panicked"
                );
            }
        }
    }

    /// Non-blocking liveness check used by the pump.
    fn exit_status(&self) -> io::Result<Option<u32>> {
        match lock(&self.process).as_mut() {
            Some(process) => process.try_wait(),
            None => Ok(None),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let process = self
            .process
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut process) = process {
            let _ = process.kill();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("pid", &self.pid)
            .field("active", &self.is_active())
            .finish()
    }
}

/// What the reader thread saw on the pty.
enum ReadEvent {
    Data(Vec<u8>),
    Eof,
    Failed(io::Error),
}

/// Blocking read loop; runs on its own thread until EOF or error.
fn read_loop(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<ReadEvent>) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => {
                let _ = tx.send(ReadEvent::Eof);
                break;
            }
            Ok(n) => {
                if tx.send(ReadEvent::Data(buffer[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(ReadEvent::Failed(e));
                break;
            }
        }
    }
}

/// The session's output pump.
async fn pump(
    session: Arc<Session>,
    mut rx: mpsc::UnboundedReceiver<ReadEvent>,
    poll_interval: Duration,
) {
    let mut decoder = Utf8Decoder::default();

    loop {
        if !session.is_active() {
            debug!(session_id = %session.id, "Pump stopping: session closed");
            break;
        }

        match tokio::time::timeout(poll_interval, rx.recv()).await {
            Ok(Some(ReadEvent::Data(bytes))) => {
                let text = decoder.decode(&bytes);
                if !text.is_empty() {
                    session.handle_output(&text);
                }
            }
            Ok(Some(ReadEvent::Eof)) | Ok(None) => {
                info!(session_id = %session.id, "PTY EOF - process exited");
                session.finish(PROCESS_TERMINATED_MARKER);
                break;
            }
            Ok(Some(ReadEvent::Failed(e))) => {
                // EIO is how Linux reports a hung-up pty after the child exits.
                if session.is_active() {
                    info!(session_id = %session.id, error = %e, "PTY read ended");
                }
                session.finish(PROCESS_TERMINATED_MARKER);
                break;
            }
            Err(_elapsed) => match session.exit_status() {
                Ok(Some(code)) => {
                    // Deliver what the reader already forwarded before the marker.
                    while let Ok(ReadEvent::Data(bytes)) = rx.try_recv() {
                        let text = decoder.decode(&bytes);
                        if !text.is_empty() {
                            session.handle_output(&text);
                        }
                    }
                    info!(session_id = %session.id, exit_code = code, "Bridge shell exited");
                    session.finish(CONNECTION_CLOSED_MARKER);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Liveness check failed");
                }
            },
        }
    }
}

/// Polls `try_wait` until the process exits or `timeout` elapses.
async fn wait_for_exit(process: &mut dyn PtyProcess, timeout: Duration) -> Option<u32> {
    let deadline = Instant::now() + timeout;
    loop {
        match process.try_wait() {
            Ok(Some(code)) => return Some(code),
            Ok(None) if Instant::now() < deadline => tokio::time::sleep(EXIT_POLL_INTERVAL).await,
            _ => return None,
        }
    }
}

/// Incremental UTF-8 decoding across read boundaries.
///
/// An incomplete multi-byte sequence at the end of a read is held back and
/// completed by the next read; invalid bytes become U+FFFD.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
