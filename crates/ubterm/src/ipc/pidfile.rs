//! PID file utilities for daemon running detection.
//!
//! The daemon writes its PID to `<data_dir>/daemon.pid` on start and removes
//! it on shutdown. The CLI reads it to decide whether a daemon is running and
//! which process to signal on a forced stop.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Name of the PID file inside the data directory.
pub const PID_FILE_NAME: &str = "daemon.pid";

/// Get the path to the daemon PID file for `data_dir`.
pub fn get_pid_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(PID_FILE_NAME)
}

/// Record the current process as the running daemon.
///
/// Creates the parent directory if needed.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", std::process::id()))
}

/// Remove the PID file, ignoring a missing file.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove PID file");
        }
    }
}

/// Check if a daemon process is currently running.
pub fn is_daemon_running(path: &Path) -> bool {
    get_daemon_pid(path).is_some()
}

/// Get the PID of the running daemon, if any.
///
/// Returns `None` when the file is missing, unparsable or names a dead
/// process. Stale files are removed.
pub fn get_daemon_pid(path: &Path) -> Option<u32> {
    let pid_str = fs::read_to_string(path).ok()?;

    let pid: u32 = match pid_str.trim().parse() {
        Ok(p) => p,
        Err(_) => {
            cleanup_stale_pid_file(path);
            return None;
        }
    };

    if is_process_running(pid) {
        Some(pid)
    } else {
        cleanup_stale_pid_file(path);
        None
    }
}

/// Check if a process with the given PID is running.
///
/// On Linux, this checks if `/proc/{pid}/stat` exists. Elsewhere it probes
/// with signal 0.
pub fn is_process_running(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        return Path::new(&format!("/proc/{}/stat", pid)).exists();
    }

    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => kill(Pid::from_raw(raw), None).is_ok(),
        _ => false,
    }
}

fn cleanup_stale_pid_file(path: &Path) {
    tracing::debug!(path = %path.display(), "Removing stale PID file");
    let _ = fs::remove_file(path);
}
