//! Unix Domain Socket IPC module for CLI-daemon communication.
//!
//! The CLI drives the daemon's session registry over a local socket. The
//! protocol is JSON newline-delimited: each message is a single JSON object
//! followed by a newline, one response per request, in order.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/ubterm/daemon.sock`
//! - Fallback: `/tmp/ubterm-$UID/daemon.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use ubterm::ipc::{IpcClient, IpcResponse, get_socket_path};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!
//!     if let IpcResponse::SessionCreated { session_id } = client.create_session(None).await? {
//!         client.write_input(session_id.clone(), "uname -a".into()).await?;
//!         println!("{:?}", client.poll_output(session_id).await?);
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod messages;
pub mod pidfile;
mod server;

pub use client::IpcClient;
pub use messages::{IpcRequest, IpcResponse, INVALID_REQUEST};
pub use pidfile::{get_daemon_pid, get_pid_file_path, is_daemon_running};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the socket path for IPC communication.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/ubterm/daemon.sock`
/// 2. Otherwise: `/tmp/ubterm-$UID/daemon.sock`
pub fn get_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) if !runtime_dir.is_empty() => {
            PathBuf::from(runtime_dir).join("ubterm").join("daemon.sock")
        }
        _ => {
            let uid = nix::unistd::getuid();
            PathBuf::from(format!("/tmp/ubterm-{}", uid)).join("daemon.sock")
        }
    }
}
