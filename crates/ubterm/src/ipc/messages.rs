//! IPC message types for CLI-daemon communication.
//!
//! This module defines the request and response types used for communication
//! between the CLI and the daemon over Unix Domain Sockets.

use serde::{Deserialize, Serialize};

use crate::devices::DeviceInfo;
use crate::session::{SessionError, SessionSummary};

/// Error kind for requests that could not be parsed.
pub const INVALID_REQUEST: &str = "invalid_request";

/// Requests that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the daemon is alive.
    Ping,
    /// Get the current status of the daemon.
    Status,
    /// Request the daemon to stop gracefully.
    Stop,
    /// List devices visible to the bridge.
    ListDevices,
    /// List all active sessions.
    ListSessions,
    /// Start a shell on a device (the default device if `None`).
    CreateSession { device_id: Option<String> },
    /// Send a line of input to a session.
    WriteInput { session_id: String, input: String },
    /// Resize a session's terminal.
    Resize {
        session_id: String,
        rows: u16,
        cols: u16,
    },
    /// Drain a session's buffered output.
    PollOutput { session_id: String },
    /// Close and remove a session.
    CloseSession { session_id: String },
}

/// Responses sent from the daemon to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current daemon status.
    Status {
        /// Whether the daemon is running.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Number of registered sessions.
        session_count: usize,
        /// Configured session limit.
        max_sessions: usize,
        /// Whether a bridge executable was found.
        bridge_available: bool,
    },
    /// Acknowledgment that the daemon is stopping.
    Stopping,
    /// Devices reported by the bridge.
    Devices { devices: Vec<DeviceInfo> },
    /// List of active sessions.
    Sessions { sessions: Vec<SessionSummary> },
    /// A session was started.
    SessionCreated { session_id: String },
    /// The request succeeded and returns nothing.
    Ok,
    /// Output drained from a session.
    Output { output: String, active: bool },
    /// Result of a close; `existed` is false for unknown ids.
    SessionClosed { session_id: String, existed: bool },
    /// An error occurred processing the request.
    Error {
        /// Machine-readable classification.
        kind: String,
        /// Human-readable error message.
        message: String,
    },
}

impl IpcResponse {
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<SessionError> for IpcResponse {
    fn from(err: SessionError) -> Self {
        Self::error(err.kind(), err.to_string())
    }
}
