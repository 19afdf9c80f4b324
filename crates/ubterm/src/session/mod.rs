//! Session management module.
//!
//! This module provides pty-backed bridge shells and the registry that owns
//! them. Sessions can be created, written to, polled, resized and closed.

pub mod manager;
pub mod pty;
pub mod transport;

pub use manager::{SessionManager, SessionRegistry, SessionSummary};
pub use pty::{
    OutputCallback, PolledOutput, Session, SessionError, SessionId, SessionOptions,
    CONNECTION_CLOSED_MARKER, PROCESS_TERMINATED_MARKER,
};
pub use transport::{BridgeCommand, NativePtySpawner, PtyProcess, TermSize, TransportSpawner};
