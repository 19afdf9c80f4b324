//! # ubterm
//!
//! A session manager for interactive shells on devices reached through the
//! Android Debug Bridge (`adb`).
//!
//! ## Overview
//!
//! Each session runs `adb -s <device> shell` inside a pseudo-terminal. A
//! background pump reads its output, strips terminal escape sequences and
//! buffers the text until a client polls for it. The daemon exposes the
//! registry of sessions to the `ubterm` CLI over a Unix socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   Daemon Orchestrator                    │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌─────────────────────────────────┐  │
//! │  │  IPC Server  │──▶│        Session Registry         │  │
//! │  └──────────────┘   └─────────────────────────────────┘  │
//! │                         │                  │             │
//! │                 ┌───────────────┐  ┌───────────────┐     │
//! │                 │ Device Locator│  │ Session + Pump│     │
//! │                 └───────────────┘  └───────────────┘     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ubterm::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut orchestrator = DaemonOrchestrator::new(config).await?;
//!     orchestrator.start().await?;
//!
//!     // Serve until a client sends `Stop`.
//!     orchestrator.shutdown_token().cancelled().await;
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`devices`]: Bridge discovery and device listing
//! - [`ipc`]: Control socket protocol, client and server
//! - [`orchestrator`]: Main daemon coordinator
//! - [`sanitize`]: Terminal escape stripping
//! - [`session`]: PTY sessions and the session registry

pub mod config;
pub mod devices;
pub mod ipc;
pub mod orchestrator;
pub mod sanitize;
pub mod session;

// Re-export config types for convenience
pub use config::Config;

// Re-export device types for convenience
pub use devices::{AdbLocator, DeviceInfo, DeviceLocator};

// Re-export session types for convenience
pub use session::{
    PolledOutput, Session, SessionError, SessionId, SessionManager, SessionRegistry,
    SessionSummary,
};

pub use sanitize::sanitize;

// Re-export orchestrator types for convenience
pub use orchestrator::{DaemonOrchestrator, OrchestratorEvent, OrchestratorState};
