//! Device discovery through the bridge CLI.
//!
//! Sessions never talk to a device directly; they run the bridge's shell
//! subcommand against a device identifier. This module finds the bridge
//! executable and lists the devices it can reach.

pub mod adb;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use adb::AdbLocator;

/// Status the bridge reports for a device that is ready for commands.
pub const READY_STATUS: &str = "device";

/// A device as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Serial / identifier passed to `-s`.
    pub id: String,
    /// Connection state (`device`, `offline`, `unauthorized`, ...).
    pub status: String,
}

impl DeviceInfo {
    pub fn is_ready(&self) -> bool {
        self.status == READY_STATUS
    }
}

/// Errors from querying the bridge.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No usable bridge executable was found.
    #[error("device bridge is not available")]
    BridgeUnavailable,

    /// The bridge ran but reported failure.
    #[error("bridge command failed: {0}")]
    CommandFailed(String),

    /// The bridge did not answer in time.
    #[error("bridge command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Finds the bridge and enumerates devices.
#[async_trait]
pub trait DeviceLocator: Send + Sync {
    /// Path of the verified bridge executable, if one was found.
    fn bridge_path(&self) -> Option<PathBuf>;

    fn is_available(&self) -> bool {
        self.bridge_path().is_some()
    }

    /// Lists devices known to the bridge, bounded by the locator's timeout.
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;
}

/// Picks the device a session targets when the caller names none.
pub fn first_ready(devices: &[DeviceInfo]) -> Option<&DeviceInfo> {
    devices.iter().find(|d| d.is_ready())
}
