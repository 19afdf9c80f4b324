//! `adb`-backed device locator.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{DeviceError, DeviceInfo, DeviceLocator};

/// Fallback locations tried after the configured path and `$PATH`.
const WELL_KNOWN_PATHS: &[&str] = &["/usr/bin/adb", "/usr/local/bin/adb", "platform-tools/adb"];

/// Upper bound for a single bridge query.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Locator that shells out to `adb`.
///
/// The bridge is resolved once, at construction.
#[derive(Debug, Clone)]
pub struct AdbLocator {
    path: Option<PathBuf>,
    timeout: Duration,
}

impl AdbLocator {
    /// Resolves the bridge: `configured`, then `adb` on `$PATH`, then the
    /// well-known locations. A candidate is accepted only if
    /// `<candidate> version` succeeds.
    pub async fn discover(configured: Option<&Path>) -> Self {
        let path = find_bridge(configured).await;
        match &path {
            Some(p) => debug!(path = %p.display(), "Found device bridge"),
            None => warn!("No device bridge found; sessions cannot be created"),
        }
        Self {
            path,
            timeout: COMMAND_TIMEOUT,
        }
    }

    /// Uses `path` as-is, without probing it.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            timeout: COMMAND_TIMEOUT,
        }
    }

    /// A locator that never finds a bridge.
    pub fn unavailable() -> Self {
        Self {
            path: None,
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl DeviceLocator for AdbLocator {
    fn bridge_path(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let path = self.path.as_deref().ok_or(DeviceError::BridgeUnavailable)?;
        let stdout = run_with_timeout(path, &["devices"], self.timeout).await?;
        Ok(parse_devices(&stdout))
    }
}

/// Parses `adb devices` output.
///
/// Only `<id>\t<status>` lines count; the header and daemon startup
/// notices carry no tab and are skipped.
pub fn parse_devices(output: &str) -> Vec<DeviceInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (id, status) = line.split_once('\t')?;
            let id = id.trim();
            if id.is_empty() {
                return None;
            }
            Some(DeviceInfo {
                id: id.to_string(),
                status: status.trim().to_string(),
            })
        })
        .collect()
}

async fn find_bridge(configured: Option<&Path>) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = configured {
        candidates.push(path.to_path_buf());
    }
    if let Ok(path) = which::which("adb") {
        candidates.push(path);
    }
    candidates.extend(WELL_KNOWN_PATHS.iter().map(PathBuf::from));

    for candidate in candidates {
        if responds_to_version(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

async fn responds_to_version(path: &Path) -> bool {
    match run_with_timeout(path, &["version"], COMMAND_TIMEOUT).await {
        Ok(_) => true,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Bridge candidate rejected");
            false
        }
    }
}

/// Runs `program args...` and returns its stdout.
///
/// Output is collected while the child runs. The child is killed if it
/// outlives `timeout`.
async fn run_with_timeout(
    program: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<String, DeviceError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| DeviceError::Timeout(timeout))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DeviceError::CommandFailed(format!(
            "{} {} exited with {}: {}",
            program.display(),
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
