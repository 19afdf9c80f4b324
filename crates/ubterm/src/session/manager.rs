//! Registry of live bridge shell sessions.
//!
//! This module provides a thread-safe registry that can create, look up,
//! drive and tear down many sessions concurrently.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::pty::{PolledOutput, Session, SessionError, SessionId, SessionOptions};
use super::transport::TransportSpawner;
use crate::devices::{first_ready, DeviceError, DeviceLocator};

/// Trait for session management operations.
///
/// Implementations must be thread-safe and suitable for concurrent access.
#[allow(async_fn_in_trait)]
pub trait SessionManager: Send + Sync {
    /// Creates a session on `device_id`, or on the default device if `None`.
    async fn create_session(&self, device_id: Option<String>) -> Result<SessionId, SessionError>;

    fn get_session(&self, session_id: &str) -> Option<Arc<Session>>;

    /// Sends a line of input to a session.
    fn write_to_session(&self, session_id: &str, data: &str) -> Result<(), SessionError>;

    fn resize_session(&self, session_id: &str, rows: u16, cols: u16) -> Result<(), SessionError>;

    /// Drains a session's buffer and reports whether it is still active.
    fn poll_output(&self, session_id: &str) -> Result<PolledOutput, SessionError>;

    /// Removes and closes a session. Returns whether it existed.
    async fn close_session(&self, session_id: &str) -> bool;

    /// Summaries of the sessions that are still active.
    fn list_active(&self) -> Vec<SessionSummary>;

    /// Removes and closes every inactive session. Returns how many.
    async fn cleanup_inactive(&self) -> usize;

    /// Closes and removes every session.
    async fn close_all(&self);

    /// Number of registered sessions, active or not.
    fn count(&self) -> usize;
}

/// Information about a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub device_id: String,
    pub active: bool,
    /// Chunks buffered since the last drain.
    pub buffer_length: usize,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    pub rows: u16,
    pub cols: u16,
}

impl SessionSummary {
    fn of(session: &Session) -> Self {
        let size = session.size();
        Self {
            id: session.id().clone(),
            device_id: session.device_id().to_string(),
            active: session.is_active(),
            buffer_length: session.buffered_chunks(),
            created_at: session.created_at(),
            rows: size.rows,
            cols: size.cols,
        }
    }
}

/// Orders summaries oldest first. Sessions created in the same second are
/// ordered by the registry counter embedded in their ids.
fn sort_by_creation(summaries: &mut [SessionSummary]) {
    summaries.sort_by(|a, b| {
        (a.created_at, id_sequence(&a.id))
            .cmp(&(b.created_at, id_sequence(&b.id)))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Counter part of a `session_{n}_{secs}` id.
fn id_sequence(id: &str) -> Option<u64> {
    id.strip_prefix("session_")?
        .split('_')
        .next()?
        .parse()
        .ok()
}

/// Session registry backed by a `DashMap`.
///
/// Sessions are inserted only after they started and removed atomically
/// before they are closed, so a failed create leaves nothing behind and
/// two concurrent closes of one id close it once.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    counter: AtomicU64,
    /// Creates that passed the capacity check but are not inserted yet.
    pending: AtomicUsize,
    locator: Arc<dyn DeviceLocator>,
    spawner: Arc<dyn TransportSpawner>,
    options: SessionOptions,
    max_sessions: usize,
    default_device: Option<String>,
}

impl SessionRegistry {
    pub const DEFAULT_MAX_SESSIONS: usize = 10;

    pub fn new(locator: Arc<dyn DeviceLocator>, spawner: Arc<dyn TransportSpawner>) -> Self {
        Self {
            sessions: DashMap::new(),
            counter: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            locator,
            spawner,
            options: SessionOptions::default(),
            max_sessions: Self::DEFAULT_MAX_SESSIONS,
            default_device: None,
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Device used when a create names none, before asking the bridge.
    pub fn with_default_device(mut self, device_id: Option<String>) -> Self {
        self.default_device = device_id;
        self
    }

    pub fn locator(&self) -> &Arc<dyn DeviceLocator> {
        &self.locator
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Starts a background task that periodically removes inactive sessions.
    ///
    /// Runs until `token` is cancelled.
    pub fn start_cleanup_task(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Session cleanup task stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        registry.cleanup_inactive().await;
                    }
                }
            }
        })
    }

    fn next_id(&self) -> SessionId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!("session_{}_{}", n, secs)
    }

    fn lookup(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        self.get_session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    async fn resolve_device(&self) -> Result<String, SessionError> {
        if let Some(device) = &self.default_device {
            return Ok(device.clone());
        }

        let devices = self
            .locator
            .list_devices()
            .await
            .map_err(|e| match e {
                DeviceError::BridgeUnavailable => SessionError::BridgeUnavailable,
                other => SessionError::DeviceQuery(other.to_string()),
            })?;

        first_ready(&devices)
            .map(|d| d.id.clone())
            .ok_or(SessionError::NoDevice)
    }

    fn bridge(&self) -> Result<PathBuf, SessionError> {
        self.locator
            .bridge_path()
            .ok_or(SessionError::BridgeUnavailable)
    }
}

/// Releases a capacity reservation on drop.
struct PendingSlot<'a>(&'a AtomicUsize);

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionManager for SessionRegistry {
    async fn create_session(&self, device_id: Option<String>) -> Result<SessionId, SessionError> {
        let bridge = self.bridge()?;

        let in_flight = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        let _slot = PendingSlot(&self.pending);
        if self.sessions.len() + in_flight > self.max_sessions {
            tracing::warn!(max_sessions = self.max_sessions, "Session limit reached");
            return Err(SessionError::LimitReached(self.max_sessions));
        }

        let device_id = match device_id {
            Some(id) => id,
            None => self.resolve_device().await?,
        };

        let session_id = self.next_id();
        let session = Session::start(
            session_id.clone(),
            &device_id,
            &bridge,
            self.spawner.as_ref(),
            &self.options,
        )?;

        self.sessions.insert(session_id.clone(), session);

        tracing::info!(
            session_id = %session_id,
            device_id = %device_id,
            "Created new session"
        );

        Ok(session_id)
    }

    fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn write_to_session(&self, session_id: &str, data: &str) -> Result<(), SessionError> {
        self.lookup(session_id)?.write_input(data)
    }

    fn resize_session(&self, session_id: &str, rows: u16, cols: u16) -> Result<(), SessionError> {
        self.lookup(session_id)?.resize(rows, cols)
    }

    fn poll_output(&self, session_id: &str) -> Result<PolledOutput, SessionError> {
        Ok(self.lookup(session_id)?.poll())
    }

    async fn close_session(&self, session_id: &str) -> bool {
        let Some((id, session)) = self.sessions.remove(session_id) else {
            return false;
        };

        session.close().await;
        tracing::info!(session_id = %id, "Session closed and removed");
        true
    }

    fn list_active(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| SessionSummary::of(entry.value()))
            .collect();
        sort_by_creation(&mut summaries);
        summaries
    }

    async fn cleanup_inactive(&self) -> usize {
        let inactive: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_active())
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in inactive {
            if let Some((id, session)) = self.sessions.remove_if(&id, |_, s| !s.is_active()) {
                session.close().await;
                tracing::info!(session_id = %id, "Cleaned up terminated session");
                removed += 1;
            }
        }
        removed
    }

    async fn close_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();

        let mut closing = JoinSet::new();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                closing.spawn(async move { session.close().await });
            }
        }

        let count = closing.len();
        while closing.join_next().await.is_some() {}

        if count > 0 {
            tracing::info!(count, "Closed all sessions");
        }
    }

    fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceInfo;
    use crate::session::pty::{CONNECTION_CLOSED_MARKER, PROCESS_TERMINATED_MARKER};
    use crate::session::transport::{NativePtySpawner, TermSize};
    use std::collections::HashSet;
    use std::path::Path;
    use tokio::time::sleep;

    /// Locator with a fixed bridge and device list.
    struct StubLocator {
        bridge: Option<PathBuf>,
        devices: Vec<DeviceInfo>,
        queries: AtomicUsize,
    }

    impl StubLocator {
        /// `/bin/sh -s <device> shell` is an interactive shell, which makes
        /// it a convenient stand-in for the bridge.
        fn shell(devices: &[(&str, &str)]) -> Self {
            Self {
                bridge: Some(PathBuf::from("/bin/sh")),
                devices: devices
                    .iter()
                    .map(|(id, status)| DeviceInfo {
                        id: id.to_string(),
                        status: status.to_string(),
                    })
                    .collect(),
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl DeviceLocator for StubLocator {
        fn bridge_path(&self) -> Option<PathBuf> {
            self.bridge.clone()
        }

        async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.bridge.is_none() {
                return Err(DeviceError::BridgeUnavailable);
            }
            Ok(self.devices.clone())
        }
    }

    fn test_options() -> SessionOptions {
        SessionOptions {
            size: TermSize::default(),
            poll_interval: Duration::from_millis(10),
            close_grace: Duration::from_millis(50),
        }
    }

    fn registry_with(locator: StubLocator) -> SessionRegistry {
        SessionRegistry::new(Arc::new(locator), Arc::new(NativePtySpawner))
            .with_options(test_options())
    }

    fn registry() -> SessionRegistry {
        registry_with(StubLocator::shell(&[("emulator-5554", "device")]))
    }

    /// Polls until the accumulated output contains `needle`.
    async fn read_until(registry: &SessionRegistry, id: &str, needle: &str) -> (String, bool) {
        let mut collected = String::new();
        let mut active = true;
        for _ in 0..300 {
            let polled = registry.poll_output(id).unwrap();
            collected.push_str(&polled.output);
            active = polled.active;
            if collected.contains(needle) {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        (collected, active)
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let registry = registry();

        let id = registry
            .create_session(Some("emulator-5554".to_string()))
            .await
            .unwrap();

        assert!(id.starts_with("session_1_"));
        let session = registry.get_session(&id).unwrap();
        assert!(session.is_active());
        assert_eq!(session.device_id(), "emulator-5554");
        assert_eq!(registry.count(), 1);

        assert!(registry.close_session(&id).await);
    }

    #[tokio::test]
    async fn test_create_uses_first_ready_device() {
        let locator = StubLocator::shell(&[("0123", "unauthorized"), ("ubports", "device")]);
        let registry = registry_with(locator);

        let id = registry.create_session(None).await.unwrap();
        assert_eq!(registry.get_session(&id).unwrap().device_id(), "ubports");

        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_configured_default_device_skips_query() {
        let locator = Arc::new(StubLocator::shell(&[]));
        let registry = SessionRegistry::new(locator.clone(), Arc::new(NativePtySpawner))
            .with_options(test_options())
            .with_default_device(Some("configured".to_string()));

        let id = registry.create_session(None).await.unwrap();
        assert_eq!(registry.get_session(&id).unwrap().device_id(), "configured");
        assert_eq!(locator.queries.load(Ordering::SeqCst), 0);

        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_create_without_devices_fails() {
        let registry = registry_with(StubLocator::shell(&[("x", "offline")]));

        let result = registry.create_session(None).await;
        assert!(matches!(result, Err(SessionError::NoDevice)));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_create_without_bridge_fails() {
        let mut locator = StubLocator::shell(&[("dev", "device")]);
        locator.bridge = None;
        let registry = registry_with(locator);

        let result = registry.create_session(Some("dev".to_string())).await;
        assert!(matches!(result, Err(SessionError::BridgeUnavailable)));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_no_entry() {
        let mut locator = StubLocator::shell(&[("dev", "device")]);
        locator.bridge = Some(PathBuf::from("/nonexistent/bridge/adb"));
        let registry = registry_with(locator);

        let result = registry.create_session(Some("dev".to_string())).await;
        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
        assert_eq!(registry.count(), 0);
        assert!(registry.list_active().is_empty());
    }

    #[tokio::test]
    async fn test_session_limit() {
        let registry = registry().with_max_sessions(1);

        let first = registry.create_session(Some("a".into())).await.unwrap();
        let second = registry.create_session(Some("b".into())).await;
        assert!(matches!(second, Err(SessionError::LimitReached(1))));

        registry.close_session(&first).await;
        let third = registry.create_session(Some("c".into())).await;
        assert!(third.is_ok());

        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_unique_ids() {
        let registry = Arc::new(registry());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.create_session(Some("dev".into())).await.unwrap()
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }

        assert_eq!(ids.len(), 8);
        assert_eq!(registry.count(), 8);

        registry.close_all().await;
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_write_and_poll_output() {
        let registry = registry();
        let id = registry.create_session(Some("dev".into())).await.unwrap();

        registry
            .write_to_session(&id, "echo ubterm_$((40+2))")
            .unwrap();

        let (output, active) = read_until(&registry, &id, "ubterm_42").await;
        assert!(output.contains("ubterm_42"), "output was: {:?}", output);
        assert!(active);
        assert!(!output.contains('\x1b'));
        assert!(!output.contains('\r'));

        registry.close_session(&id).await;
    }

    #[tokio::test]
    async fn test_remote_exit_marks_inactive() {
        let registry = registry();
        let id = registry.create_session(Some("dev".into())).await.unwrap();

        registry.write_to_session(&id, "exit").unwrap();

        let (output, _) = read_until(&registry, &id, "]\n").await;
        assert!(
            output.contains(PROCESS_TERMINATED_MARKER.trim())
                || output.contains(CONNECTION_CLOSED_MARKER.trim()),
            "output was: {:?}",
            output
        );

        let session = registry.get_session(&id).unwrap();
        assert!(!session.is_active());
        assert!(registry.list_active().is_empty());

        let write = registry.write_to_session(&id, "ls");
        assert!(matches!(write, Err(SessionError::AlreadyTerminated(_))));

        assert_eq!(registry.cleanup_inactive().await, 1);
        assert!(registry.get_session(&id).is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_errors() {
        let registry = registry();

        assert!(registry.get_session("session_9_0").is_none());
        assert!(matches!(
            registry.write_to_session("session_9_0", "ls"),
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            registry.resize_session("session_9_0", 10, 10),
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            registry.poll_output("session_9_0"),
            Err(SessionError::NotFound(_))
        ));
        assert!(!registry.close_session("session_9_0").await);
    }

    #[tokio::test]
    async fn test_close_session_twice() {
        let registry = registry();
        let id = registry.create_session(Some("dev".into())).await.unwrap();
        let session = registry.get_session(&id).unwrap();

        assert!(registry.close_session(&id).await);
        assert!(!registry.close_session(&id).await);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_concurrent_close_closes_once() {
        let registry = Arc::new(registry());
        let id = registry.create_session(Some("dev".into())).await.unwrap();

        let a = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move { registry.close_session(&id).await })
        };
        let b = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move { registry.close_session(&id).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|existed| **existed).count(), 1);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_list_active_summaries() {
        let registry = registry();
        let first = registry.create_session(Some("a".into())).await.unwrap();
        let second = registry.create_session(Some("b".into())).await.unwrap();

        registry.resize_session(&second, 50, 132).unwrap();

        let summaries = registry.list_active();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, first);
        assert_eq!(summaries[0].device_id, "a");
        assert_eq!((summaries[0].rows, summaries[0].cols), (24, 80));
        assert_eq!(summaries[1].id, second);
        assert_eq!((summaries[1].rows, summaries[1].cols), (50, 132));
        assert!(summaries.iter().all(|s| s.active));

        registry.close_all().await;
        assert!(registry.list_active().is_empty());
    }

    #[test]
    fn test_same_second_sessions_sort_by_counter() {
        let summary = |id: &str, created_at: u64| SessionSummary {
            id: id.to_string(),
            device_id: "dev".to_string(),
            active: true,
            buffer_length: 0,
            created_at,
            rows: 24,
            cols: 80,
        };
        let mut summaries = vec![
            summary("session_10_1700000001", 1_700_000_001),
            summary("session_11_1700000001", 1_700_000_001),
            summary("session_9_1700000001", 1_700_000_001),
            summary("session_2_1700000000", 1_700_000_000),
        ];

        sort_by_creation(&mut summaries);

        let ids: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "session_2_1700000000",
                "session_9_1700000001",
                "session_10_1700000001",
                "session_11_1700000001",
            ]
        );
        assert_eq!(id_sequence("session_10_1700000001"), Some(10));
        assert_eq!(id_sequence("custom"), None);
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_dead_sessions() {
        let registry = Arc::new(registry());
        let token = CancellationToken::new();
        let handle = registry.start_cleanup_task(Duration::from_millis(20), token.clone());

        let id = registry.create_session(Some("dev".into())).await.unwrap();
        registry.write_to_session(&id, "exit").unwrap();

        let mut removed = false;
        for _ in 0..300 {
            if registry.get_session(&id).is_none() {
                removed = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(removed);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_bridge_path_from_locator() {
        let registry = registry();
        assert_eq!(
            registry.locator().bridge_path().as_deref(),
            Some(Path::new("/bin/sh"))
        );
        assert_eq!(registry.max_sessions(), SessionRegistry::DEFAULT_MAX_SESSIONS);
    }
}
