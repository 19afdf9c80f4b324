//! Daemon orchestrator for wiring together all components.
//!
//! This module provides the `DaemonOrchestrator` that owns the session
//! registry, runs its periodic cleanup, and serves CLI requests on the
//! control socket until shutdown.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::devices::{AdbLocator, DeviceError, DeviceLocator};
use crate::ipc::pidfile::{remove_pid_file, write_pid_file};
use crate::ipc::{IpcConnection, IpcError, IpcRequest, IpcResponse, IpcServer, INVALID_REQUEST};
use crate::session::{NativePtySpawner, SessionManager, SessionRegistry, TransportSpawner};

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, initializing components.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// A session was started for a client.
    SessionCreated {
        session_id: String,
        device_id: String,
    },
    /// A client closed a session.
    SessionClosed { session_id: String },
    /// A client asked the daemon to stop.
    StopRequested,
    /// Error occurred.
    Error { message: String },
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Registry of bridge shell sessions.
    registry: Arc<SessionRegistry>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
    /// Background tasks awaited on stop.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DaemonOrchestrator {
    /// Creates a new daemon orchestrator using the real bridge and PTY backend.
    pub async fn new(config: Config) -> Result<Self> {
        let locator = AdbLocator::discover(config.bridge.adb_path.as_deref()).await;
        match locator.bridge_path() {
            Some(path) => info!(bridge = %path.display(), "Using device bridge"),
            None => warn!("No device bridge found; sessions cannot be created"),
        }

        Ok(Self::with_components(
            config,
            Arc::new(locator),
            Arc::new(NativePtySpawner),
        ))
    }

    /// Creates an orchestrator around explicit device and transport backends.
    pub fn with_components(
        config: Config,
        locator: Arc<dyn DeviceLocator>,
        spawner: Arc<dyn TransportSpawner>,
    ) -> Self {
        let registry = SessionRegistry::new(locator, spawner)
            .with_options(config.session.options())
            .with_max_sessions(config.session.max_sessions)
            .with_default_device(config.bridge.default_device.clone());

        let (event_tx, _) = broadcast::channel(256);

        Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            registry: Arc::new(registry),
            shutdown_token: CancellationToken::new(),
            event_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Path of the control socket this orchestrator serves.
    pub fn socket_path(&self) -> PathBuf {
        self.config.daemon.resolved_socket_path()
    }

    /// Starts the daemon orchestrator.
    ///
    /// Binds the control socket, writes the PID file and spawns the cleanup
    /// and accept tasks. An orchestrator that has been stopped cannot be
    /// started again.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            if self.shutdown_token.is_cancelled() {
                anyhow::bail!("Orchestrator has been shut down and cannot be restarted");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting daemon orchestrator...");

        if let Err(e) = self.start_components().await {
            *self.state.write().await = OrchestratorState::Stopped;
            self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
            return Err(e);
        }

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!("Daemon orchestrator started successfully");
        Ok(())
    }

    async fn start_components(&self) -> Result<()> {
        let socket_path = self.socket_path();
        let server = IpcServer::bind(&socket_path)
            .await
            .with_context(|| format!("Failed to bind control socket: {}", socket_path.display()))?;

        let pid_path = self.config.daemon.pid_file();
        write_pid_file(&pid_path)
            .with_context(|| format!("Failed to write PID file: {}", pid_path.display()))?;
        info!(socket = %socket_path.display(), "Listening for CLI connections");

        let cleanup = self.registry.start_cleanup_task(
            self.config.session.cleanup_interval(),
            self.shutdown_token.clone(),
        );
        debug!("Started session cleanup task");

        let handler = Arc::new(RequestHandler {
            registry: Arc::clone(&self.registry),
            event_tx: self.event_tx.clone(),
            shutdown_token: self.shutdown_token.clone(),
            started_at: Instant::now(),
        });
        let accept = tokio::spawn(Self::accept_loop(
            server,
            handler,
            self.shutdown_token.clone(),
        ));

        self.lock_tasks().extend([cleanup, accept]);
        Ok(())
    }

    /// Accepts CLI connections until shutdown. Dropping the server removes
    /// the socket file.
    async fn accept_loop(
        server: IpcServer,
        handler: Arc<RequestHandler>,
        shutdown_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    debug!("Accept loop received shutdown signal");
                    break;
                }
                accepted = server.accept() => match accepted {
                    Ok(conn) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move { handler.serve(conn).await });
                    }
                    Err(e) => {
                        error!("Failed to accept IPC connection: {}", e);
                        handler.emit(OrchestratorEvent::Error {
                            message: format!("accept failed: {}", e),
                        });
                    }
                }
            }
        }
    }

    /// Stops the daemon orchestrator gracefully.
    ///
    /// Closes every session, then removes the control socket and PID file.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping daemon orchestrator...");

        // Signal shutdown to all tasks
        self.shutdown_token.cancel();

        let tasks: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        self.registry.close_all().await;

        let _ = std::fs::remove_file(self.socket_path());
        remove_pid_file(&self.config.daemon.pid_file());

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Daemon orchestrator stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    ///
    /// The token is cancelled by [`stop`](Self::stop) and by a `Stop` request.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

/// Answers requests from CLI connections against the registry.
struct RequestHandler {
    registry: Arc<SessionRegistry>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
    shutdown_token: CancellationToken,
    started_at: Instant,
}

impl RequestHandler {
    /// Serves one connection until the client disconnects or the daemon stops.
    async fn serve(&self, mut conn: IpcConnection) {
        loop {
            let next = tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                next = conn.read_request() => next,
            };

            let (response, keep_open) = match next {
                Ok(Some(request)) => {
                    let stop = request == IpcRequest::Stop;
                    let response = self.handle(request).await;
                    if let Err(e) = conn.send_response(&response).await {
                        debug!("Failed to send IPC response: {}", e);
                        break;
                    }
                    if stop {
                        info!("Stop requested over IPC");
                        self.emit(OrchestratorEvent::StopRequested);
                        self.shutdown_token.cancel();
                        break;
                    }
                    continue;
                }
                Ok(None) => break,
                Err(IpcError::Json(e)) => (
                    IpcResponse::error(INVALID_REQUEST, format!("malformed request: {}", e)),
                    true,
                ),
                Err(IpcError::TooLarge(limit)) => (
                    IpcResponse::error(
                        INVALID_REQUEST,
                        format!("request exceeds {} bytes", limit),
                    ),
                    false,
                ),
                Err(e) => {
                    debug!("IPC connection error: {}", e);
                    break;
                }
            };

            warn!("Rejected IPC request: {:?}", response);
            if conn.send_response(&response).await.is_err() || !keep_open {
                break;
            }
        }
    }

    async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::Status => IpcResponse::Status {
                running: true,
                uptime_secs: self.started_at.elapsed().as_secs(),
                session_count: self.registry.count(),
                max_sessions: self.registry.max_sessions(),
                bridge_available: self.registry.locator().is_available(),
            },
            IpcRequest::Stop => IpcResponse::Stopping,
            IpcRequest::ListDevices => self.list_devices().await,
            IpcRequest::ListSessions => IpcResponse::Sessions {
                sessions: self.registry.list_active(),
            },
            IpcRequest::CreateSession { device_id } => {
                match self.registry.create_session(device_id).await {
                    Ok(session_id) => {
                        if let Some(session) = self.registry.get_session(&session_id) {
                            self.emit(OrchestratorEvent::SessionCreated {
                                session_id: session_id.clone(),
                                device_id: session.device_id().to_string(),
                            });
                        }
                        IpcResponse::SessionCreated { session_id }
                    }
                    Err(e) => e.into(),
                }
            }
            IpcRequest::WriteInput { session_id, input } => {
                match self.registry.write_to_session(&session_id, &input) {
                    Ok(()) => IpcResponse::Ok,
                    Err(e) => e.into(),
                }
            }
            IpcRequest::Resize {
                session_id,
                rows,
                cols,
            } => match self.registry.resize_session(&session_id, rows, cols) {
                Ok(()) => IpcResponse::Ok,
                Err(e) => e.into(),
            },
            IpcRequest::PollOutput { session_id } => match self.registry.poll_output(&session_id) {
                Ok(polled) => IpcResponse::Output {
                    output: polled.output,
                    active: polled.active,
                },
                Err(e) => e.into(),
            },
            IpcRequest::CloseSession { session_id } => {
                let existed = self.registry.close_session(&session_id).await;
                if existed {
                    self.emit(OrchestratorEvent::SessionClosed {
                        session_id: session_id.clone(),
                    });
                }
                IpcResponse::SessionClosed {
                    session_id,
                    existed,
                }
            }
        }
    }

    async fn list_devices(&self) -> IpcResponse {
        match self.registry.locator().list_devices().await {
            Ok(devices) => IpcResponse::Devices { devices },
            Err(e @ DeviceError::Io(_)) => IpcResponse::error("io", e.to_string()),
            Err(e) => IpcResponse::error("unavailable", e.to_string()),
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }
}
