//! ubterm daemon and CLI
//!
//! Keeps interactive device shells alive behind a local control socket.

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;
use ubterm::config::Config;
use ubterm::devices::DeviceInfo;
use ubterm::ipc::{get_daemon_pid, is_daemon_running, IpcClient, IpcResponse};
use ubterm::orchestrator::{DaemonOrchestrator, OrchestratorEvent};
use ubterm::session::SessionSummary;

/// ubterm - persistent shell sessions on devices reached through adb.
#[derive(Parser, Debug)]
#[command(name = "ubterm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the daemon in the foreground
    Start,

    /// Stop the running daemon
    Stop {
        /// Force immediate termination (SIGKILL)
        #[arg(long, short)]
        force: bool,

        /// Timeout in seconds for graceful shutdown (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show daemon status
    Status,

    /// Inspect devices visible to the bridge
    #[command(subcommand)]
    Devices(DevicesCommands),

    /// Manage shell sessions
    #[command(subcommand)]
    Sessions(SessionsCommands),
}

/// Subcommands for device discovery.
#[derive(Subcommand, Debug, Clone)]
pub enum DevicesCommands {
    /// List devices reported by the bridge
    List,
}

/// Subcommands for session management.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List all active sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Open a shell on a device (the default device if omitted)
    Create {
        /// Device ID as shown by `devices list`
        device_id: Option<String>,
    },

    /// Send a line of input to a session
    Write {
        /// Target session
        session_id: String,

        /// Text to send; words are joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Print and clear a session's pending output
    Poll {
        /// Target session
        session_id: String,
    },

    /// Change a session's terminal size
    Resize {
        /// Target session
        session_id: String,
        /// Terminal rows
        rows: u16,
        /// Terminal columns
        cols: u16,
    },

    /// Close a session
    Close {
        /// Target session
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    let is_daemon = matches!(cli.command, Commands::Start);
    let _log_guard = init_tracing(&config, cli.verbose, is_daemon);

    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    let socket_path = config.daemon.resolved_socket_path();
    let pid_path = config.daemon.pid_file();

    match cli.command {
        Commands::Start => {
            // Check for existing daemon BEFORE starting
            if is_daemon_running(&pid_path) {
                let pid = get_daemon_pid(&pid_path).unwrap_or(0);
                eprintln!("Error: Daemon already running (PID: {})", pid);
                eprintln!();
                eprintln!("To stop the existing daemon, run:");
                eprintln!("  ubterm stop");
                eprintln!();
                eprintln!("To check daemon status, run:");
                eprintln!("  ubterm status");
                std::process::exit(1);
            }

            tracing::info!("ubterm daemon starting...");
            let mut orchestrator = DaemonOrchestrator::new(config).await?;
            run_daemon(&mut orchestrator).await?;
        }
        Commands::Stop { force, timeout } => {
            tracing::info!("Stopping daemon (force: {})", force);

            if force {
                match force_stop_daemon(&pid_path, &socket_path) {
                    Ok(()) => {
                        println!("Daemon forcefully terminated");
                    }
                    Err(e) => {
                        eprintln!("Failed to stop daemon: {}", e);
                        std::process::exit(1);
                    }
                }
            } else {
                match graceful_stop_daemon(&socket_path, &pid_path, timeout).await {
                    Ok(()) => {
                        println!("Daemon stopped successfully");
                    }
                    Err(e) => {
                        eprintln!("Failed to stop daemon: {}", e);
                        eprintln!("Try: ubterm stop --force");
                        std::process::exit(1);
                    }
                }
            }
        }
        Commands::Status => {
            tracing::debug!("Checking daemon status");

            match query_daemon_status(&socket_path).await {
                Ok(status) => {
                    println!(
                        "Daemon Status: {}",
                        if status.running { "running" } else { "stopped" }
                    );
                    println!("  Uptime:   {}", format_duration(status.uptime_secs));
                    println!(
                        "  Sessions: {}/{}",
                        status.session_count, status.max_sessions
                    );
                    println!(
                        "  Bridge:   {}",
                        if status.bridge_available {
                            "available"
                        } else {
                            "not found"
                        }
                    );
                }
                Err(e) => {
                    eprintln!("Daemon is not running: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Devices(DevicesCommands::List) => {
            let mut client = connect(&socket_path).await?;
            match expect_success(client.list_devices().await?)? {
                IpcResponse::Devices { devices } => print_devices_table(&devices),
                other => anyhow::bail!("Unexpected response from daemon: {:?}", other),
            }
        }
        Commands::Sessions(cmd) => {
            if let Err(e) = run_sessions_command(&socket_path, cmd).await {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Sets up the global subscriber.
///
/// The daemon honours `daemon.log_file`; CLI commands always log to stderr.
/// `RUST_LOG` takes precedence over both `--verbose` and the configured level.
fn init_tracing(config: &Config, verbose: bool, is_daemon: bool) -> Option<WorkerGuard> {
    let level = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_file = config.daemon.log_file.as_ref().filter(|_| is_daemon);
    let (writer, guard, ansi) = match log_file {
        Some(path) => match open_log_file(path) {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                (BoxMakeWriter::new(non_blocking), Some(guard), false)
            }
            Err(e) => {
                eprintln!(
                    "Warning: failed to open log file {}: {:#}",
                    path.display(),
                    e
                );
                (
                    BoxMakeWriter::new(std::io::stderr),
                    None,
                    std::io::stderr().is_terminal(),
                )
            }
        },
        None => (
            BoxMakeWriter::new(std::io::stderr),
            None,
            std::io::stderr().is_terminal(),
        ),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(ansi)
        .with_writer(writer);

    if subscriber.try_init().is_err() {
        return None;
    }
    guard
}

fn open_log_file(path: &Path) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open file")
}

/// Connect to the daemon's control socket.
async fn connect(socket_path: &Path) -> anyhow::Result<IpcClient> {
    IpcClient::connect(socket_path)
        .await
        .map_err(|_| anyhow::anyhow!("Daemon is not running (cannot connect to socket)"))
}

/// Turn a daemon-side error response into an `Err`.
fn expect_success(response: IpcResponse) -> anyhow::Result<IpcResponse> {
    match response {
        IpcResponse::Error { kind, message } => anyhow::bail!("{} ({})", message, kind),
        other => Ok(other),
    }
}

async fn run_sessions_command(socket_path: &Path, cmd: SessionsCommands) -> anyhow::Result<()> {
    let mut client = connect(socket_path).await?;

    match cmd {
        SessionsCommands::List { json } => {
            let sessions = match expect_success(client.list_sessions().await?)? {
                IpcResponse::Sessions { sessions } => sessions,
                other => anyhow::bail!("Unexpected response from daemon: {:?}", other),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                print_sessions_table(&sessions);
            }
        }
        SessionsCommands::Create { device_id } => {
            match expect_success(client.create_session(device_id).await?)? {
                IpcResponse::SessionCreated { session_id } => println!("{}", session_id),
                other => anyhow::bail!("Unexpected response from daemon: {:?}", other),
            }
        }
        SessionsCommands::Write { session_id, text } => {
            expect_success(client.write_input(session_id, text.join(" ")).await?)?;
        }
        SessionsCommands::Poll { session_id } => {
            match expect_success(client.poll_output(session_id.clone()).await?)? {
                IpcResponse::Output { output, active } => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(output.as_bytes())?;
                    stdout.flush()?;
                    if !active {
                        eprintln!("Session {} has ended", session_id);
                    }
                }
                other => anyhow::bail!("Unexpected response from daemon: {:?}", other),
            }
        }
        SessionsCommands::Resize {
            session_id,
            rows,
            cols,
        } => {
            expect_success(client.resize(session_id, rows, cols).await?)?;
        }
        SessionsCommands::Close { session_id } => {
            match expect_success(client.close_session(session_id).await?)? {
                IpcResponse::SessionClosed {
                    session_id,
                    existed: true,
                } => println!("Session {} closed", session_id),
                IpcResponse::SessionClosed {
                    session_id,
                    existed: false,
                } => println!("Session {} was not open", session_id),
                other => anyhow::bail!("Unexpected response from daemon: {:?}", other),
            }
        }
    }

    Ok(())
}

/// Status information returned from the daemon.
struct DaemonStatus {
    running: bool,
    uptime_secs: u64,
    session_count: usize,
    max_sessions: usize,
    bridge_available: bool,
}

/// Query the daemon status via IPC.
async fn query_daemon_status(socket_path: &Path) -> anyhow::Result<DaemonStatus> {
    let mut client = IpcClient::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("Cannot connect to daemon: {}", e))?;

    let response = client
        .status()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to query status: {}", e))?;

    match response {
        IpcResponse::Status {
            running,
            uptime_secs,
            session_count,
            max_sessions,
            bridge_available,
        } => Ok(DaemonStatus {
            running,
            uptime_secs,
            session_count,
            max_sessions,
            bridge_available,
        }),
        IpcResponse::Error { message, .. } => {
            anyhow::bail!("Daemon returned error: {}", message)
        }
        _ => anyhow::bail!("Unexpected response from daemon"),
    }
}

/// Print devices in a formatted ASCII table.
fn print_devices_table(devices: &[DeviceInfo]) {
    if devices.is_empty() {
        println!("No devices attached.");
        return;
    }

    let id_width = devices.iter().map(|d| d.id.len()).max().unwrap_or(6).max(6);

    println!("{:<id_width$}  {}", "DEVICE", "STATUS", id_width = id_width);
    for device in devices {
        println!(
            "{:<id_width$}  {}",
            device.id,
            device.status,
            id_width = id_width
        );
    }
}

/// Print sessions in a formatted ASCII table.
fn print_sessions_table(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("No active sessions.");
        return;
    }

    // Calculate column widths
    let id_width = sessions
        .iter()
        .map(|s| s.id.len())
        .max()
        .unwrap_or(8)
        .max(8);
    let device_width = sessions
        .iter()
        .map(|s| s.device_id.len())
        .max()
        .unwrap_or(6)
        .clamp(6, 24);

    println!(
        "{:<id_width$}  {:<device_width$}  {:>9}  {:>8}  {:>12}",
        "ID",
        "DEVICE",
        "SIZE",
        "BUFFERED",
        "CREATED",
        id_width = id_width,
        device_width = device_width
    );
    println!("{}", "-".repeat(id_width + device_width + 39));

    for session in sessions {
        println!(
            "{:<id_width$}  {:<device_width$}  {:>9}  {:>8}  {:>12}",
            session.id,
            truncate_str(&session.device_id, device_width),
            format!("{}x{}", session.cols, session.rows),
            session.buffer_length,
            format_relative_time(session.created_at),
            id_width = id_width,
            device_width = device_width
        );
    }

    println!();
    println!("Total: {} session(s)", sessions.len());
}

/// Format a Unix timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let elapsed = now.saturating_sub(timestamp);

    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Gracefully stop the daemon via IPC.
///
/// Sends a stop request and waits for the socket to disappear.
async fn graceful_stop_daemon(
    socket_path: &Path,
    pid_path: &Path,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let mut client = connect(socket_path).await?;

    println!("Sending shutdown request...");

    client.set_timeout(Duration::from_secs(timeout_secs));
    let response = client
        .stop()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to send stop request: {}", e))?;

    match response {
        IpcResponse::Stopping => {
            println!("Shutdown acknowledged, waiting for daemon to exit...");
        }
        IpcResponse::Error { message, .. } => {
            anyhow::bail!("Daemon returned error: {}", message);
        }
        _ => {
            anyhow::bail!("Unexpected response from daemon");
        }
    }
    drop(client);

    // Wait for daemon to actually exit by polling the socket
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if !socket_path.exists() {
            return Ok(());
        }

        if IpcClient::connect_with_timeout(socket_path, Duration::from_millis(100))
            .await
            .is_err()
        {
            // Reading the PID file removes it when the process is gone.
            let _ = get_daemon_pid(pid_path);
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    Err(anyhow::anyhow!(
        "Timeout waiting for daemon to exit ({}s)",
        timeout_secs
    ))
}

/// Force stop the daemon using SIGKILL.
///
/// Reads the daemon PID from the PID file and sends SIGKILL.
fn force_stop_daemon(pid_path: &Path, socket_path: &Path) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = get_daemon_pid(pid_path)
        .ok_or_else(|| anyhow::anyhow!("Daemon PID file not found - is the daemon running?"))?;
    let raw = i32::try_from(pid).map_err(|_| anyhow::anyhow!("Invalid PID in file: {}", pid))?;

    kill(Pid::from_raw(raw), Signal::SIGKILL)
        .map_err(|e| anyhow::anyhow!("Failed to kill daemon (PID {}): {}", pid, e))?;

    println!("Sent SIGKILL to daemon (PID {})", pid);

    // The daemon could not clean up after itself.
    let _ = std::fs::remove_file(pid_path);
    let _ = std::fs::remove_file(socket_path);

    Ok(())
}

/// Run the daemon until a signal or a `stop` request arrives.
async fn run_daemon(orchestrator: &mut DaemonOrchestrator) -> anyhow::Result<()> {
    // Register handlers before the socket accepts clients.
    let signals = ShutdownSignals::register()?;

    orchestrator.start().await?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::info!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::SessionCreated {
                    session_id,
                    device_id,
                } => {
                    tracing::debug!(session_id = %session_id, device_id = %device_id, "Session opened by client");
                }
                OrchestratorEvent::SessionClosed { session_id } => {
                    tracing::debug!(session_id = %session_id, "Session closed by client");
                }
                OrchestratorEvent::StopRequested => {
                    tracing::info!("Stop requested by client");
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    let token = orchestrator.shutdown_token();
    tokio::select! {
        _ = signals.wait() => {
            tracing::info!("Received shutdown signal");
        }
        _ = token.cancelled() => {}
    }

    orchestrator.stop().await?;

    Ok(())
}

/// SIGTERM and SIGINT listeners.
struct ShutdownSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn register() -> anyhow::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?,
        })
    }

    /// Wait for a shutdown signal (SIGTERM or SIGINT).
    async fn wait(mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_command() {
        let cli = Cli::try_parse_from(["ubterm", "start"]).unwrap();
        assert!(matches!(cli.command, Commands::Start));
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["ubterm", "status", "-v", "--config", "/etc/ubterm.toml"])
                .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/ubterm.toml")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_stop_command() {
        let cli = Cli::try_parse_from(["ubterm", "stop"]).unwrap();
        match cli.command {
            Commands::Stop { force, timeout } => {
                assert!(!force);
                assert_eq!(timeout, 30);
            }
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_stop_with_short_force() {
        let cli = Cli::try_parse_from(["ubterm", "stop", "-f"]).unwrap();
        match cli.command {
            Commands::Stop { force, timeout } => {
                assert!(force);
                assert_eq!(timeout, 30);
            }
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_stop_with_force_and_timeout() {
        let cli = Cli::try_parse_from(["ubterm", "stop", "--force", "--timeout", "10"]).unwrap();
        match cli.command {
            Commands::Stop { force, timeout } => {
                assert!(force);
                assert_eq!(timeout, 10);
            }
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_devices_list() {
        let cli = Cli::try_parse_from(["ubterm", "devices", "list"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Devices(DevicesCommands::List)
        ));
    }

    #[test]
    fn test_sessions_list_json() {
        let cli = Cli::try_parse_from(["ubterm", "sessions", "list", "--json"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::List { json }) => assert!(json),
            _ => panic!("Expected Sessions List command"),
        }
    }

    #[test]
    fn test_sessions_create_optional_device() {
        let cli = Cli::try_parse_from(["ubterm", "sessions", "create"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::Create { device_id }) => {
                assert!(device_id.is_none())
            }
            _ => panic!("Expected Sessions Create command"),
        }

        let cli = Cli::try_parse_from(["ubterm", "sessions", "create", "emulator-5554"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::Create { device_id }) => {
                assert_eq!(device_id.as_deref(), Some("emulator-5554"))
            }
            _ => panic!("Expected Sessions Create command"),
        }
    }

    #[test]
    fn test_sessions_write_joins_words() {
        let cli =
            Cli::try_parse_from(["ubterm", "sessions", "write", "session_1_0", "ls", "-la", "/"])
                .unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::Write { session_id, text }) => {
                assert_eq!(session_id, "session_1_0");
                assert_eq!(text.join(" "), "ls -la /");
            }
            _ => panic!("Expected Sessions Write command"),
        }
    }

    #[test]
    fn test_sessions_write_requires_text() {
        assert!(Cli::try_parse_from(["ubterm", "sessions", "write", "session_1_0"]).is_err());
    }

    #[test]
    fn test_sessions_resize() {
        let cli =
            Cli::try_parse_from(["ubterm", "sessions", "resize", "session_1_0", "40", "120"])
                .unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::Resize {
                session_id,
                rows,
                cols,
            }) => {
                assert_eq!(session_id, "session_1_0");
                assert_eq!((rows, cols), (40, 120));
            }
            _ => panic!("Expected Sessions Resize command"),
        }
    }

    #[test]
    fn test_sessions_resize_rejects_bad_numbers() {
        assert!(
            Cli::try_parse_from(["ubterm", "sessions", "resize", "s", "tall", "80"]).is_err()
        );
        assert!(
            Cli::try_parse_from(["ubterm", "sessions", "resize", "s", "24", "70000"]).is_err()
        );
    }

    #[test]
    fn test_sessions_poll_and_close() {
        let cli = Cli::try_parse_from(["ubterm", "sessions", "poll", "a"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sessions(SessionsCommands::Poll { ref session_id }) if session_id == "a"
        ));

        let cli = Cli::try_parse_from(["ubterm", "sessions", "close", "b"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sessions(SessionsCommands::Close { ref session_id }) if session_id == "b"
        ));
    }

    #[test]
    fn test_unknown_command_fails() {
        assert!(Cli::try_parse_from(["ubterm", "pair"]).is_err());
    }

    #[test]
    fn test_expect_success() {
        assert_eq!(expect_success(IpcResponse::Ok).unwrap(), IpcResponse::Ok);

        let err = expect_success(IpcResponse::error("not_found", "Session not found: x"))
            .unwrap_err()
            .to_string();
        assert_eq!(err, "Session not found: x (not_found)");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }

    #[test]
    fn test_format_relative_time() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(format_relative_time(now).ends_with("s ago"));
        assert_eq!(format_relative_time(now - 120), "2m ago");
        assert_eq!(format_relative_time(now - 7200), "2h ago");
        assert_eq!(format_relative_time(now - 172800), "2d ago");
        // Future timestamps clamp to zero.
        assert_eq!(format_relative_time(now + 1000), "0s ago");
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("exactly10!", 10), "exactly10!");
        assert_eq!(truncate_str("this is too long", 10), "this is...");
        assert_eq!(truncate_str("ééééééé", 5), "éé...");
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("logs").join("ubterm.log");

        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_force_stop_without_pid_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = force_stop_daemon(
            &temp_dir.path().join("daemon.pid"),
            &temp_dir.path().join("daemon.sock"),
        );
        assert!(result.is_err());
    }
}
