//! tpfand - ThinkPad fan control daemon
//!
//! Privileged service that drives the ThinkPad fan from temperature trip
//! points through the thinkpad_acpi interface. Clients query and change
//! settings over a Unix domain socket.
//!
//! # Lifecycle
//! - **Startup**: root check, PID file, configuration load (generated on
//!   first run), fan interface probe
//! - **Running**: poll timer plus socket server on one current-thread runtime
//! - **Shutdown**: on SIGINT/SIGTERM the fan is handed back to the firmware,
//!   then socket and PID file are removed

mod cli;
mod fan_control;
mod server;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use tpf_core::constants::VERSION;
use tpf_core::FanService;

use crate::cli::Cli;

const PROBE_HINT: &str = "\
tpfand could not take control of the fan.
Make sure it runs as root and that the thinkpad_acpi module is loaded
with fan_control=1 (e.g. options thinkpad_acpi fan_control=1 in
/etc/modprobe.d/thinkpad_acpi.conf).";

// ============================================================================
// Logging
// ============================================================================

/// Install the tracing subscriber; returns true when logging to journald
fn init_logging(cli: &Cli) -> bool {
    let log_level = match cli.log_level() {
        Some(level) => level.to_string(),
        None => std::env::var("TPFAN_LOG").unwrap_or_else(|_| "info".to_string()),
    };

    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
    false
}

// ============================================================================
// Privileges and PID file
// ============================================================================

fn verify_privileges() -> anyhow::Result<()> {
    // SAFETY: geteuid and getuid only return the process's user IDs.
    let euid = unsafe { libc::geteuid() };
    let uid = unsafe { libc::getuid() };

    if euid != 0 {
        bail!("tpfand must run as root (euid=0) for hardware access");
    }
    if uid != 0 {
        warn!("Running as setuid root - this is not recommended");
    }
    debug!("Running as root (uid={}, euid={})", uid, euid);
    Ok(())
}

/// Write the PID file, refusing to start next to a live instance
fn write_pid_file(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    if path.exists() {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(old_pid) = content.trim().parse::<i32>() {
                // SAFETY: signal 0 performs only the existence check.
                if unsafe { libc::kill(old_pid, 0) } == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("Another instance is running (PID {})", old_pid),
                    ));
                }
            }
        }
        // Stale PID file
        let _ = std::fs::remove_file(path);
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;

    debug!("PID file written: {}", path.display());
    Ok(())
}

fn cleanup(socket_path: &Path, pid_file: &Path) {
    for path in [socket_path, pid_file] {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
    debug!("Cleanup complete");
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Resolves with the name of the first termination signal received
async fn shutdown_signal() -> std::io::Result<&'static str> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let paths = cli.system_paths();
    let mut service = FanService::load(&paths, &cli.service_options())
        .with_context(|| format!("Failed to load configuration {}", paths.config.display()))?;

    if let Err(e) = service.start() {
        eprintln!("{}", PROBE_HINT);
        return Err(e).context("Fan control interface rejected commands");
    }

    let listener = server::bind_socket(&cli.socket)
        .with_context(|| format!("Failed to bind socket {}", cli.socket.display()))?;

    let service = Arc::new(Mutex::new(service));
    let control = tokio::spawn(fan_control::run_control_loop(service.clone()));
    let mut server = tokio::spawn(server::run_server(listener, service.clone()));
    info!("STARTUP: poll period {:?}", service.lock().await.poll_interval());

    let outcome = tokio::select! {
        signal = shutdown_signal() => {
            match signal {
                Ok(name) => info!("SIGNAL: Received {} - initiating shutdown", name),
                Err(e) => error!("Signal handling failed: {} - shutting down", e),
            }
            Ok(())
        }
        joined = &mut server => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("Socket server failed")),
            Err(e) => Err(anyhow::Error::new(e).context("Socket server task aborted")),
        },
    };

    control.abort();
    server.abort();
    service.lock().await.shutdown();
    outcome
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let use_journald = init_logging(&cli);

    info!("STARTUP: tpfand {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    verify_privileges()?;
    write_pid_file(&cli.pid_file)
        .with_context(|| format!("Could not write PID file {}", cli.pid_file.display()))?;

    let result = run(&cli).await;
    cleanup(&cli.socket, &cli.pid_file);

    match &result {
        Ok(()) => info!("SHUTDOWN: Daemon terminated gracefully"),
        Err(e) => error!("SHUTDOWN: {:#}", e),
    }
    result
}
