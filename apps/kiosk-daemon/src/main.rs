//! # Kiosk Daemon
//!
//! Headless host for the payment coordinator.
//!
//! ## I/O
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kiosk Daemon                                     │
//! │                                                                         │
//! │  stdin  ──► commands::parse ──► CoordinatorHandle                      │
//! │  stdout ◄── one JSON line per PaymentEvent                             │
//! │  stderr ◄── tracing (RUST_LOG, default info,kiosk=debug)               │
//! │                                                                         │
//! │  Ctrl+C / SIGTERM / "quit" / EOF ──► stop(): disable, close bus        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kiosk_payment::{ChannelEmitter, CoordinatorBuilder, CoordinatorHandle, KioskConfig};

use crate::commands::Command;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kiosk=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting kiosk daemon...");

    let config = KioskConfig::load(config_path_from_args(std::env::args().skip(1))?)?;
    info!(
        port = config.serial.port.as_deref().unwrap_or("none"),
        currency = %config.currency(),
        "Configuration loaded"
    );

    let (emitter, mut events) = ChannelEmitter::new();
    let coordinator = CoordinatorBuilder::new(config)
        .with_emitter(Arc::new(emitter))
        .spawn();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            let line = match event.to_json() {
                Ok(line) => line,
                Err(e) => {
                    warn!(event = event.name(), error = %e, "Failed to serialize event");
                    continue;
                }
            };
            if stdout.write_all(format!("{}\n", line).as_bytes()).await.is_err()
                || stdout.flush().await.is_err()
            {
                warn!("stdout closed, event feed stopped");
                break;
            }
        }
    });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match commands::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => run_command(&coordinator, command).await,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Ignoring command"),
                },
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    break;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    coordinator.stop().await?;
    let _ = writer.await;

    info!("Kiosk daemon shutdown complete");
    Ok(())
}

async fn run_command(coordinator: &CoordinatorHandle, command: Command) {
    match command {
        Command::Start { order_id, amount } => match coordinator.start_session(order_id, amount).await {
            Ok(ack) => info!(
                session_id = ack.snapshot.session_id.as_deref().unwrap_or_default(),
                hardware_available = ack.hardware_available,
                "Session started"
            ),
            Err(e) => warn!(error = %e, "Start rejected"),
        },
        Command::Cancel => match coordinator.cancel_session().await {
            Ok(cancellation) => info!(
                order_id = %cancellation.order_id,
                refunded = %cancellation.refunded,
                "Session cancelled"
            ),
            Err(e) => warn!(error = %e, "Cancel rejected"),
        },
        Command::Status => match coordinator.snapshot().await {
            Ok(snapshot) => match serde_json::to_string(&snapshot) {
                Ok(json) => info!(snapshot = %json, "Session status"),
                Err(e) => warn!(error = %e, "Failed to serialize snapshot"),
            },
            Err(e) => warn!(error = %e, "Status unavailable"),
        },
        Command::Quit => {}
    }
}

/// Reads `--config <path>` / `-c <path>` from the arguments.
fn config_path_from_args(mut args: impl Iterator<Item = String>) -> Result<Option<PathBuf>, String> {
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = args.next().ok_or_else(|| format!("{} needs a path", arg))?;
                path = Some(PathBuf::from(value));
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }
    Ok(path)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping payment coordinator...");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_config_path_from_args() {
        assert_eq!(config_path_from_args(args(&[])).unwrap(), None);
        assert_eq!(
            config_path_from_args(args(&["--config", "/etc/kiosk.toml"])).unwrap(),
            Some(PathBuf::from("/etc/kiosk.toml"))
        );
        assert!(config_path_from_args(args(&["-c"])).is_err());
        assert!(config_path_from_args(args(&["--verbose"])).is_err());
    }
}
