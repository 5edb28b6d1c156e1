//! Process-signal control: reload, pause, and resume without a restart.
//!
//! Signal handlers never touch the engine directly; they forward
//! commands over a channel to a control loop owned by main, so engine
//! methods are only ever called from ordinary task context.

use crate::config::Config;
use crate::monitor::MonitorEngine;

use std::path::{Path, PathBuf};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// Commands accepted by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// SIGHUP: reload the config file and reconfigure the engine.
    Reload,
    /// SIGUSR1: pause monitoring.
    Pause,
    /// SIGUSR2: resume monitoring.
    Resume,
}

/// Install the signal traps, forwarding each signal as a command.
pub fn spawn_signal_listeners(tx: mpsc::Sender<ControlCommand>) {
    spawn_trap(SignalKind::hangup(), ControlCommand::Reload, tx.clone());
    spawn_trap(SignalKind::user_defined1(), ControlCommand::Pause, tx.clone());
    spawn_trap(SignalKind::user_defined2(), ControlCommand::Resume, tx);
}

fn spawn_trap(kind: SignalKind, command: ControlCommand, tx: mpsc::Sender<ControlCommand>) {
    tokio::spawn(async move {
        let mut stream = match signal(kind) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to install handler for {kind:?}: {e}");
                return;
            }
        };

        while stream.recv().await.is_some() {
            if tx.send(command).await.is_err() {
                break;
            }
        }
    });
}

/// Drive the engine from control commands until the channel closes.
pub async fn run_control_loop(
    mut rx: mpsc::Receiver<ControlCommand>,
    engine: MonitorEngine,
    config_path: PathBuf,
) {
    while let Some(command) = rx.recv().await {
        handle_command(command, &engine, &config_path).await;
    }
}

async fn handle_command(command: ControlCommand, engine: &MonitorEngine, config_path: &Path) {
    match command {
        ControlCommand::Reload => {
            tracing::info!("Received SIGHUP, reloading configuration");
            match Config::load(config_path) {
                Ok(config) => match engine.configure(config.monitors).await {
                    Ok(()) => tracing::info!("Configuration reloaded successfully"),
                    Err(e) => tracing::error!(
                        "Configuration reload rejected, keeping previous configuration: {e}"
                    ),
                },
                Err(e) => tracing::error!(
                    "Configuration reload failed, keeping previous configuration: {e}"
                ),
            }
        }
        ControlCommand::Pause => {
            tracing::info!("Received SIGUSR1, pausing monitoring");
            engine.stop().await;
        }
        ControlCommand::Resume => {
            tracing::info!("Received SIGUSR2, resuming monitoring");
            engine.start().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Checker;
    use std::io::Write;

    fn config_json(id: &str) -> String {
        format!(
            r##"{{
                "slack": {{ "webhook_url": "https://hooks.slack.com/x", "channel": "#ops" }},
                "monitors": [{{
                    "id": "{id}",
                    "url": "https://example.com/health",
                    "interval_ms": 500,
                    "timeout_ms": 1000,
                    "expected_status": 200,
                    "expected_content": "OK",
                    "alert_threshold": 3,
                    "ignore_tls_error": false,
                    "is_active": false
                }}]
            }}"##
        )
    }

    #[tokio::test]
    async fn test_reload_applies_new_config() {
        let engine = MonitorEngine::new(Checker::new().unwrap());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config_json("web-1").as_bytes()).unwrap();

        handle_command(ControlCommand::Reload, &engine, file.path()).await;
        assert!(engine.target("web-1").is_some());

        // Rewrite the file with a different target set and reload.
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config_json("web-2").as_bytes()).unwrap();
        handle_command(ControlCommand::Reload, &engine, file.path()).await;

        assert!(engine.target("web-1").is_none());
        assert!(engine.target("web-2").is_some());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_config() {
        let engine = MonitorEngine::new(Checker::new().unwrap());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config_json("web-1").as_bytes()).unwrap();
        handle_command(ControlCommand::Reload, &engine, file.path()).await;

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        broken.write_all(b"{ not json").unwrap();
        handle_command(ControlCommand::Reload, &engine, broken.path()).await;

        assert!(engine.target("web-1").is_some());
    }
}
