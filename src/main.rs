//! watchpost - HTTP endpoint monitor with latched alerting.
//!
//! Polls configured endpoints on independent schedules, raises one
//! Slack alert per consecutive-failure threshold crossing and one
//! recovery per healed target, and exposes status over REST plus a
//! realtime websocket feed.

mod config;
mod model;
mod monitor;
mod probe;
mod signal;
mod slack;
mod web;

use config::Config;
use monitor::{MonitorEngine, RetentionManager};
use probe::Checker;
use slack::SlackNotifier;
use web::Server;

use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("watchpost=info".parse()?),
        )
        .init();

    tracing::info!("Starting watchpost (PID: {})", std::process::id());

    // Load configuration
    let config_path = config::config_path();
    tracing::info!("Loading configuration from {}", config_path.display());
    let cfg = Config::load(&config_path)?;

    // Build and configure the engine
    let engine = MonitorEngine::new(Checker::new()?);
    engine.configure(cfg.monitors).await?;

    // Slack alert/recovery notifications
    let notifier = SlackNotifier::new(&cfg.slack)?;
    slack::register_notifier(&engine, notifier);

    // Realtime websocket feed
    let (realtime_tx, _) = broadcast::channel(256);
    web::register_realtime_listener(&engine, realtime_tx.clone());

    // SIGHUP reload, SIGUSR1 pause, SIGUSR2 resume
    let (control_tx, control_rx) = mpsc::channel(8);
    signal::spawn_signal_listeners(control_tx);
    tokio::spawn(signal::run_control_loop(
        control_rx,
        engine.clone(),
        config_path,
    ));

    // History retention
    let retention = RetentionManager::new(engine.clone());
    retention.start();

    // Start monitoring
    engine.start().await;
    tracing::info!("watchpost started successfully");

    // Start the API server
    let server = Server::new(config::http_port(), engine, realtime_tx);
    server.start().await?;

    Ok(())
}
