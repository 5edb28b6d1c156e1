//! Retention sweeper: periodically trims outcome history.

use super::MonitorEngine;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Sweep period, independent of any target's own interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// History older than this is discarded.
const RETENTION_WINDOW_HOURS: i64 = 24;

/// Background task trimming history across all targets.
pub struct RetentionManager {
    engine: MonitorEngine,
    stop: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(engine: MonitorEngine) -> Self {
        Self {
            engine,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the sweeper background task.
    pub fn start(&self) {
        let engine = self.engine.clone();
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let (tx, _) = broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            tracing::info!("Starting data retention task");

            let mut rx = tx.subscribe();
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            // The first tick of a tokio interval fires immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        sweep(&engine);
                    }
                }
            }
        });
    }

    /// Stop the sweeper.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

fn sweep(engine: &MonitorEngine) {
    tracing::info!(
        "Cleaning up monitoring data older than {} hours",
        RETENTION_WINDOW_HOURS
    );
    let cutoff = Utc::now() - ChronoDuration::hours(RETENTION_WINDOW_HOURS);
    engine.trim_history(cutoff);
}
