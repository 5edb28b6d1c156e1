//! Monitoring engine: per-target check loops, alert state machine,
//! listener fan-out, and the query surface.

mod retention;
mod state;

pub use retention::RetentionManager;
pub use state::{TargetState, Transition};

use crate::config::{self, ConfigError};
use crate::model::{CheckResult, CurrentStatus, StatusSnapshot, TargetConfig};
use crate::probe::Checker;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Callback invoked once per processed check result, in registration
/// order, synchronously with result processing.
pub trait ResultListener: Send + Sync {
    fn on_result(&self, result: &CheckResult);
}

impl<F> ResultListener for F
where
    F: Fn(&CheckResult) + Send + Sync,
{
    fn on_result(&self, result: &CheckResult) {
        self(result)
    }
}

/// Handle for one start()/stop() cycle.
struct RunHandle {
    stop_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    checker: Checker,
    targets: RwLock<HashMap<String, TargetConfig>>,
    states: RwLock<HashMap<String, TargetState>>,
    listeners: RwLock<Vec<Arc<dyn ResultListener>>>,
    // Serializes start/stop/configure; held across the join in stop().
    run: Mutex<Option<RunHandle>>,
}

/// The monitoring engine.
///
/// Owns all target descriptors and per-target state. Check loops never
/// mutate state directly; every result goes through the state machine
/// under the state lock before listeners see it. Cloning is cheap and
/// shares the same engine.
#[derive(Clone)]
pub struct MonitorEngine {
    inner: Arc<Inner>,
}

impl MonitorEngine {
    pub fn new(checker: Checker) -> Self {
        Self {
            inner: Arc::new(Inner {
                checker,
                targets: RwLock::new(HashMap::new()),
                states: RwLock::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
                run: Mutex::new(None),
            }),
        }
    }

    /// Replace the active descriptor set.
    ///
    /// Validation is all-or-nothing: on error the previous configuration
    /// stays in effect. If the engine is running it is paused around the
    /// swap and restarted afterwards. State is preserved for ids that
    /// persist across the call and discarded for removed ids.
    pub async fn configure(&self, targets: Vec<TargetConfig>) -> Result<(), ConfigError> {
        config::validate_targets(&targets)?;

        let was_running = self.stop().await;

        {
            let mut target_map = write_lock(&self.inner.targets);
            let mut states = write_lock(&self.inner.states);

            let new_map: HashMap<String, TargetConfig> = targets
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect();

            states.retain(|id, _| {
                let keep = new_map.contains_key(id);
                if !keep {
                    tracing::debug!(target_id = %id, "Removing monitor from configuration");
                }
                keep
            });
            for id in new_map.keys() {
                states.entry(id.clone()).or_default();
            }

            *target_map = new_map;
        }

        if was_running {
            self.start().await;
        }

        Ok(())
    }

    /// Spawn one check loop per active target. Idempotent.
    pub async fn start(&self) {
        let mut run = self.inner.run.lock().await;
        if run.is_some() {
            return;
        }

        let (stop_tx, _) = broadcast::channel(1);
        let active: Vec<TargetConfig> = {
            let targets = read_lock(&self.inner.targets);
            targets.values().filter(|t| t.is_active).cloned().collect()
        };

        tracing::info!("Starting monitor engine with {} active targets", active.len());

        let tasks = active
            .into_iter()
            .map(|target| {
                let inner = self.inner.clone();
                let stop_rx = stop_tx.subscribe();
                tokio::spawn(run_check_loop(inner, target, stop_rx))
            })
            .collect();

        *run = Some(RunHandle { stop_tx, tasks });
    }

    /// Cancel all check loops and wait for them to exit. Idempotent.
    ///
    /// Returns whether the engine was running. After this returns no
    /// check is in flight and no further result will be processed.
    pub async fn stop(&self) -> bool {
        let mut run = self.inner.run.lock().await;
        let Some(handle) = run.take() else {
            return false;
        };

        let _ = handle.stop_tx.send(());
        for task in handle.tasks {
            if let Err(e) = task.await {
                tracing::debug!("Error joining check loop: {e}");
            }
        }

        tracing::info!("Monitor engine stopped");
        true
    }

    /// Register a listener for every processed result across all targets.
    pub fn add_listener(&self, listener: Arc<dyn ResultListener>) {
        write_lock(&self.inner.listeners).push(listener);
    }

    /// Snapshot of one target for the query surface.
    pub fn status(&self, id: &str) -> StatusSnapshot {
        if !read_lock(&self.inner.targets).contains_key(id) {
            return StatusSnapshot {
                id: id.to_string(),
                current_status: CurrentStatus::Unknown,
                last_checked: None,
                last_latency_ms: None,
                recent_errors_count: 0,
            };
        }

        let states = read_lock(&self.inner.states);
        let state = states.get(id);
        match state.and_then(|s| s.latest()) {
            None => StatusSnapshot {
                id: id.to_string(),
                current_status: CurrentStatus::Pending,
                last_checked: None,
                last_latency_ms: None,
                recent_errors_count: 0,
            },
            Some(latest) => StatusSnapshot {
                id: id.to_string(),
                current_status: if latest.is_success() {
                    CurrentStatus::Ok
                } else {
                    CurrentStatus::Ng
                },
                last_checked: Some(latest.checked_at),
                last_latency_ms: Some(latest.latency_ms),
                recent_errors_count: state.map(|s| s.consecutive_failures()).unwrap_or(0),
            },
        }
    }

    pub fn history(&self, id: &str) -> Vec<CheckResult> {
        read_lock(&self.inner.states)
            .get(id)
            .map(|s| s.history().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn consecutive_failures(&self, id: &str) -> u32 {
        read_lock(&self.inner.states)
            .get(id)
            .map(|s| s.consecutive_failures())
            .unwrap_or(0)
    }

    pub fn alert_latched(&self, id: &str) -> bool {
        read_lock(&self.inner.states)
            .get(id)
            .is_some_and(|s| s.alert_latched())
    }

    /// Whether the alert latch was set at the moment the most recent
    /// result for this target was processed. A success with this flag
    /// set is the exactly-once recovery condition for notifiers.
    pub fn was_alert_latched(&self, id: &str) -> bool {
        read_lock(&self.inner.states)
            .get(id)
            .is_some_and(|s| s.was_latched())
    }

    pub fn target(&self, id: &str) -> Option<TargetConfig> {
        read_lock(&self.inner.targets).get(id).cloned()
    }

    pub fn targets(&self) -> Vec<TargetConfig> {
        let mut targets: Vec<TargetConfig> =
            read_lock(&self.inner.targets).values().cloned().collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));
        targets
    }

    #[cfg(test)]
    pub(crate) fn seed_state_for_test(&self, id: &str, seed: impl FnOnce(&mut TargetState)) {
        let mut states = write_lock(&self.inner.states);
        seed(states.entry(id.to_string()).or_default());
    }

    /// Drop all history entries older than the cutoff. Used by the
    /// retention sweeper; takes the same lock as result processing.
    pub fn trim_history(&self, cutoff: DateTime<Utc>) {
        let mut states = write_lock(&self.inner.states);
        for state in states.values_mut() {
            state.trim_before(cutoff);
        }
    }
}

/// Fixed-cadence check loop for a single target.
///
/// Scheduling is drift-corrected: the next tick is anchored to the
/// moment the check started, not to when processing finished. An
/// overrunning target degrades to back-to-back checks with a warning;
/// the missed tick is dropped, never queued.
async fn run_check_loop(
    inner: Arc<Inner>,
    target: TargetConfig,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let interval = Duration::from_millis(target.interval_ms);
    tracing::info!(target_id = %target.id, url = %target.url, "Starting check loop");

    loop {
        let next_tick = Instant::now() + interval;

        let result = inner.checker.check(&target).await;
        process_result(&inner, &target, result);

        if stop_requested(&mut stop_rx) {
            break;
        }

        if Instant::now() < next_tick {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = tokio::time::sleep_until(next_tick) => {}
            }
        } else {
            tracing::warn!(
                target_id = %target.id,
                "Monitor is running behind schedule, skipping missed tick"
            );
        }
    }

    tracing::debug!(target_id = %target.id, "Check loop stopped");
}

fn stop_requested(stop_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        stop_rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}

/// Apply the state machine to one result and fan it out to listeners.
///
/// The read-modify-write of the counter and latch happens under the
/// state lock; listeners run after the lock is released so a slow
/// listener cannot stall queries or the retention sweeper.
fn process_result(inner: &Inner, target: &TargetConfig, result: CheckResult) {
    let transition = {
        let mut states = write_lock(&inner.states);
        states
            .entry(target.id.clone())
            .or_default()
            .apply(result.clone(), target.alert_threshold)
    };

    match &result.error {
        None => tracing::info!(
            target_id = %result.target_id,
            latency_ms = result.latency_ms,
            http_status = result.http_status,
            "Check OK"
        ),
        Some(error) => tracing::error!(
            target_id = %result.target_id,
            latency_ms = result.latency_ms,
            http_status = result.http_status,
            error = %error,
            "Check NG"
        ),
    }

    match transition {
        Transition::AlertRaised => tracing::error!(
            target_id = %result.target_id,
            threshold = target.alert_threshold,
            "Alert: consecutive error threshold reached"
        ),
        Transition::Recovered => tracing::info!(
            target_id = %result.target_id,
            "Recovered: target is healthy again"
        ),
        Transition::None => {}
    }

    let listeners: Vec<Arc<dyn ResultListener>> = read_lock(&inner.listeners).clone();
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener.on_result(&result))).is_err() {
            tracing::error!(
                target_id = %result.target_id,
                "Result listener panicked, skipping it for this result"
            );
        }
    }
}

// A poisoned lock only means another thread panicked mid-write of a
// plain map entry; keep serving rather than tearing the engine down.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

    /// Server whose response status can be flipped while it runs.
    async fn spawn_switchable_server(status: Arc<AtomicU16>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().route(
            "/health",
            get(move || {
                let status = status.clone();
                async move {
                    let code = status.load(Ordering::SeqCst);
                    let body = if code == 200 { "OK" } else { "Error" };
                    (axum::http::StatusCode::from_u16(code).unwrap(), body)
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn target_for(addr: SocketAddr) -> TargetConfig {
        TargetConfig {
            id: "web-1".to_string(),
            url: format!("http://{addr}/health"),
            interval_ms: 100,
            timeout_ms: 1000,
            expected_status: 200,
            expected_content: "OK".to_string(),
            alert_threshold: 3,
            ignore_tls_error: false,
            is_active: true,
        }
    }

    fn engine() -> MonitorEngine {
        MonitorEngine::new(Checker::new().unwrap())
    }

    /// Poll until the condition holds or the deadline passes.
    async fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_collects_successes_on_interval() {
        let addr = spawn_switchable_server(Arc::new(AtomicU16::new(200))).await;
        let engine = engine();
        engine.configure(vec![target_for(addr)]).await.unwrap();
        engine.start().await;

        let probe = engine.clone();
        wait_for(move || probe.history("web-1").len() >= 3).await;
        engine.stop().await;

        let history = engine.history("web-1");
        assert!(history.len() >= 3);
        assert!(history.iter().all(|r| r.is_success()));
        assert_eq!(engine.status("web-1").current_status, CurrentStatus::Ok);
    }

    #[tokio::test]
    async fn test_alert_once_then_recovery_once() {
        let status = Arc::new(AtomicU16::new(500));
        let addr = spawn_switchable_server(status.clone()).await;
        let engine = engine();
        engine.configure(vec![target_for(addr)]).await.unwrap();

        // Notifier-style listener: derives alert/recovery eligibility
        // from the query surface, not from the result itself.
        let alerts = Arc::new(AtomicUsize::new(0));
        let recoveries = Arc::new(AtomicUsize::new(0));
        {
            let query = engine.clone();
            let alerts = alerts.clone();
            let recoveries = recoveries.clone();
            engine.add_listener(Arc::new(move |result: &CheckResult| {
                let id = result.target_id.as_str();
                if !result.is_success() && query.consecutive_failures(id) == 3 {
                    alerts.fetch_add(1, Ordering::SeqCst);
                }
                if result.is_success() && query.was_alert_latched(id) {
                    recoveries.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        engine.start().await;

        // Four failures: the alert must fire exactly once, at the third.
        let probe = engine.clone();
        wait_for(move || probe.history("web-1").len() >= 4).await;
        assert_eq!(alerts.load(Ordering::SeqCst), 1);
        assert!(engine.alert_latched("web-1"));
        assert!(engine.consecutive_failures("web-1") >= 3);

        // Heal the server: exactly one recovery, counter reset.
        let healthy_after = engine.history("web-1").len();
        status.store(200, Ordering::SeqCst);
        let probe = engine.clone();
        wait_for(move || {
            probe
                .history("web-1")
                .iter()
                .skip(healthy_after)
                .filter(|r| r.is_success())
                .count()
                >= 2
        })
        .await;
        engine.stop().await;

        assert_eq!(alerts.load(Ordering::SeqCst), 1);
        assert_eq!(recoveries.load(Ordering::SeqCst), 1);
        assert_eq!(engine.consecutive_failures("web-1"), 0);
        assert!(!engine.alert_latched("web-1"));
    }

    #[tokio::test]
    async fn test_stop_halts_processing() {
        let addr = spawn_switchable_server(Arc::new(AtomicU16::new(200))).await;
        let engine = engine();
        engine.configure(vec![target_for(addr)]).await.unwrap();
        engine.start().await;

        let probe = engine.clone();
        wait_for(move || !probe.history("web-1").is_empty()).await;
        engine.stop().await;

        let len_after_stop = engine.history("web-1").len();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(engine.history("web-1").len(), len_after_stop);

        // stop() is idempotent when already stopped.
        assert!(!engine.stop().await);
    }

    #[tokio::test]
    async fn test_reconfigure_preserves_and_discards_state() {
        let addr = spawn_switchable_server(Arc::new(AtomicU16::new(200))).await;
        let engine = engine();
        engine.configure(vec![target_for(addr)]).await.unwrap();
        engine.start().await;

        let probe = engine.clone();
        wait_for(move || probe.history("web-1").len() >= 2).await;

        // Same id persists across reconfiguration: history survives.
        let mut second = target_for(addr);
        second.id = "web-2".to_string();
        engine
            .configure(vec![target_for(addr), second])
            .await
            .unwrap();
        assert!(engine.history("web-1").len() >= 2);
        let probe = engine.clone();
        wait_for(move || !probe.history("web-2").is_empty()).await;

        // Dropping the id discards its state entirely.
        let mut only_second = target_for(addr);
        only_second.id = "web-2".to_string();
        engine.configure(vec![only_second]).await.unwrap();
        engine.stop().await;

        assert!(engine.history("web-1").is_empty());
        assert_eq!(engine.status("web-1").current_status, CurrentStatus::Unknown);
        assert_eq!(engine.status("web-2").current_status, CurrentStatus::Ok);
    }

    #[tokio::test]
    async fn test_invalid_configure_keeps_previous_config() {
        let addr = spawn_switchable_server(Arc::new(AtomicU16::new(200))).await;
        let engine = engine();
        engine.configure(vec![target_for(addr)]).await.unwrap();

        let mut bad = target_for(addr);
        bad.id = "web-2".to_string();
        bad.interval_ms = 10;
        let err = engine.configure(vec![bad]).await.unwrap_err();
        assert!(err.to_string().contains("interval_ms"));

        // Prior descriptor set still in effect, nothing partially applied.
        assert!(engine.target("web-1").is_some());
        assert!(engine.target("web-2").is_none());
    }

    #[tokio::test]
    async fn test_inactive_target_is_not_scheduled() {
        let addr = spawn_switchable_server(Arc::new(AtomicU16::new(200))).await;
        let engine = engine();
        let mut target = target_for(addr);
        target.is_active = false;
        engine.configure(vec![target]).await.unwrap();
        engine.start().await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        engine.stop().await;

        assert!(engine.history("web-1").is_empty());
        assert_eq!(engine.status("web-1").current_status, CurrentStatus::Pending);
    }

    #[tokio::test]
    async fn test_listener_panic_is_isolated() {
        let addr = spawn_switchable_server(Arc::new(AtomicU16::new(200))).await;
        let engine = engine();
        engine.configure(vec![target_for(addr)]).await.unwrap();

        let invoked = Arc::new(AtomicUsize::new(0));
        engine.add_listener(Arc::new(|_: &CheckResult| {
            panic!("misbehaving listener");
        }));
        {
            let invoked = invoked.clone();
            engine.add_listener(Arc::new(move |_: &CheckResult| {
                invoked.fetch_add(1, Ordering::SeqCst);
            }));
        }

        engine.start().await;
        let probe = engine.clone();
        wait_for(move || probe.history("web-1").len() >= 2).await;
        engine.stop().await;

        // Later listeners still ran and monitoring continued.
        assert!(invoked.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_status_unknown_for_unconfigured_id() {
        let engine = engine();
        let snapshot = engine.status("nope");
        assert_eq!(snapshot.current_status, CurrentStatus::Unknown);
        assert_eq!(snapshot.last_checked, None);
    }

    #[tokio::test]
    async fn test_trim_history_drops_old_entries() {
        let engine = engine();
        {
            let mut states = write_lock(&engine.inner.states);
            let state = states.entry("web-1".to_string()).or_default();
            let mut old = CheckResult::success("web-1", 10, 200);
            old.checked_at = Utc::now() - chrono::Duration::hours(25);
            state.apply(old, 3);
            state.apply(CheckResult::success("web-1", 10, 200), 3);
        }

        engine.trim_history(Utc::now() - chrono::Duration::hours(24));

        assert_eq!(engine.history("web-1").len(), 1);
    }
}
