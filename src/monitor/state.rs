//! Per-target mutable state and the alert/recovery transition function.

use crate::model::CheckResult;

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Event decided by applying one outcome to a target's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing beyond the ordinary outcome notification.
    None,
    /// The consecutive-failure counter first reached the threshold.
    AlertRaised,
    /// The first success after the alert latch was set.
    Recovered,
}

/// Mutable per-target record owned exclusively by the engine.
///
/// All mutation happens through [`TargetState::apply`] under the
/// engine's state lock, so the read-modify-write of the counter and
/// latch is atomic with respect to query reads and retention trims.
#[derive(Debug, Default)]
pub struct TargetState {
    history: VecDeque<CheckResult>,
    consecutive_failures: u32,
    alert_latched: bool,
    /// Latch value observed immediately before the latest outcome was
    /// applied. Backs the recovery check on the query surface: after a
    /// success clears the latch, this still tells a listener whether
    /// that success ended a latch cycle.
    was_latched: bool,
}

impl TargetState {
    /// Apply one outcome: update counter and latch, append to history,
    /// and decide whether an alert or recovery event fires.
    ///
    /// The alert fires exactly once, when the counter first reaches the
    /// threshold; the latch suppresses repeats until a success resets
    /// it. The recovery fires exactly once per latch cycle, on the
    /// first success after the latch was set.
    pub fn apply(&mut self, result: CheckResult, alert_threshold: u32) -> Transition {
        self.was_latched = self.alert_latched;

        let transition = if result.is_success() {
            self.consecutive_failures = 0;
            let recovered = self.alert_latched;
            self.alert_latched = false;
            if recovered {
                Transition::Recovered
            } else {
                Transition::None
            }
        } else {
            self.consecutive_failures += 1;
            if self.consecutive_failures == alert_threshold && !self.alert_latched {
                self.alert_latched = true;
                Transition::AlertRaised
            } else {
                Transition::None
            }
        };

        self.history.push_back(result);
        transition
    }

    /// Drop history entries older than the cutoff.
    pub fn trim_before(&mut self, cutoff: DateTime<Utc>) {
        while let Some(front) = self.history.front() {
            if front.checked_at < cutoff {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn history(&self) -> &VecDeque<CheckResult> {
        &self.history
    }

    pub fn latest(&self) -> Option<&CheckResult> {
        self.history.back()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn alert_latched(&self) -> bool {
        self.alert_latched
    }

    pub fn was_latched(&self) -> bool {
        self.was_latched
    }
}
