//! Concurrency controller for the unit scheduler.
//!
//! Run state is an explicit immutable value threaded through a reducer:
//! every event (`UnitCompleted`, `RateLimited`, `Reset`, …) produces a new
//! `RunState` rather than editing shared state in place, so concurrent
//! completion callbacks can never observe a half-applied transition.
//!
//! The cooldown logic is factored into `CooldownPolicy`, shared by the
//! stage-1 scheduler and the stage-2/3 batch loop.

use crate::defaults;
use crate::pipeline::types::{RateLimitSignal, SchedulerState, UnitStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Configuration for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Initial concurrency cap. Irreversibly dropped to 1 on the first
    /// rate-limit of a run.
    pub max_concurrent: usize,
    /// Cooldown duration in ticks after a rate-limit signal.
    pub cooldown_ticks: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MAX_CONCURRENT,
            cooldown_ticks: defaults::COOLDOWN_TICKS,
        }
    }
}

/// Global pause applied after a rate-limit signal.
///
/// Only one cooldown is active at a time; a second signal arriving
/// mid-cooldown is ignored rather than extending the pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownPolicy {
    ticks: u32,
    remaining: u32,
}

impl CooldownPolicy {
    pub fn new(ticks: u32) -> Self {
        Self { ticks, remaining: 0 }
    }

    /// Arms the cooldown unless one is already running.
    pub fn on_rate_limited(&mut self, signal: &RateLimitSignal) {
        if self.remaining > 0 {
            debug!(
                stage = %signal.stage,
                model = %signal.offending_model_id,
                "rate limit signal during active cooldown, ignoring"
            );
            return;
        }
        warn!(
            stage = %signal.stage,
            model = %signal.offending_model_id,
            ticks = self.ticks,
            "rate limited, entering cooldown"
        );
        self.remaining = self.ticks;
    }

    /// True while no new invocations may be dispatched.
    pub fn is_blocked(&self) -> bool {
        self.remaining > 0
    }

    /// Advances the cooldown by one tick.
    pub fn tick(&mut self) {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                debug!("cooldown expired, resuming dispatch");
            }
        }
    }

    /// Ends the cooldown immediately.
    pub fn clear(&mut self, reason: &str) {
        if self.remaining > 0 {
            warn!(reason, "cooldown cleared early");
            self.remaining = 0;
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// Events folded through the run-state reducer.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A pending unit was handed to the invocation engine.
    UnitStarted(usize),
    UnitCompleted(usize),
    UnitFailed(usize),
    /// The unit reverts to pending and the cooldown arms; the cap drops to 1
    /// for the remainder of the run.
    RateLimited(usize, RateLimitSignal),
    /// Manual retry of a failed unit.
    UnitRequeued(usize),
    CooldownTick,
    CooldownCleared(String),
}

/// Immutable scheduler run state.
///
/// Unit statuses are indexed by `order_index` (dense and zero-based, so a
/// plain Vec suffices).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    statuses: Vec<UnitStatus>,
    concurrency_cap: usize,
    cooldown: CooldownPolicy,
    rate_limited_once: bool,
}

impl RunState {
    pub fn new(total_units: usize, config: SchedulerConfig) -> Self {
        Self {
            statuses: vec![UnitStatus::Pending; total_units],
            concurrency_cap: config.max_concurrent.max(1),
            cooldown: CooldownPolicy::new(config.cooldown_ticks),
            rate_limited_once: false,
        }
    }

    /// Applies one event, producing the successor state.
    #[must_use]
    pub fn apply(&self, event: RunEvent) -> Self {
        let mut next = self.clone();
        match event {
            RunEvent::UnitStarted(i) => next.set_status(i, UnitStatus::Processing),
            RunEvent::UnitCompleted(i) => next.set_status(i, UnitStatus::Completed),
            RunEvent::UnitFailed(i) => next.set_status(i, UnitStatus::Failed),
            RunEvent::RateLimited(i, signal) => {
                // Not a failure: the unit re-enters the queue after cooldown.
                next.set_status(i, UnitStatus::Pending);
                next.cooldown.on_rate_limited(&signal);
                if !next.rate_limited_once {
                    warn!(
                        old_cap = next.concurrency_cap,
                        "dropping concurrency cap to 1 for the remainder of this run"
                    );
                    next.concurrency_cap = 1;
                    next.rate_limited_once = true;
                }
            }
            RunEvent::UnitRequeued(i) => {
                if next.statuses.get(i) == Some(&UnitStatus::Failed) {
                    next.set_status(i, UnitStatus::Pending);
                }
            }
            RunEvent::CooldownTick => next.cooldown.tick(),
            RunEvent::CooldownCleared(reason) => next.cooldown.clear(&reason),
        }
        next
    }

    fn set_status(&mut self, index: usize, status: UnitStatus) {
        if let Some(slot) = self.statuses.get_mut(index) {
            *slot = status;
        }
    }

    pub fn status(&self, index: usize) -> Option<UnitStatus> {
        self.statuses.get(index).copied()
    }

    fn count(&self, status: UnitStatus) -> usize {
        self.statuses.iter().filter(|s| **s == status).count()
    }

    /// Order indices of pending units that may be launched right now:
    /// nothing while the cooldown is active, otherwise enough to fill the
    /// gap between in-flight work and the cap.
    pub fn launchable(&self) -> Vec<usize> {
        if self.cooldown.is_blocked() {
            return Vec::new();
        }
        let in_flight = self.count(UnitStatus::Processing);
        let room = self.concurrency_cap.saturating_sub(in_flight);
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == UnitStatus::Pending)
            .map(|(i, _)| i)
            .take(room)
            .collect()
    }

    /// True once no unit is pending or in flight.
    pub fn is_settled(&self) -> bool {
        !self
            .statuses
            .iter()
            .any(|s| matches!(s, UnitStatus::Pending | UnitStatus::Processing))
    }

    pub fn cooldown_active(&self) -> bool {
        self.cooldown.is_blocked()
    }

    /// Read-only snapshot for callers.
    pub fn snapshot(&self) -> SchedulerState {
        SchedulerState {
            total_units: self.statuses.len(),
            completed: self.count(UnitStatus::Completed),
            processing: self.count(UnitStatus::Processing),
            failed: self.count(UnitStatus::Failed),
            concurrency_cap: self.concurrency_cap,
            cooldown_active: self.cooldown.is_blocked(),
            cooldown_remaining: self.cooldown.remaining(),
        }
    }
}
