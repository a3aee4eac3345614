//! Rollout-health watch — the polling sub-state machine.
//!
//! The caller polls the cluster on a fixed interval and feeds each result in
//! as an [`Observation`]. The watch decides when to stop:
//!
//! ```text
//! Polling { n } ──ready──────────────────────▶ Ready
//!      │ ──crash signature, n+1 == threshold─▶ FailedFast
//!      │ ──crash signature─────▶ Polling { n+1 }
//!      │ ──clean poll──────────▶ Polling { 0 }
//!      └ ──deadline passed─────▶ TimedOut
//! ```
//!
//! The failure counter is consecutive, not cumulative.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One poll's view of the workload and its pods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub desired: i32,
    pub ready: i32,
    pub updated: i32,
    /// Crash signatures seen on this poll.
    pub failures: Vec<String>,
}

impl Observation {
    pub fn is_ready(&self) -> bool {
        self.ready == self.desired && self.updated == self.desired
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutPhase {
    Polling { consecutive_failures: u32 },
    Ready,
    FailedFast { reason: String },
    TimedOut,
}

/// Terminal result of waiting for a rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutOutcome {
    Ready,
    FailedFast { reason: String },
    TimedOut { after: Duration },
}

impl RolloutOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, RolloutOutcome::Ready)
    }

    /// Human-readable failure reason, `None` when ready.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            RolloutOutcome::Ready => None,
            RolloutOutcome::FailedFast { reason } => {
                Some(format!("rollout failed: {reason}"))
            }
            RolloutOutcome::TimedOut { after } => Some(format!(
                "rollout timed out after {}s without becoming ready",
                after.as_secs()
            )),
        }
    }
}

/// Tracks one rollout wait.
#[derive(Debug, Clone)]
pub struct RolloutWatch {
    workload: String,
    phase: RolloutPhase,
    threshold: u32,
    polls: u32,
}

impl RolloutWatch {
    pub fn new(workload: &str, threshold: u32) -> Self {
        Self {
            workload: workload.to_string(),
            phase: RolloutPhase::Polling {
                consecutive_failures: 0,
            },
            threshold: threshold.max(1),
            polls: 0,
        }
    }

    pub fn phase(&self) -> &RolloutPhase {
        &self.phase
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.phase, RolloutPhase::Polling { .. })
    }

    /// Feed one successful poll. No-op once finished.
    pub fn observe(&mut self, obs: &Observation) -> &RolloutPhase {
        let RolloutPhase::Polling {
            consecutive_failures,
        } = self.phase
        else {
            return &self.phase;
        };
        self.polls += 1;

        if obs.is_ready() {
            debug!(workload = %self.workload, polls = self.polls, "rollout ready");
            self.phase = RolloutPhase::Ready;
            return &self.phase;
        }

        if obs.failures.is_empty() {
            self.phase = RolloutPhase::Polling {
                consecutive_failures: 0,
            };
            return &self.phase;
        }

        let consecutive_failures = consecutive_failures + 1;
        if consecutive_failures >= self.threshold {
            warn!(
                workload = %self.workload,
                polls = self.polls,
                failures = ?obs.failures,
                "crash signature persisted, failing rollout early"
            );
            self.phase = RolloutPhase::FailedFast {
                reason: obs.failures.join("; "),
            };
        } else {
            debug!(
                workload = %self.workload,
                consecutive_failures,
                failures = ?obs.failures,
                "crash signature observed"
            );
            self.phase = RolloutPhase::Polling {
                consecutive_failures,
            };
        }
        &self.phase
    }

    /// A poll that could not be completed. The counter is left as is: a
    /// flaky API call is neither evidence of failure nor of recovery.
    pub fn poll_errored(&mut self, error: &str) {
        if !self.is_finished() {
            self.polls += 1;
            warn!(workload = %self.workload, %error, "rollout poll failed");
        }
    }

    /// The deadline passed. No-op once finished.
    pub fn time_out(&mut self) {
        if !self.is_finished() {
            self.phase = RolloutPhase::TimedOut;
        }
    }

    /// The terminal outcome, `None` while still polling.
    pub fn outcome(&self, waited: Duration) -> Option<RolloutOutcome> {
        match &self.phase {
            RolloutPhase::Polling { .. } => None,
            RolloutPhase::Ready => Some(RolloutOutcome::Ready),
            RolloutPhase::FailedFast { reason } => Some(RolloutOutcome::FailedFast {
                reason: reason.clone(),
            }),
            RolloutPhase::TimedOut => Some(RolloutOutcome::TimedOut { after: waited }),
        }
    }
}
