//! keel-rollout — judging whether a new workload came up.
//!
//! # Components
//!
//! - **`watch`** — Rollout-health state machine (`Polling → Ready | FailedFast | TimedOut`)
//! - **`signature`** — Container states that almost never self-resolve

pub mod signature;
pub mod watch;

pub use signature::{CRASH_REASONS, crash_signature, failure_signatures};
pub use watch::{Observation, RolloutOutcome, RolloutPhase, RolloutWatch};
