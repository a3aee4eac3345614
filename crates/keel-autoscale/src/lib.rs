//! keel-autoscale — horizontal autoscalers bound to workloads.
//!
//! # Scaling behavior
//!
//! Deliberately asymmetric:
//!
//! ```text
//! scale-down: stabilization window (5m), at most 50% of replicas per 60s
//! scale-up:   no stabilization, max(+100% per 15s, +4 pods per 15s)
//! ```
//!
//! Transient dips do not shed capacity; spikes are absorbed quickly.
//! "No autoscaler configured" is a normal state, so lookups return `None`
//! or an empty list instead of an error.

pub mod behavior;
pub mod manager;

pub use behavior::ScalingBehavior;
pub use manager::{AutoscaleError, AutoscalerManager, AutoscalerSpec, AutoscalerStatus};
