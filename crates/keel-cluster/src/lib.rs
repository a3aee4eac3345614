//! keel-cluster — the orchestration API as keel sees it.
//!
//! [`ClusterClient`] is a small, object-safe surface over the handful of
//! object kinds keel reconciles. Two implementations ship:
//!
//! - [`KubeCluster`]: talks to a real API server via `kube`.
//! - [`MemoryCluster`]: a process-local map with simulated rollouts, used by
//!   the test suites of every crate above this one.
//!
//! Writes go through [`apply`] (replace-else-create) or [`create_if_absent`]
//! (check-then-create) so that repeating a call converges instead of
//! duplicating.

pub mod client;
pub mod error;
pub mod live;
pub mod manifest;
pub mod memory;

pub use client::{
    ClusterClient, LogRequest, apply, create_if_absent, delete_if_exists, get_if_exists,
};
pub use error::{ClusterError, ClusterResult};
pub use live::KubeCluster;
pub use manifest::{Manifest, ResourceKind, selector_matches};
pub use memory::{Fault, MemoryCluster, RolloutMode};

// Re-exported so dependents build manifests against the same API version.
pub use k8s_openapi;
