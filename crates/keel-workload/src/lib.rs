//! keel-workload — Namespace Manager and Deployment Manager.
//!
//! # Blue/green naming
//!
//! A **workload** exists per rollout attempt: it is named after the
//! deployment record and labeled with the deployment id. The **exposure**
//! object is named after the service and never recreated; its selector
//! points at the current deployment id, so cutting traffic over is a
//! selector update. Removing an old rollout deletes only its workload.
//!
//! Every write is replace-else-create, except volume claims which are
//! immutable and use check-then-create.

pub mod deployment;
pub mod error;
pub mod manifests;
pub mod namespace;
pub mod pods;

pub use deployment::{DeploymentManager, RolloutSettings};
pub use error::{WorkloadError, WorkloadResult};
pub use manifests::{ExposureSpec, IngressSpec, VolumeMountSpec, WorkloadSpec};
pub use namespace::{NamespaceManager, QuotaSpec};
pub use pods::{ContainerReport, PodReport, PodStatusReport, describe_container};
