//! keel-jobs — the deploy consumers and the queue that drives them.
//!
//! # Consumers
//!
//! [`DeployConsumer`] takes one deployment record from PENDING to RUNNING
//! or FAILED:
//!
//! ```text
//! DEPLOYING → namespace → secret → workload + exposure + ingress
//!           → wait for rollout → capture logs
//!           → RUNNING (stop siblings, set URL, autoscaler) | FAILED (cleanup)
//! ```
//!
//! [`TemplateConsumer`] stands up a whole template in two passes: register
//! (or reuse) one service per definition, then resolve each service's
//! environment and issue its manifests. It does not wait for rollouts.
//!
//! A rollout that fails is a normal outcome (`Ok`). Any other error marks
//! the record FAILED, cleans up best-effort and is returned so the
//! [`JobRunner`] can retry it.

pub mod context;
pub mod deploy;
pub mod error;
pub mod job;
pub mod resolver;
pub mod runner;
pub mod template;

pub use context::JobContext;
pub use deploy::{DeployConsumer, DeployOutcome};
pub use error::{JobError, JobResult};
pub use job::{DeployJob, Job, JobOutcome, TemplateJob};
pub use resolver::{RegisteredService, ResolveError, ResolvedVar, ValueResolver};
pub use runner::{Consumers, JobExecutor, JobQueue, JobRunner, RunnerSettings, SubmitError};
pub use template::{TemplateConsumer, TemplateOutcome};
