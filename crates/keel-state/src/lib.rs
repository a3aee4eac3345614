//! keel-state — durable records for the keel orchestration engine.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the records the deploy
//! consumers read and write: services, deployments, custom domains,
//! encrypted environment variables, env reference edges, volumes, template
//! definitions and template deployment batches.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Child records (`{service_id}:{id}`) are prefix-scanned by parent.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. redb serializes write transactions,
//! which is what makes [`StateStore::activate_deployment`] safe against two
//! concurrent rollouts of the same service.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
