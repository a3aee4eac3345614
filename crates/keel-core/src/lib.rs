//! keel-core — configuration and naming shared by every keel crate.
//!
//! Nothing in here talks to the cluster or the store. The naming rules are
//! the single source of truth for how records map to cluster object names,
//! so every manager and consumer must go through [`names`].

pub mod config;
pub mod duration;
pub mod names;

pub use config::{
    ApiConfig, AutoscaleConfig, ConfigError, JobsConfig, KeelConfig, NamespaceConfig,
    PlatformConfig, RolloutConfig, StoreConfig,
};
pub use duration::parse_duration;
