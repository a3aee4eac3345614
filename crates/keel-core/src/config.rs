//! keel.toml configuration parser.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub platform: PlatformConfig,
    pub rollout: RolloutConfig,
    pub autoscale: AutoscaleConfig,
    pub namespace: NamespaceConfig,
    pub jobs: JobsConfig,
    pub api: ApiConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Suffix appended to generated subdomains (`<sub>.<suffix>`).
    pub domain_suffix: String,
    pub ingress_class: String,
    /// Pre-provisioned wildcard certificate for platform subdomains.
    pub wildcard_tls_secret: String,
    /// Issuer asked to mint certificates for custom domains.
    pub cluster_issuer: String,
    /// System env var carrying a service's public domain.
    pub public_domain_env: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            domain_suffix: "apps.keel.local".to_string(),
            ingress_class: "nginx".to_string(),
            wildcard_tls_secret: "keel-wildcard-tls".to_string(),
            cluster_issuer: "letsencrypt-prod".to_string(),
            public_domain_env: "PUBLIC_DOMAIN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub timeout: String,
    pub interval: String,
    /// Consecutive polls showing a crash signature before giving up early.
    pub failure_threshold: u32,
    /// Log lines captured per pod.
    pub log_tail: u32,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            timeout: "5m".to_string(),
            interval: "5s".to_string(),
            failure_threshold: 3,
            log_tail: 200,
        }
    }
}

impl RolloutConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("rollout.timeout", &self.timeout)
    }

    pub fn interval(&self) -> Result<Duration, ConfigError> {
        duration_field("rollout.interval", &self.interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    /// Stabilization window before scaling down.
    pub scale_down_window: String,
    /// Max share of current replicas removed per period.
    pub scale_down_percent: u32,
    pub scale_up_percent: u32,
    pub scale_up_pods: u32,
    pub period: String,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            scale_down_window: "5m".to_string(),
            scale_down_percent: 50,
            scale_up_percent: 100,
            scale_up_pods: 4,
            period: "60s".to_string(),
        }
    }
}

impl AutoscaleConfig {
    pub fn scale_down_window(&self) -> Result<Duration, ConfigError> {
        duration_field("autoscale.scale_down_window", &self.scale_down_window)
    }

    pub fn period(&self) -> Result<Duration, ConfigError> {
        duration_field("autoscale.period", &self.period)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Attach a ResourceQuota to new tenant namespaces. Off by default:
    /// capacity is enforced by the billing layer.
    pub resource_quota: bool,
    pub quota_cpu: Option<String>,
    pub quota_memory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff: String,
    pub queue_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_backoff: "5s".to_string(),
            queue_capacity: 256,
        }
    }
}

impl JobsConfig {
    pub fn retry_backoff(&self) -> Result<Duration, ConfigError> {
        duration_field("jobs.retry_backoff", &self.retry_backoff)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "/var/lib/keel/keel.redb".to_string(),
        }
    }
}

impl KeelConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: KeelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unparseable durations up front instead of at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rollout.timeout()?;
        self.rollout.interval()?;
        self.autoscale.scale_down_window()?;
        self.autoscale.period()?;
        self.jobs.retry_backoff()?;
        Ok(())
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}
