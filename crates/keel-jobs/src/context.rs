//! Managers shared by every job, built once at startup.

use std::sync::Arc;
use std::time::Duration;

use keel_autoscale::{AutoscalerManager, ScalingBehavior};
use keel_cluster::ClusterClient;
use keel_core::{ConfigError, KeelConfig, PlatformConfig};
use keel_secrets::{SecretCipher, SecretManager};
use keel_state::StateStore;
use keel_workload::{DeploymentManager, NamespaceManager, QuotaSpec, RolloutSettings};

pub struct JobContext {
    pub store: StateStore,
    pub namespaces: NamespaceManager,
    pub secrets: SecretManager,
    pub deployments: DeploymentManager,
    pub autoscalers: AutoscalerManager,
    pub rollout_timeout: Duration,
}

impl JobContext {
    pub fn from_config(
        config: &KeelConfig,
        cluster: Arc<dyn ClusterClient>,
        store: StateStore,
        cipher: Arc<SecretCipher>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            store,
            namespaces: NamespaceManager::new(cluster.clone())
                .with_quota(QuotaSpec::from_config(&config.namespace)),
            secrets: SecretManager::new(cluster.clone(), cipher),
            deployments: DeploymentManager::new(
                cluster.clone(),
                config.platform.clone(),
                RolloutSettings::from_config(&config.rollout)?,
            ),
            autoscalers: AutoscalerManager::new(
                cluster,
                ScalingBehavior::from_config(&config.autoscale)?,
            ),
            rollout_timeout: config.rollout.timeout()?,
        })
    }

    pub fn platform(&self) -> &PlatformConfig {
        self.deployments.platform()
    }
}
