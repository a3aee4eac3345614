//! Deployment Manager: workloads, exposure, ingress, volume claims, rollout
//! waits and pod diagnostics.

use std::sync::Arc;
use std::time::Duration;

use keel_cluster::{
    ClusterClient, Manifest, ResourceKind, apply, create_if_absent, delete_if_exists,
};
use keel_core::{ConfigError, PlatformConfig, RolloutConfig};
use keel_rollout::{Observation, RolloutOutcome, RolloutWatch, failure_signatures};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::WorkloadResult;
use crate::manifests::{
    self, ExposureSpec, IngressSpec, WorkloadSpec, deployment_selector, workload_selector,
};
use crate::pods::{PodStatusReport, pod_log_block};

/// Polling parameters for rollout waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutSettings {
    pub interval: Duration,
    pub failure_threshold: u32,
    /// Log lines captured per pod.
    pub log_tail: i64,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            failure_threshold: 3,
            log_tail: 200,
        }
    }
}

impl RolloutSettings {
    pub fn from_config(config: &RolloutConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            interval: config.interval()?,
            failure_threshold: config.failure_threshold,
            log_tail: i64::from(config.log_tail),
        })
    }
}

#[derive(Clone)]
pub struct DeploymentManager {
    cluster: Arc<dyn ClusterClient>,
    platform: PlatformConfig,
    rollout: RolloutSettings,
}

impl DeploymentManager {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        platform: PlatformConfig,
        rollout: RolloutSettings,
    ) -> Self {
        Self {
            cluster,
            platform,
            rollout,
        }
    }

    pub fn platform(&self) -> &PlatformConfig {
        &self.platform
    }

    pub fn rollout_settings(&self) -> RolloutSettings {
        self.rollout
    }

    // ── Writes ─────────────────────────────────────────────────────

    pub async fn apply_workload(&self, spec: &WorkloadSpec) -> WorkloadResult<()> {
        let object = manifests::workload(spec)?;
        apply(self.cluster.as_ref(), &Manifest::Workload(object)).await?;
        info!(
            namespace = %spec.namespace,
            workload = %spec.name,
            image = %spec.image,
            replicas = spec.replicas,
            "workload applied"
        );
        Ok(())
    }

    /// Point the service's stable exposure at a deployment.
    pub async fn apply_exposure(&self, spec: &ExposureSpec) -> WorkloadResult<()> {
        let object = manifests::exposure(spec)?;
        apply(self.cluster.as_ref(), &Manifest::Exposure(object)).await?;
        info!(
            namespace = %spec.namespace,
            exposure = %spec.name,
            deployment_id = %spec.deployment_id,
            "exposure applied"
        );
        Ok(())
    }

    /// Apply the ingress, or delete it when the spec has no hosts.
    ///
    /// Returns whether an ingress exists afterwards.
    pub async fn reconcile_ingress(&self, spec: &IngressSpec) -> WorkloadResult<bool> {
        match manifests::ingress(spec, &self.platform)? {
            Some(object) => {
                apply(self.cluster.as_ref(), &Manifest::Ingress(object)).await?;
                info!(namespace = %spec.namespace, ingress = %spec.name, hosts = ?spec.hosts(), "ingress applied");
                Ok(true)
            }
            None => {
                self.delete_ingress(&spec.namespace, &spec.name).await?;
                Ok(false)
            }
        }
    }

    pub async fn delete_ingress(&self, namespace: &str, name: &str) -> WorkloadResult<bool> {
        let deleted =
            delete_if_exists(self.cluster.as_ref(), ResourceKind::Ingress, Some(namespace), name)
                .await?;
        if deleted {
            info!(%namespace, ingress = %name, "ingress deleted");
        }
        Ok(deleted)
    }

    /// Delete one rollout's workload. The exposure is never touched here.
    pub async fn delete_workload(&self, namespace: &str, name: &str) -> WorkloadResult<bool> {
        let deleted =
            delete_if_exists(self.cluster.as_ref(), ResourceKind::Workload, Some(namespace), name)
                .await?;
        info!(%namespace, workload = %name, deleted, "workload deleted");
        Ok(deleted)
    }

    /// Create a volume claim if absent. Claims are immutable, so an existing
    /// one is success.
    pub async fn ensure_volume_claim(
        &self,
        namespace: &str,
        claim_name: &str,
        size: &str,
        tenant_id: &str,
        service_id: &str,
    ) -> WorkloadResult<bool> {
        let object = manifests::volume_claim(namespace, claim_name, size, tenant_id, service_id)?;
        let created =
            create_if_absent(self.cluster.as_ref(), &Manifest::VolumeClaim(object)).await?;
        debug!(%namespace, claim = %claim_name, created, "volume claim ensured");
        Ok(created)
    }

    // ── Rollout ────────────────────────────────────────────────────

    async fn observe(&self, namespace: &str, name: &str) -> WorkloadResult<Observation> {
        let manifest = self
            .cluster
            .get(ResourceKind::Workload, Some(namespace), name)
            .await?;
        let workload = manifest.as_workload();
        let desired = workload
            .and_then(|w| w.spec.as_ref())
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let status = workload.and_then(|w| w.status.as_ref());
        let pods = self
            .cluster
            .list_pods(namespace, &workload_selector(name))
            .await?;
        Ok(Observation {
            desired,
            ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            updated: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            failures: failure_signatures(&pods),
        })
    }

    /// Poll until the workload is ready, a crash signature persists for
    /// `failure_threshold` consecutive polls, or `timeout` passes.
    pub async fn wait_for_rollout(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> RolloutOutcome {
        let started = Instant::now();
        let mut watch = RolloutWatch::new(name, self.rollout.failure_threshold);
        info!(%namespace, workload = %name, timeout_secs = timeout.as_secs(), "waiting for rollout");

        loop {
            match self.observe(namespace, name).await {
                Ok(obs) => {
                    watch.observe(&obs);
                }
                Err(e) => watch.poll_errored(&e.to_string()),
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                watch.time_out();
            }
            if let Some(outcome) = watch.outcome(elapsed) {
                match &outcome {
                    RolloutOutcome::Ready => {
                        info!(%namespace, workload = %name, polls = watch.polls(), "rollout ready");
                    }
                    other => {
                        warn!(%namespace, workload = %name, polls = watch.polls(), outcome = ?other, "rollout failed");
                    }
                }
                return outcome;
            }

            tokio::time::sleep(self.rollout.interval.min(timeout - elapsed)).await;
        }
    }

    // ── Diagnostics ────────────────────────────────────────────────

    /// Logs from every pod of a deployment, each prefixed by a status header.
    pub async fn pod_logs(
        &self,
        namespace: &str,
        deployment_id: &str,
        tail: Option<i64>,
    ) -> WorkloadResult<String> {
        let pods = self
            .cluster
            .list_pods(namespace, &deployment_selector(deployment_id))
            .await?;
        if pods.is_empty() {
            return Ok(format!("No pods found for deployment {deployment_id}\n"));
        }
        let tail = tail.or(Some(self.rollout.log_tail));
        let mut out = String::new();
        for pod in &pods {
            out.push_str(&pod_log_block(self.cluster.as_ref(), namespace, pod, tail).await);
            out.push('\n');
        }
        Ok(out)
    }

    /// Status summary of a workload's pods. Query failures become an
    /// `ERROR` report rather than an error.
    pub async fn pod_status(&self, namespace: &str, workload: &str) -> PodStatusReport {
        match self
            .cluster
            .list_pods(namespace, &workload_selector(workload))
            .await
        {
            Ok(pods) => PodStatusReport::from_pods(&pods),
            Err(e) => {
                warn!(%namespace, %workload, error = %e, "pod status query failed");
                PodStatusReport::from_error(e.to_string())
            }
        }
    }
}
