//! Autoscaler Manager.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_cluster::k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use keel_cluster::{
    ClusterClient, ClusterError, Manifest, ResourceKind, apply, delete_if_exists, get_if_exists,
};
use keel_core::names::{LABEL_MANAGED_BY, LABEL_SERVICE, MANAGED_BY, label_value};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

use crate::behavior::ScalingBehavior;

#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("invalid replica bounds: min {min}, max {max}")]
    InvalidBounds { min: u32, max: u32 },

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Desired autoscaler for one workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoscalerSpec {
    /// Autoscaler name; keel uses the service resource-name.
    pub name: String,
    pub service_id: String,
    pub target_workload: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_cpu_percent: u32,
    pub target_memory_percent: Option<u32>,
}

/// Current vs. desired replicas and utilization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerStatus {
    pub name: String,
    pub target_workload: String,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub current_replicas: i32,
    pub desired_replicas: i32,
    pub current_cpu_percent: Option<i32>,
    pub current_memory_percent: Option<i32>,
    pub last_scale_time: Option<String>,
}

impl From<&HorizontalPodAutoscaler> for AutoscalerStatus {
    fn from(hpa: &HorizontalPodAutoscaler) -> Self {
        let spec = hpa.spec.as_ref();
        let status = hpa.status.as_ref();
        let utilization = |resource: &str| {
            status
                .and_then(|s| s.current_metrics.as_ref())
                .and_then(|metrics| {
                    metrics
                        .iter()
                        .filter_map(|m| m.resource.as_ref())
                        .find(|r| r.name == resource)
                })
                .and_then(|r| r.current.average_utilization)
        };
        Self {
            name: hpa.metadata.name.clone().unwrap_or_default(),
            target_workload: spec
                .map(|s| s.scale_target_ref.name.clone())
                .unwrap_or_default(),
            min_replicas: spec.and_then(|s| s.min_replicas).unwrap_or(1),
            max_replicas: spec.map(|s| s.max_replicas).unwrap_or_default(),
            current_replicas: status.and_then(|s| s.current_replicas).unwrap_or(0),
            desired_replicas: status.map(|s| s.desired_replicas).unwrap_or(0),
            current_cpu_percent: utilization("cpu"),
            current_memory_percent: utilization("memory"),
            last_scale_time: status
                .and_then(|s| s.last_scale_time.as_ref())
                .map(|t| t.0.to_string()),
        }
    }
}

fn utilization_metric(resource: &str, percent: u32) -> Value {
    json!({
        "type": "Resource",
        "resource": {
            "name": resource,
            "target": { "type": "Utilization", "averageUtilization": percent },
        }
    })
}

#[derive(Clone)]
pub struct AutoscalerManager {
    cluster: Arc<dyn ClusterClient>,
    behavior: ScalingBehavior,
}

impl AutoscalerManager {
    pub fn new(cluster: Arc<dyn ClusterClient>, behavior: ScalingBehavior) -> Self {
        Self { cluster, behavior }
    }

    fn build(&self, namespace: &str, spec: &AutoscalerSpec) -> Result<HorizontalPodAutoscaler, AutoscaleError> {
        if spec.min_replicas == 0 || spec.min_replicas > spec.max_replicas {
            return Err(AutoscaleError::InvalidBounds {
                min: spec.min_replicas,
                max: spec.max_replicas,
            });
        }
        let mut metrics = vec![utilization_metric("cpu", spec.target_cpu_percent)];
        if let Some(memory) = spec.target_memory_percent {
            metrics.push(utilization_metric("memory", memory));
        }
        let labels = BTreeMap::from([
            (LABEL_MANAGED_BY, MANAGED_BY.to_string()),
            (LABEL_SERVICE, label_value(&spec.service_id)),
        ]);
        Ok(serde_json::from_value(json!({
            "apiVersion": "autoscaling/v2",
            "kind": "HorizontalPodAutoscaler",
            "metadata": {
                "name": spec.name,
                "namespace": namespace,
                "labels": labels,
            },
            "spec": {
                "scaleTargetRef": {
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "name": spec.target_workload,
                },
                "minReplicas": spec.min_replicas,
                "maxReplicas": spec.max_replicas,
                "metrics": metrics,
                "behavior": self.behavior.to_spec(),
            }
        }))?)
    }

    /// Create or fully replace the autoscaler.
    pub async fn upsert(&self, namespace: &str, spec: &AutoscalerSpec) -> Result<(), AutoscaleError> {
        let object = self.build(namespace, spec)?;
        apply(self.cluster.as_ref(), &Manifest::Autoscaler(object)).await?;
        info!(
            %namespace,
            autoscaler = %spec.name,
            target = %spec.target_workload,
            min = spec.min_replicas,
            max = spec.max_replicas,
            "autoscaler applied"
        );
        Ok(())
    }

    /// Delete the autoscaler; absent is fine.
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<bool, AutoscaleError> {
        let deleted =
            delete_if_exists(self.cluster.as_ref(), ResourceKind::Autoscaler, Some(namespace), name)
                .await?;
        if deleted {
            info!(%namespace, autoscaler = %name, "autoscaler deleted");
        }
        Ok(deleted)
    }

    pub async fn status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AutoscalerStatus>, AutoscaleError> {
        let found =
            get_if_exists(self.cluster.as_ref(), ResourceKind::Autoscaler, Some(namespace), name)
                .await?;
        Ok(found
            .as_ref()
            .and_then(Manifest::as_autoscaler)
            .map(AutoscalerStatus::from))
    }

    /// Every keel-managed autoscaler in a namespace.
    pub async fn list(&self, namespace: &str) -> Result<Vec<AutoscalerStatus>, AutoscaleError> {
        let selector = format!("{LABEL_MANAGED_BY}={MANAGED_BY}");
        let found = match self
            .cluster
            .list(ResourceKind::Autoscaler, Some(namespace), &selector)
            .await
        {
            Ok(found) => found,
            Err(ClusterError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(found
            .iter()
            .filter_map(Manifest::as_autoscaler)
            .map(AutoscalerStatus::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use keel_cluster::MemoryCluster;
    use keel_cluster::k8s_openapi::api::core::v1::Namespace;
    use keel_cluster::k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    async fn setup() -> (MemoryCluster, AutoscalerManager) {
        let cluster = MemoryCluster::new();
        cluster
            .create(&Manifest::Namespace(Namespace {
                metadata: ObjectMeta {
                    name: Some("t".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }))
            .await
            .unwrap();
        let manager = AutoscalerManager::new(Arc::new(cluster.clone()), ScalingBehavior::default());
        (cluster, manager)
    }

    fn spec(target: &str) -> AutoscalerSpec {
        AutoscalerSpec {
            name: "svc-abc".to_string(),
            service_id: "s1".to_string(),
            target_workload: target.to_string(),
            min_replicas: 2,
            max_replicas: 6,
            target_cpu_percent: 70,
            target_memory_percent: Some(80),
        }
    }

    #[tokio::test]
    async fn upsert_twice_retargets() {
        let (cluster, manager) = setup().await;
        manager.upsert("t", &spec("svc-abc-d1")).await.unwrap();
        manager.upsert("t", &spec("svc-abc-d2")).await.unwrap();

        assert_eq!(cluster.names(ResourceKind::Autoscaler, Some("t")).await, vec!["svc-abc"]);
        let status = manager.status("t", "svc-abc").await.unwrap().unwrap();
        assert_eq!(status.target_workload, "svc-abc-d2");
        assert_eq!(status.min_replicas, 2);
        assert_eq!(status.max_replicas, 6);
        assert_eq!(status.desired_replicas, 2);
    }

    #[tokio::test]
    async fn memory_target_is_optional() {
        let (cluster, manager) = setup().await;
        let mut cpu_only = spec("w");
        cpu_only.target_memory_percent = None;
        manager.upsert("t", &cpu_only).await.unwrap();
        let stored = cluster
            .get(ResourceKind::Autoscaler, Some("t"), "svc-abc")
            .await
            .unwrap();
        let metrics = stored
            .as_autoscaler()
            .unwrap()
            .spec
            .as_ref()
            .unwrap()
            .metrics
            .clone()
            .unwrap();
        assert_eq!(metrics.len(), 1);
    }

    #[tokio::test]
    async fn missing_autoscaler_is_none_not_error() {
        let (_cluster, manager) = setup().await;
        assert!(manager.status("t", "nope").await.unwrap().is_none());
        assert!(manager.list("t").await.unwrap().is_empty());
        assert!(!manager.delete("t", "nope").await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_managed_autoscalers() {
        let (_cluster, manager) = setup().await;
        manager.upsert("t", &spec("w")).await.unwrap();
        let all = manager.list("t").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "svc-abc");
    }

    #[tokio::test]
    async fn inverted_bounds_are_rejected() {
        let (_cluster, manager) = setup().await;
        let mut bad = spec("w");
        bad.min_replicas = 8;
        assert!(matches!(
            manager.upsert("t", &bad).await,
            Err(AutoscaleError::InvalidBounds { min: 8, max: 6 })
        ));
    }
}
