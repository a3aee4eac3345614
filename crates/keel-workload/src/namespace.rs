//! Namespace Manager: one isolation boundary per tenant.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_cluster::k8s_openapi::api::core::v1::{Namespace, ResourceQuota};
use keel_cluster::{
    ClusterClient, ClusterError, Manifest, ResourceKind, apply, delete_if_exists,
};
use keel_core::NamespaceConfig;
use keel_core::names::{LABEL_MANAGED_BY, LABEL_TENANT, MANAGED_BY, label_value, tenant_namespace};
use serde_json::json;
use tracing::{debug, info};

use crate::error::WorkloadResult;

/// Name of the quota object attached to tenant namespaces.
pub const QUOTA_NAME: &str = "keel-quota";

/// Hard limits for a tenant namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSpec {
    pub cpu: String,
    pub memory: String,
}

impl QuotaSpec {
    /// The configured quota, or `None` when quotas are switched off.
    pub fn from_config(config: &NamespaceConfig) -> Option<Self> {
        if !config.resource_quota {
            return None;
        }
        Some(Self {
            cpu: config.quota_cpu.clone().unwrap_or_else(|| "4".to_string()),
            memory: config
                .quota_memory
                .clone()
                .unwrap_or_else(|| "8Gi".to_string()),
        })
    }
}

#[derive(Clone)]
pub struct NamespaceManager {
    cluster: Arc<dyn ClusterClient>,
    quota: Option<QuotaSpec>,
}

impl NamespaceManager {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            cluster,
            quota: None,
        }
    }

    /// Attach a resource quota to namespaces created from now on.
    pub fn with_quota(mut self, quota: Option<QuotaSpec>) -> Self {
        self.quota = quota;
        self
    }

    /// Get-or-create the tenant's namespace and return its name.
    pub async fn ensure(&self, tenant_id: &str) -> WorkloadResult<String> {
        let name = tenant_namespace(tenant_id);
        match self
            .cluster
            .get(ResourceKind::Namespace, None, &name)
            .await
        {
            Ok(_) => {
                debug!(namespace = %name, "namespace exists");
                return Ok(name);
            }
            Err(ClusterError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let namespace: Namespace = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {
                "name": name,
                "labels": {
                    LABEL_MANAGED_BY: MANAGED_BY,
                    LABEL_TENANT: label_value(tenant_id),
                }
            }
        }))?;
        match self.cluster.create(&Manifest::Namespace(namespace)).await {
            Ok(_) => info!(namespace = %name, %tenant_id, "namespace created"),
            // Another job for the same tenant got there first.
            Err(ClusterError::AlreadyExists(_)) => {
                debug!(namespace = %name, "namespace created concurrently");
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(quota) = &self.quota {
            self.attach_quota(&name, quota).await?;
        }
        Ok(name)
    }

    async fn attach_quota(&self, namespace: &str, quota: &QuotaSpec) -> WorkloadResult<()> {
        let object: ResourceQuota = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ResourceQuota",
            "metadata": {
                "name": QUOTA_NAME,
                "namespace": namespace,
                "labels": BTreeMap::from([(LABEL_MANAGED_BY, MANAGED_BY)]),
            },
            "spec": {
                "hard": {
                    "limits.cpu": quota.cpu,
                    "limits.memory": quota.memory,
                }
            }
        }))?;
        apply(self.cluster.as_ref(), &Manifest::ResourceQuota(object)).await?;
        info!(%namespace, cpu = %quota.cpu, memory = %quota.memory, "resource quota attached");
        Ok(())
    }

    /// Delete the tenant's namespace and everything in it. Absent is fine.
    pub async fn teardown(&self, tenant_id: &str) -> WorkloadResult<bool> {
        let name = tenant_namespace(tenant_id);
        let deleted =
            delete_if_exists(self.cluster.as_ref(), ResourceKind::Namespace, None, &name).await?;
        info!(namespace = %name, deleted, "namespace teardown");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use keel_cluster::{Fault, MemoryCluster};

    use super::*;
    use crate::WorkloadError;

    #[tokio::test]
    async fn ensure_creates_once() {
        let cluster = MemoryCluster::new();
        let manager = NamespaceManager::new(Arc::new(cluster.clone()));

        let first = manager.ensure("ws_1").await.unwrap();
        let second = manager.ensure("ws_1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, tenant_namespace("ws_1"));

        let creates = cluster
            .journal()
            .await
            .into_iter()
            .filter(|entry| entry.starts_with("create namespace"))
            .count();
        assert_eq!(creates, 1);

        let stored = cluster
            .get(ResourceKind::Namespace, None, &first)
            .await
            .unwrap();
        let labels = stored.metadata().labels.clone().unwrap();
        assert_eq!(labels[LABEL_TENANT], "ws_1");
        assert_eq!(labels[LABEL_MANAGED_BY], MANAGED_BY);
    }

    #[tokio::test]
    async fn quota_hook_is_off_by_default() {
        let cluster = MemoryCluster::new();
        let manager = NamespaceManager::new(Arc::new(cluster.clone()))
            .with_quota(QuotaSpec::from_config(&NamespaceConfig::default()));
        let ns = manager.ensure("ws_1").await.unwrap();
        assert!(cluster.names(ResourceKind::ResourceQuota, Some(&ns)).await.is_empty());
    }

    #[tokio::test]
    async fn quota_attached_when_configured() {
        let cluster = MemoryCluster::new();
        let manager = NamespaceManager::new(Arc::new(cluster.clone())).with_quota(Some(QuotaSpec {
            cpu: "2".to_string(),
            memory: "4Gi".to_string(),
        }));
        let ns = manager.ensure("ws_1").await.unwrap();
        assert!(cluster.contains(ResourceKind::ResourceQuota, Some(&ns), QUOTA_NAME).await);
    }

    #[tokio::test]
    async fn ensure_propagates_other_errors() {
        let cluster = MemoryCluster::new();
        cluster.inject_fault(Fault::Write(ResourceKind::Namespace)).await;
        let manager = NamespaceManager::new(Arc::new(cluster));
        let err = manager.ensure("ws_1").await.unwrap_err();
        assert!(matches!(err, WorkloadError::Cluster(ClusterError::Api { .. })));
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let cluster = MemoryCluster::new();
        let manager = NamespaceManager::new(Arc::new(cluster));
        assert!(!manager.teardown("ws_1").await.unwrap());
        manager.ensure("ws_1").await.unwrap();
        assert!(manager.teardown("ws_1").await.unwrap());
        assert!(!manager.teardown("ws_1").await.unwrap());
    }
}
