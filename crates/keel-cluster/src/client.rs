//! The cluster client trait and the idempotent write helpers built on it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};
use crate::manifest::{Manifest, ResourceKind};

/// Parameters for fetching one pod's logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRequest {
    /// Container to read; the pod's only container when `None`.
    pub container: Option<String>,
    /// Number of trailing lines.
    pub tail: Option<i64>,
    /// Read the previous (crashed) container instance instead of the current one.
    pub previous: bool,
}

/// Handle to the orchestration API.
///
/// Object-safe so managers can hold an `Arc<dyn ClusterClient>` and tests can
/// swap in [`MemoryCluster`](crate::MemoryCluster).
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch one object. `namespace` is ignored for cluster-scoped kinds.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<Manifest>;

    /// Create an object; `AlreadyExists` if it is present.
    async fn create(&self, manifest: &Manifest) -> ClusterResult<Manifest>;

    /// Fully replace an existing object; `NotFound` if it is absent.
    async fn replace(&self, manifest: &Manifest) -> ClusterResult<Manifest>;

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<()>;

    /// List objects matching an equality label selector (`k=v,k2=v2`).
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &str,
    ) -> ClusterResult<Vec<Manifest>>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> ClusterResult<Vec<Pod>>;

    async fn pod_logs(&self, namespace: &str, pod: &str, request: &LogRequest)
    -> ClusterResult<String>;
}

/// Replace-else-create.
///
/// A replace that fails with `NotFound` falls through to create. Any other
/// error propagates unchanged.
pub async fn apply(client: &dyn ClusterClient, manifest: &Manifest) -> ClusterResult<Manifest> {
    match client.replace(manifest).await {
        Ok(applied) => {
            debug!(object = %manifest.describe(), "replaced");
            Ok(applied)
        }
        Err(ClusterError::NotFound(_)) => {
            let created = client.create(manifest).await?;
            debug!(object = %manifest.describe(), "created");
            Ok(created)
        }
        Err(e) => Err(e),
    }
}

/// Check-then-create for immutable objects.
///
/// Returns `true` if the object was created, `false` if it already existed.
pub async fn create_if_absent(client: &dyn ClusterClient, manifest: &Manifest) -> ClusterResult<bool> {
    match client
        .get(manifest.kind(), manifest.namespace(), manifest.name())
        .await
    {
        Ok(_) => return Ok(false),
        Err(ClusterError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }
    match client.create(manifest).await {
        Ok(_) => Ok(true),
        // Lost a race with another writer; the object exists either way.
        Err(ClusterError::AlreadyExists(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete, treating `NotFound` as success. Returns whether anything was deleted.
pub async fn delete_if_exists(
    client: &dyn ClusterClient,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
) -> ClusterResult<bool> {
    match client.delete(kind, namespace, name).await {
        Ok(()) => Ok(true),
        Err(ClusterError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Get, mapping `NotFound` to `None`.
pub async fn get_if_exists(
    client: &dyn ClusterClient,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
) -> ClusterResult<Option<Manifest>> {
    match client.get(kind, namespace, name).await {
        Ok(manifest) => Ok(Some(manifest)),
        Err(ClusterError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
