//! `kube`-backed cluster client.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolumeClaim, Pod, ResourceQuota, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::{ClusterClient, LogRequest};
use crate::error::{ClusterError, ClusterResult};
use crate::manifest::{Manifest, ResourceKind};

/// Cluster client talking to a real API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster service account or the local kubeconfig.
    pub async fn try_default() -> ClusterResult<Self> {
        let client = Client::try_default().await?;
        debug!("cluster client initialized");
        Ok(Self::new(client))
    }

    fn namespaced<K>(&self, kind: ResourceKind, namespace: Option<&str>) -> ClusterResult<Api<K>>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        let namespace = namespace.ok_or(ClusterError::MissingNamespace { kind })?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }
}

/// Bind `$api` to the typed API for `$kind` and `$wrap` to the matching
/// `Manifest` constructor, then evaluate `$body`.
macro_rules! dispatch {
    ($self:ident, $kind:expr, $ns:expr, $api:ident, $wrap:ident => $body:expr) => {
        match $kind {
            ResourceKind::Namespace => {
                let $api: Api<Namespace> = Api::all($self.client.clone());
                let $wrap = Manifest::Namespace;
                $body
            }
            ResourceKind::Secret => {
                let $api: Api<Secret> = $self.namespaced(ResourceKind::Secret, $ns)?;
                let $wrap = Manifest::Secret;
                $body
            }
            ResourceKind::Workload => {
                let $api: Api<Deployment> = $self.namespaced(ResourceKind::Workload, $ns)?;
                let $wrap = Manifest::Workload;
                $body
            }
            ResourceKind::Exposure => {
                let $api: Api<Service> = $self.namespaced(ResourceKind::Exposure, $ns)?;
                let $wrap = Manifest::Exposure;
                $body
            }
            ResourceKind::Ingress => {
                let $api: Api<Ingress> = $self.namespaced(ResourceKind::Ingress, $ns)?;
                let $wrap = Manifest::Ingress;
                $body
            }
            ResourceKind::VolumeClaim => {
                let $api: Api<PersistentVolumeClaim> =
                    $self.namespaced(ResourceKind::VolumeClaim, $ns)?;
                let $wrap = Manifest::VolumeClaim;
                $body
            }
            ResourceKind::Autoscaler => {
                let $api: Api<HorizontalPodAutoscaler> =
                    $self.namespaced(ResourceKind::Autoscaler, $ns)?;
                let $wrap = Manifest::Autoscaler;
                $body
            }
            ResourceKind::ResourceQuota => {
                let $api: Api<ResourceQuota> = $self.namespaced(ResourceKind::ResourceQuota, $ns)?;
                let $wrap = Manifest::ResourceQuota;
                $body
            }
        }
    };
}

/// Full replace carrying over the server's `resourceVersion`.
///
/// `carry` copies any other server-assigned fields the API refuses to see
/// changed or dropped.
async fn replace_object<K>(
    api: Api<K>,
    obj: &K,
    carry: impl FnOnce(&K, &mut K),
) -> ClusterResult<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = obj.name_any();
    let current = api.get(&name).await?;
    let mut next = obj.clone();
    next.meta_mut().resource_version = current.meta().resource_version.clone();
    carry(&current, &mut next);
    Ok(api.replace(&name, &PostParams::default(), &next).await?)
}

fn carry_nothing<K>(_current: &K, _next: &mut K) {}

/// A Service's cluster IP is immutable once allocated.
fn carry_cluster_ip(current: &Service, next: &mut Service) {
    if let (Some(current), Some(next)) = (current.spec.as_ref(), next.spec.as_mut()) {
        next.cluster_ip = current.cluster_ip.clone();
        next.cluster_ips = current.cluster_ips.clone();
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<Manifest> {
        dispatch!(self, kind, namespace, api, wrap => Ok(wrap(api.get(name).await?)))
    }

    async fn create(&self, manifest: &Manifest) -> ClusterResult<Manifest> {
        let pp = PostParams::default();
        let ns = manifest.namespace();
        let created = match manifest {
            Manifest::Namespace(obj) => {
                let api: Api<Namespace> = Api::all(self.client.clone());
                Manifest::Namespace(api.create(&pp, obj).await?)
            }
            Manifest::Secret(obj) => Manifest::Secret(
                self.namespaced::<Secret>(ResourceKind::Secret, ns)?
                    .create(&pp, obj)
                    .await?,
            ),
            Manifest::Workload(obj) => Manifest::Workload(
                self.namespaced::<Deployment>(ResourceKind::Workload, ns)?
                    .create(&pp, obj)
                    .await?,
            ),
            Manifest::Exposure(obj) => Manifest::Exposure(
                self.namespaced::<Service>(ResourceKind::Exposure, ns)?
                    .create(&pp, obj)
                    .await?,
            ),
            Manifest::Ingress(obj) => Manifest::Ingress(
                self.namespaced::<Ingress>(ResourceKind::Ingress, ns)?
                    .create(&pp, obj)
                    .await?,
            ),
            Manifest::VolumeClaim(obj) => Manifest::VolumeClaim(
                self.namespaced::<PersistentVolumeClaim>(ResourceKind::VolumeClaim, ns)?
                    .create(&pp, obj)
                    .await?,
            ),
            Manifest::Autoscaler(obj) => Manifest::Autoscaler(
                self.namespaced::<HorizontalPodAutoscaler>(ResourceKind::Autoscaler, ns)?
                    .create(&pp, obj)
                    .await?,
            ),
            Manifest::ResourceQuota(obj) => Manifest::ResourceQuota(
                self.namespaced::<ResourceQuota>(ResourceKind::ResourceQuota, ns)?
                    .create(&pp, obj)
                    .await?,
            ),
        };
        Ok(created)
    }

    async fn replace(&self, manifest: &Manifest) -> ClusterResult<Manifest> {
        let ns = manifest.namespace();
        let replaced = match manifest {
            Manifest::Namespace(obj) => {
                let api: Api<Namespace> = Api::all(self.client.clone());
                Manifest::Namespace(replace_object(api, obj, carry_nothing).await?)
            }
            Manifest::Secret(obj) => {
                let api = self.namespaced::<Secret>(ResourceKind::Secret, ns)?;
                Manifest::Secret(replace_object(api, obj, carry_nothing).await?)
            }
            Manifest::Workload(obj) => {
                let api = self.namespaced::<Deployment>(ResourceKind::Workload, ns)?;
                Manifest::Workload(replace_object(api, obj, carry_nothing).await?)
            }
            Manifest::Exposure(obj) => {
                let api = self.namespaced::<Service>(ResourceKind::Exposure, ns)?;
                Manifest::Exposure(replace_object(api, obj, carry_cluster_ip).await?)
            }
            Manifest::Ingress(obj) => {
                let api = self.namespaced::<Ingress>(ResourceKind::Ingress, ns)?;
                Manifest::Ingress(replace_object(api, obj, carry_nothing).await?)
            }
            Manifest::VolumeClaim(obj) => {
                let api = self.namespaced::<PersistentVolumeClaim>(ResourceKind::VolumeClaim, ns)?;
                Manifest::VolumeClaim(replace_object(api, obj, carry_nothing).await?)
            }
            Manifest::Autoscaler(obj) => {
                let api = self.namespaced::<HorizontalPodAutoscaler>(ResourceKind::Autoscaler, ns)?;
                Manifest::Autoscaler(replace_object(api, obj, carry_nothing).await?)
            }
            Manifest::ResourceQuota(obj) => {
                let api = self.namespaced::<ResourceQuota>(ResourceKind::ResourceQuota, ns)?;
                Manifest::ResourceQuota(replace_object(api, obj, carry_nothing).await?)
            }
        };
        Ok(replaced)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<()> {
        // Workload pods should go with the workload.
        let dp = match kind {
            ResourceKind::Workload => DeleteParams::background(),
            _ => DeleteParams::default(),
        };
        dispatch!(self, kind, namespace, api, _wrap => {
            api.delete(name, &dp).await?;
            Ok(())
        })
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &str,
    ) -> ClusterResult<Vec<Manifest>> {
        let lp = ListParams::default().labels(selector);
        dispatch!(self, kind, namespace, api, wrap => {
            Ok(api.list(&lp).await?.items.into_iter().map(wrap).collect())
        })
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> ClusterResult<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(selector);
        Ok(api.list(&lp).await?.items)
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        request: &LogRequest,
    ) -> ClusterResult<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: request.container.clone(),
            tail_lines: request.tail,
            previous: request.previous,
            ..LogParams::default()
        };
        Ok(api.logs(pod, &params).await?)
    }
}
