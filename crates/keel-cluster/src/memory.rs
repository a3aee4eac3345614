//! In-memory cluster for tests and local dry runs.
//!
//! Stores objects in a map and simulates just enough controller behavior to
//! exercise rollout judgment: creating or replacing a workload spawns pods
//! whose state follows the configured [`RolloutMode`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscalerStatus;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
    ContainerStatus, Pod, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::RwLock;

use crate::client::{ClusterClient, LogRequest};
use crate::error::{ClusterError, ClusterResult};
use crate::manifest::{Manifest, ResourceKind, selector_matches};

/// How simulated pods behave after a workload is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutMode {
    /// Every replica becomes ready immediately.
    Healthy,
    /// Pods are scheduled but never become ready and show no failure.
    Stuck,
    /// Containers sit in a waiting state with this reason
    /// (`CrashLoopBackOff`, `ImagePullBackOff`, ...).
    Waiting(String),
    /// Containers exit with this code.
    Terminated(i32),
}

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `create` and `replace` of this kind.
    Write(ResourceKind),
    Delete(ResourceKind),
    ListPods,
    PodLogs,
}

type ObjectKey = (ResourceKind, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Manifest>,
    /// Pods by (namespace, name).
    pods: BTreeMap<(String, String), Pod>,
    /// Current and previous container logs by (namespace, pod).
    logs: HashMap<(String, String), (Option<String>, Option<String>)>,
    default_mode: Option<RolloutMode>,
    modes: HashMap<String, RolloutMode>,
    faults: HashSet<Fault>,
    next_version: u64,
    /// Every successful mutation, for assertions on call order.
    journal: Vec<String>,
}

/// A cluster that lives in process memory.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<RwLock<Inner>>,
}

fn key(kind: ResourceKind, namespace: Option<&str>, name: &str) -> ObjectKey {
    let ns = if kind.is_namespaced() {
        namespace.unwrap_or_default().to_string()
    } else {
        String::new()
    };
    (kind, ns, name.to_string())
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rollout behavior for every workload without an override.
    pub async fn set_rollout_mode(&self, mode: RolloutMode) {
        self.inner.write().await.default_mode = Some(mode);
    }

    /// Rollout behavior for one workload name.
    pub async fn set_workload_rollout(&self, workload: &str, mode: RolloutMode) {
        self.inner
            .write()
            .await
            .modes
            .insert(workload.to_string(), mode);
    }

    pub async fn inject_fault(&self, fault: Fault) {
        self.inner.write().await.faults.insert(fault);
    }

    pub async fn clear_fault(&self, fault: &Fault) {
        self.inner.write().await.faults.remove(fault);
    }

    /// Whether an object exists.
    pub async fn contains(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> bool {
        self.inner
            .read()
            .await
            .objects
            .contains_key(&key(kind, namespace, name))
    }

    /// Names of every object of `kind` in `namespace`.
    pub async fn names(&self, kind: ResourceKind, namespace: Option<&str>) -> Vec<String> {
        let probe = key(kind, namespace, "");
        self.inner
            .read()
            .await
            .objects
            .keys()
            .filter(|(k, ns, _)| *k == probe.0 && *ns == probe.1)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Mutations performed so far, as `verb kind ns/name`.
    pub async fn journal(&self) -> Vec<String> {
        self.inner.read().await.journal.clone()
    }

    /// Pods currently present in a namespace.
    pub async fn pods(&self, namespace: &str) -> Vec<Pod> {
        self.inner
            .read()
            .await
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod.clone())
            .collect()
    }

    /// Override a pod's current container logs.
    pub async fn set_pod_logs(&self, namespace: &str, pod: &str, logs: &str) {
        let mut inner = self.inner.write().await;
        let entry = inner
            .logs
            .entry((namespace.to_string(), pod.to_string()))
            .or_default();
        entry.0 = Some(logs.to_string());
    }

    fn check(inner: &Inner, fault: &Fault) -> ClusterResult<()> {
        if inner.faults.contains(fault) {
            return Err(ClusterError::Api {
                code: 500,
                message: format!("injected fault: {fault:?}"),
            });
        }
        Ok(())
    }
}

impl Inner {
    fn stamp(&mut self, manifest: &mut Manifest) {
        self.next_version += 1;
        manifest.metadata_mut().resource_version = Some(self.next_version.to_string());
    }

    fn record(&mut self, verb: &str, manifest: &Manifest) {
        self.journal.push(format!("{verb} {}", manifest.describe()));
    }

    fn require_namespace(&self, manifest: &Manifest) -> ClusterResult<()> {
        if !manifest.kind().is_namespaced() {
            return Ok(());
        }
        let ns = manifest
            .namespace()
            .ok_or(ClusterError::MissingNamespace {
                kind: manifest.kind(),
            })?;
        let ns_key = key(ResourceKind::Namespace, None, ns);
        if !self.objects.contains_key(&ns_key) {
            return Err(ClusterError::NotFound(format!("namespace {ns}")));
        }
        Ok(())
    }

    /// Apply controller side effects after a write.
    fn react(&mut self, manifest: &mut Manifest) {
        match manifest {
            Manifest::Workload(workload) => self.roll_out(workload),
            Manifest::Autoscaler(hpa) => {
                let min = hpa.spec.as_ref().and_then(|s| s.min_replicas).unwrap_or(1);
                hpa.status = Some(HorizontalPodAutoscalerStatus {
                    current_replicas: Some(min),
                    desired_replicas: min,
                    ..Default::default()
                });
            }
            _ => {}
        }
    }

    /// Replace the workload's pods and status per its rollout mode.
    fn roll_out(&mut self, workload: &mut Deployment) {
        let name = workload.metadata.name.clone().unwrap_or_default();
        let ns = workload.metadata.namespace.clone().unwrap_or_default();
        self.remove_pods_of(&ns, &name);

        let mode = self
            .modes
            .get(&name)
            .or(self.default_mode.as_ref())
            .cloned()
            .unwrap_or(RolloutMode::Healthy);

        let spec = workload.spec.clone().unwrap_or_default();
        let replicas = spec.replicas.unwrap_or(1);
        let labels = spec.template.metadata.and_then(|m| m.labels);
        let container = spec
            .template
            .spec
            .and_then(|s| s.containers.first().map(|c| c.name.clone()))
            .unwrap_or_else(|| "app".to_string());

        for i in 0..replicas {
            let pod_name = format!("{name}-{i}");
            let (phase, ready, restarts, state, last_state) = match &mode {
                RolloutMode::Healthy => (
                    "Running",
                    true,
                    0,
                    ContainerState {
                        running: Some(ContainerStateRunning::default()),
                        ..Default::default()
                    },
                    None,
                ),
                RolloutMode::Stuck => ("Pending", false, 0, ContainerState::default(), None),
                RolloutMode::Waiting(reason) => {
                    let crashed = reason == "CrashLoopBackOff";
                    (
                        if crashed { "Running" } else { "Pending" },
                        false,
                        if crashed { 4 } else { 0 },
                        ContainerState {
                            waiting: Some(ContainerStateWaiting {
                                reason: Some(reason.clone()),
                                message: None,
                            }),
                            ..Default::default()
                        },
                        crashed.then(|| ContainerState {
                            terminated: Some(ContainerStateTerminated {
                                exit_code: 1,
                                reason: Some("Error".to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                    )
                }
                RolloutMode::Terminated(code) => (
                    "Failed",
                    false,
                    0,
                    ContainerState {
                        terminated: Some(ContainerStateTerminated {
                            exit_code: *code,
                            reason: Some("Error".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    None,
                ),
            };

            let pod = Pod {
                metadata: ObjectMeta {
                    name: Some(pod_name.clone()),
                    namespace: Some(ns.clone()),
                    labels: labels.clone(),
                    ..Default::default()
                },
                spec: None,
                status: Some(PodStatus {
                    phase: Some(phase.to_string()),
                    container_statuses: Some(vec![ContainerStatus {
                        name: container.clone(),
                        image: String::new(),
                        image_id: String::new(),
                        ready,
                        restart_count: restarts,
                        state: Some(state),
                        last_state,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            };

            let logs = match &mode {
                RolloutMode::Healthy => (Some(format!("{pod_name} listening\n")), None),
                RolloutMode::Stuck => (Some(String::new()), None),
                RolloutMode::Waiting(reason) if reason == "CrashLoopBackOff" => {
                    (None, Some("panic: missing DATABASE_URL\n".to_string()))
                }
                RolloutMode::Waiting(_) => (None, None),
                RolloutMode::Terminated(code) => {
                    (Some(format!("fatal: exited with {code}\n")), None)
                }
            };

            self.pods.insert((ns.clone(), pod_name.clone()), pod);
            self.logs.insert((ns.clone(), pod_name), logs);
        }

        let ready = if mode == RolloutMode::Healthy { replicas } else { 0 };
        workload.status = Some(DeploymentStatus {
            replicas: Some(replicas),
            ready_replicas: Some(ready),
            updated_replicas: Some(replicas),
            available_replicas: Some(ready),
            ..Default::default()
        });
    }

    fn remove_pods_of(&mut self, namespace: &str, workload: &str) {
        let prefix = format!("{workload}-");
        let doomed: Vec<_> = self
            .pods
            .keys()
            .filter(|(ns, name)| ns == namespace && name.starts_with(&prefix))
            .cloned()
            .collect();
        for pod in doomed {
            self.logs.remove(&pod);
            self.pods.remove(&pod);
        }
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<Manifest> {
        let inner = self.inner.read().await;
        inner
            .objects
            .get(&key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("{kind} {name}")))
    }

    async fn create(&self, manifest: &Manifest) -> ClusterResult<Manifest> {
        let mut inner = self.inner.write().await;
        Self::check(&inner, &Fault::Write(manifest.kind()))?;
        inner.require_namespace(manifest)?;
        let k = key(manifest.kind(), manifest.namespace(), manifest.name());
        if inner.objects.contains_key(&k) {
            return Err(ClusterError::AlreadyExists(manifest.describe()));
        }
        let mut stored = manifest.clone();
        inner.stamp(&mut stored);
        inner.react(&mut stored);
        inner.record("create", &stored);
        inner.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, manifest: &Manifest) -> ClusterResult<Manifest> {
        let mut inner = self.inner.write().await;
        Self::check(&inner, &Fault::Write(manifest.kind()))?;
        let k = key(manifest.kind(), manifest.namespace(), manifest.name());
        if !inner.objects.contains_key(&k) {
            return Err(ClusterError::NotFound(manifest.describe()));
        }
        let mut stored = manifest.clone();
        inner.stamp(&mut stored);
        inner.react(&mut stored);
        inner.record("replace", &stored);
        inner.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<()> {
        let mut inner = self.inner.write().await;
        Self::check(&inner, &Fault::Delete(kind))?;
        let k = key(kind, namespace, name);
        let removed = inner
            .objects
            .remove(&k)
            .ok_or_else(|| ClusterError::NotFound(format!("{kind} {name}")))?;
        match kind {
            ResourceKind::Workload => inner.remove_pods_of(&k.1, name),
            ResourceKind::Namespace => {
                inner.objects.retain(|(_, ns, _), _| ns != name);
                inner.pods.retain(|(ns, _), _| ns != name);
            }
            _ => {}
        }
        inner.record("delete", &removed);
        Ok(())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &str,
    ) -> ClusterResult<Vec<Manifest>> {
        let inner = self.inner.read().await;
        let probe = key(kind, namespace, "");
        Ok(inner
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == probe.0 && (!kind.is_namespaced() || *ns == probe.1))
            .filter(|(_, m)| selector_matches(selector, m.metadata().labels.as_ref()))
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> ClusterResult<Vec<Pod>> {
        let inner = self.inner.read().await;
        Self::check(&inner, &Fault::ListPods)?;
        Ok(inner
            .pods
            .iter()
            .filter(|((ns, _), pod)| {
                ns == namespace && selector_matches(selector, pod.metadata.labels.as_ref())
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        request: &LogRequest,
    ) -> ClusterResult<String> {
        let inner = self.inner.read().await;
        Self::check(&inner, &Fault::PodLogs)?;
        let (current, previous) = inner
            .logs
            .get(&(namespace.to_string(), pod.to_string()))
            .ok_or_else(|| ClusterError::NotFound(format!("pod {pod}")))?;
        let logs = if request.previous { previous } else { current };
        let logs = logs.clone().ok_or_else(|| ClusterError::Api {
            code: 400,
            message: if request.previous {
                format!("previous terminated container in pod {pod} not found")
            } else {
                format!("container in pod {pod} is waiting to start")
            },
        })?;
        Ok(match request.tail {
            Some(n) => tail_lines(&logs, n.max(0) as usize),
            None => logs,
        })
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    let mut out = lines[start..].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}
