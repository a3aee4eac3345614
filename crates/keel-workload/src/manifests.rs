//! Manifest builders for workloads, exposures, ingresses and volume claims.
//!
//! Pure functions from specs to typed objects; nothing here talks to the
//! cluster.

use std::collections::BTreeMap;

use keel_cluster::k8s_openapi::api::apps::v1::Deployment;
use keel_cluster::k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use keel_cluster::k8s_openapi::api::networking::v1::Ingress;
use keel_core::PlatformConfig;
use keel_core::names::{
    LABEL_DEPLOYMENT, LABEL_MANAGED_BY, LABEL_SERVICE, LABEL_TENANT, LABEL_WORKLOAD, MANAGED_BY,
    ingress_tls_secret_name, label_value,
};
use keel_state::ResourceSizing;
use serde_json::{Value, json};

/// Annotation asking the certificate controller to issue a certificate.
pub const CLUSTER_ISSUER_ANNOTATION: &str = "cert-manager.io/cluster-issuer";

/// Name of the single application container.
pub const CONTAINER_NAME: &str = "app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMountSpec {
    pub claim_name: String,
    pub mount_path: String,
}

/// One rollout attempt's compute object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub namespace: String,
    pub name: String,
    pub tenant_id: String,
    pub service_id: String,
    pub deployment_id: String,
    /// Full image reference including tag.
    pub image: String,
    pub port: u16,
    pub replicas: i32,
    pub resources: ResourceSizing,
    pub health_check_path: Option<String>,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    /// Secret injected wholesale as environment.
    pub env_secret: Option<String>,
    pub mounts: Vec<VolumeMountSpec>,
}

/// The stable, service-named routing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureSpec {
    pub namespace: String,
    pub name: String,
    pub tenant_id: String,
    pub service_id: String,
    /// Deployment whose pods receive traffic.
    pub deployment_id: String,
    pub port: u16,
}

/// Public routes for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressSpec {
    pub namespace: String,
    /// Service resource-name; the ingress and its exposure share it.
    pub name: String,
    pub tenant_id: String,
    pub service_id: String,
    pub port: u16,
    /// `<subdomain>.<suffix>`, covered by the platform wildcard certificate.
    pub platform_host: Option<String>,
    /// Verified custom domains, each needing an issued certificate.
    pub custom_domains: Vec<String>,
}

impl IngressSpec {
    pub fn hosts(&self) -> Vec<&str> {
        self.platform_host
            .iter()
            .map(String::as_str)
            .chain(self.custom_domains.iter().map(String::as_str))
            .collect()
    }
}

fn service_labels(tenant_id: &str, service_id: &str) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY, MANAGED_BY.to_string()),
        (LABEL_TENANT, label_value(tenant_id)),
        (LABEL_SERVICE, label_value(service_id)),
    ])
}

/// Label selector string matching every pod of a deployment.
pub fn deployment_selector(deployment_id: &str) -> String {
    format!("{LABEL_DEPLOYMENT}={}", label_value(deployment_id))
}

/// Label selector string matching every pod of a workload.
pub fn workload_selector(workload: &str) -> String {
    format!("{LABEL_WORKLOAD}={workload}")
}

pub fn workload(spec: &WorkloadSpec) -> serde_json::Result<Deployment> {
    let mut labels = service_labels(&spec.tenant_id, &spec.service_id);
    labels.insert(LABEL_DEPLOYMENT, label_value(&spec.deployment_id));
    labels.insert(LABEL_WORKLOAD, spec.name.clone());

    let mut container = json!({
        "name": CONTAINER_NAME,
        "image": spec.image,
        "ports": [{ "name": "http", "containerPort": spec.port, "protocol": "TCP" }],
        "resources": {
            "requests": { "cpu": spec.resources.cpu_request, "memory": spec.resources.memory_request },
            "limits": { "cpu": spec.resources.cpu_limit, "memory": spec.resources.memory_limit },
        },
    });
    if let Some(secret) = &spec.env_secret {
        container["envFrom"] = json!([{ "secretRef": { "name": secret } }]);
    }
    if let Some(path) = &spec.health_check_path {
        container["readinessProbe"] = json!({
            "httpGet": { "path": path, "port": spec.port },
            "initialDelaySeconds": 5,
            "periodSeconds": 5,
            "failureThreshold": 3,
        });
    }
    if let Some(command) = &spec.command {
        container["command"] = json!(command);
    }
    if let Some(args) = &spec.args {
        container["args"] = json!(args);
    }

    let mut pod_spec = json!({ "containers": [] });
    if !spec.mounts.is_empty() {
        let volume_name = |i: usize| format!("data-{i}");
        container["volumeMounts"] = Value::Array(
            spec.mounts
                .iter()
                .enumerate()
                .map(|(i, m)| json!({ "name": volume_name(i), "mountPath": m.mount_path }))
                .collect(),
        );
        pod_spec["volumes"] = Value::Array(
            spec.mounts
                .iter()
                .enumerate()
                .map(|(i, m)| {
                    json!({
                        "name": volume_name(i),
                        "persistentVolumeClaim": { "claimName": m.claim_name },
                    })
                })
                .collect(),
        );
    }
    pod_spec["containers"] = json!([container]);

    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": labels,
        },
        "spec": {
            "replicas": spec.replicas,
            "revisionHistoryLimit": 1,
            "selector": {
                "matchLabels": {
                    LABEL_DEPLOYMENT: label_value(&spec.deployment_id),
                    LABEL_WORKLOAD: spec.name,
                }
            },
            "template": {
                "metadata": { "labels": labels },
                "spec": pod_spec,
            }
        }
    }))
}

pub fn exposure(spec: &ExposureSpec) -> serde_json::Result<Service> {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": service_labels(&spec.tenant_id, &spec.service_id),
        },
        "spec": {
            "type": "ClusterIP",
            "selector": { LABEL_DEPLOYMENT: label_value(&spec.deployment_id) },
            "ports": [{
                "name": "http",
                "port": spec.port,
                "targetPort": spec.port,
                "protocol": "TCP",
            }],
        }
    }))
}

/// Build the ingress, or `None` when there is no host to route.
pub fn ingress(spec: &IngressSpec, platform: &PlatformConfig) -> serde_json::Result<Option<Ingress>> {
    let hosts = spec.hosts();
    if hosts.is_empty() {
        return Ok(None);
    }

    let rules: Vec<Value> = hosts
        .iter()
        .map(|host| {
            json!({
                "host": host,
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {
                            "service": { "name": spec.name, "port": { "number": spec.port } }
                        }
                    }]
                }
            })
        })
        .collect();

    let mut tls = Vec::new();
    if let Some(host) = &spec.platform_host {
        tls.push(json!({ "hosts": [host], "secretName": platform.wildcard_tls_secret }));
    }
    let mut annotations = BTreeMap::new();
    if !spec.custom_domains.is_empty() {
        tls.push(json!({
            "hosts": spec.custom_domains,
            "secretName": ingress_tls_secret_name(&spec.name),
        }));
        annotations.insert(CLUSTER_ISSUER_ANNOTATION, platform.cluster_issuer.clone());
    }

    serde_json::from_value(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": service_labels(&spec.tenant_id, &spec.service_id),
            "annotations": annotations,
        },
        "spec": {
            "ingressClassName": platform.ingress_class,
            "tls": tls,
            "rules": rules,
        }
    }))
    .map(Some)
}

pub fn volume_claim(
    namespace: &str,
    claim_name: &str,
    size: &str,
    tenant_id: &str,
    service_id: &str,
) -> serde_json::Result<PersistentVolumeClaim> {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {
            "name": claim_name,
            "namespace": namespace,
            "labels": service_labels(tenant_id, service_id),
        },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "resources": { "requests": { "storage": size } },
        }
    }))
}
