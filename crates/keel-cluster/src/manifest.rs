//! Cluster object kinds and the manifest sum type.

use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolumeClaim, ResourceQuota, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// The object kinds keel reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespace,
    Secret,
    /// Per-rollout compute object.
    Workload,
    /// Stable, service-named routing object.
    Exposure,
    Ingress,
    VolumeClaim,
    Autoscaler,
    ResourceQuota,
}

impl ResourceKind {
    /// Whether objects of this kind live inside a namespace.
    pub fn is_namespaced(self) -> bool {
        !matches!(self, ResourceKind::Namespace)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Secret => "secret",
            ResourceKind::Workload => "workload",
            ResourceKind::Exposure => "exposure",
            ResourceKind::Ingress => "ingress",
            ResourceKind::VolumeClaim => "volume claim",
            ResourceKind::Autoscaler => "autoscaler",
            ResourceKind::ResourceQuota => "resource quota",
        };
        f.write_str(s)
    }
}

/// A typed cluster object.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Namespace(Namespace),
    Secret(Secret),
    Workload(Deployment),
    Exposure(Service),
    Ingress(Ingress),
    VolumeClaim(PersistentVolumeClaim),
    Autoscaler(HorizontalPodAutoscaler),
    ResourceQuota(ResourceQuota),
}

macro_rules! with_object {
    ($manifest:expr, $obj:ident => $body:expr) => {
        match $manifest {
            Manifest::Namespace($obj) => $body,
            Manifest::Secret($obj) => $body,
            Manifest::Workload($obj) => $body,
            Manifest::Exposure($obj) => $body,
            Manifest::Ingress($obj) => $body,
            Manifest::VolumeClaim($obj) => $body,
            Manifest::Autoscaler($obj) => $body,
            Manifest::ResourceQuota($obj) => $body,
        }
    };
}

impl Manifest {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Manifest::Namespace(_) => ResourceKind::Namespace,
            Manifest::Secret(_) => ResourceKind::Secret,
            Manifest::Workload(_) => ResourceKind::Workload,
            Manifest::Exposure(_) => ResourceKind::Exposure,
            Manifest::Ingress(_) => ResourceKind::Ingress,
            Manifest::VolumeClaim(_) => ResourceKind::VolumeClaim,
            Manifest::Autoscaler(_) => ResourceKind::Autoscaler,
            Manifest::ResourceQuota(_) => ResourceKind::ResourceQuota,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        with_object!(self, obj => &obj.metadata)
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        with_object!(self, obj => &mut obj.metadata)
    }

    /// Object name, empty if unset.
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// `kind namespace/name`, for log lines and error messages.
    pub fn describe(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{} {ns}/{}", self.kind(), self.name()),
            None => format!("{} {}", self.kind(), self.name()),
        }
    }

    pub fn as_workload(&self) -> Option<&Deployment> {
        match self {
            Manifest::Workload(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_exposure(&self) -> Option<&Service> {
        match self {
            Manifest::Exposure(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&Secret> {
        match self {
            Manifest::Secret(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_ingress(&self) -> Option<&Ingress> {
        match self {
            Manifest::Ingress(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_autoscaler(&self) -> Option<&HorizontalPodAutoscaler> {
        match self {
            Manifest::Autoscaler(obj) => Some(obj),
            _ => None,
        }
    }
}

/// Whether `labels` satisfies an equality selector such as `a=b,c=d`.
///
/// An empty selector matches everything.
pub fn selector_matches(
    selector: &str,
    labels: Option<&std::collections::BTreeMap<String, String>>,
) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels
                .and_then(|l| l.get(key.trim()))
                .is_some_and(|v| v == value.trim()),
            None => labels.is_some_and(|l| l.contains_key(term)),
        })
}
