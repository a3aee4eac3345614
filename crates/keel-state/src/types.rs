//! Domain types for the keel state store.
//!
//! These are the durable records the orchestration engine reconciles
//! cluster state toward. All types are serializable to/from JSON for
//! storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identifier for a service.
pub type ServiceId = String;

/// Unique identifier for a deployment (one rollout attempt of a service).
pub type DeploymentId = String;

// ── Sizing ────────────────────────────────────────────────────────

/// CPU/memory request and limit, in cluster quantity notation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSizing {
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
}

impl Default for ResourceSizing {
    fn default() -> Self {
        Self {
            cpu_request: "100m".to_string(),
            cpu_limit: "500m".to_string(),
            memory_request: "128Mi".to_string(),
            memory_limit: "512Mi".to_string(),
        }
    }
}

/// Horizontal autoscaling bounds for a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoscalingPolicy {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_cpu_percent: u32,
    pub target_memory_percent: Option<u32>,
}

// ── Service ───────────────────────────────────────────────────────

/// Stable logical identity that deployments roll out under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: ServiceId,
    pub project_id: String,
    pub tenant_id: String,
    /// Human-readable name. Not unique.
    pub name: String,
    /// Cluster name for the service's stable objects (exposure, ingress).
    pub resource_name: String,
    /// Platform subdomain label; the public host is `<subdomain>.<suffix>`.
    pub subdomain: Option<String>,
    pub url: Option<String>,
    pub image: String,
    pub port: u16,
    pub replicas: u32,
    pub resources: ResourceSizing,
    pub health_check_path: Option<String>,
    pub autoscaling: Option<AutoscalingPolicy>,
    /// Set when the service was generated by a template deployment.
    pub template_deployment_id: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// A custom domain attached to a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Domain {
    pub id: String,
    pub service_id: ServiceId,
    pub hostname: String,
    /// Only verified domains are routed.
    pub verified: bool,
}

// ── Deployment ────────────────────────────────────────────────────

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Running,
    Failed,
    Stopped,
    Crashed,
}

impl DeploymentStatus {
    /// Whether a deployment in this status is (or is about to be) serving.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Deploying | Self::Running)
    }
}

/// One versioned rollout attempt of a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub service_id: ServiceId,
    pub image: String,
    pub tag: String,
    pub port: u16,
    pub replicas: u32,
    pub resources: ResourceSizing,
    pub health_check_path: Option<String>,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub status: DeploymentStatus,
    pub is_active: bool,
    pub deployed_at: Option<u64>,
    /// Free-text log or error blob captured by the consumer.
    pub log: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Deployment {
    /// Full image reference (`image:tag`, or `image` when the tag is empty).
    pub fn image_ref(&self) -> String {
        if self.tag.is_empty() {
            self.image.clone()
        } else {
            format!("{}:{}", self.image, self.tag)
        }
    }
}

// ── Environment ───────────────────────────────────────────────────

/// An encrypted environment variable.
///
/// Service-scoped when `deployment_id` is `None`; otherwise an override for
/// one deployment that shadows the service-scoped entry with the same key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub id: String,
    pub service_id: ServiceId,
    pub deployment_id: Option<DeploymentId>,
    pub key: String,
    /// Hex ciphertext.
    pub ciphertext: String,
    /// `<iv hex>:<auth tag hex>`.
    pub iv_tag: String,
    /// Written by the platform rather than the user.
    pub is_system: bool,
}

/// Records that `service_id`'s `key` was derived from another service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVarReference {
    pub id: String,
    pub service_id: ServiceId,
    pub key: String,
    pub referenced_service_id: ServiceId,
}

// ── Volume ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    pub service_id: ServiceId,
    /// Logical name from the template definition.
    pub name: String,
    pub claim_name: String,
    pub mount_path: String,
    pub size: String,
    pub bound: bool,
}

// ── Templates ─────────────────────────────────────────────────────

/// An ordered list of service definitions deployed together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateDefinition {
    pub id: String,
    pub name: String,
    pub services: Vec<TemplateService>,
}

fn default_replicas() -> u32 {
    1
}

/// One service inside a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateService {
    /// Template-local name; references and inputs use it.
    pub name: String,
    pub image: String,
    pub port: u16,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub resources: ResourceSizing,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub volumes: Vec<TemplateVolume>,
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub health_check_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateVolume {
    pub name: String,
    pub mount_path: String,
    pub size: String,
}

/// How a template environment value is produced.
///
/// JSON forms:
/// - `"literal"`
/// - `{"generate": "secret"}` / `{"generate": "uuid"}`
/// - `{"ref": {"service": "db", "property": "hostname"}}`
/// - `{"input": {"key": "admin_email", "default": "ops@example.com"}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    Generated {
        generate: GeneratedKind,
    },
    Reference {
        #[serde(rename = "ref")]
        reference: ServiceRef,
    },
    Input {
        input: InputRef,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedKind {
    /// Random alphanumeric secret.
    Secret,
    /// Random v4 UUID.
    Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRef {
    /// Template-local name of the referenced service.
    pub service: String,
    pub property: RefProperty,
}

/// What to take from a referenced service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RefProperty {
    /// The service's resource-name (its address inside the cluster).
    Hostname,
    /// A database URL synthesized from the service's own env conventions.
    ConnectionUrl,
    /// One variable of the referenced service (`env.<KEY>`).
    Env(String),
}

impl FromStr for RefProperty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hostname" => Ok(Self::Hostname),
            "connection_url" => Ok(Self::ConnectionUrl),
            other => match other.strip_prefix("env.") {
                Some(key) if !key.is_empty() => Ok(Self::Env(key.to_string())),
                _ => Err(format!("unknown reference property: {other:?}")),
            },
        }
    }
}

impl TryFrom<String> for RefProperty {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RefProperty> for String {
    fn from(value: RefProperty) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RefProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hostname => f.write_str("hostname"),
            Self::ConnectionUrl => f.write_str("connection_url"),
            Self::Env(key) => write!(f, "env.{key}"),
        }
    }
}

/// A value supplied by the user at deploy time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputRef {
    /// Looked up as `<service name>.<key>` in the job's input map.
    pub key: String,
    #[serde(default)]
    pub default: Option<String>,
}

/// Status of a template deployment batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateDeploymentStatus {
    Pending,
    Deploying,
    Deployed,
    Failed,
}

/// A batch tying a template plus user inputs to the services it generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateDeployment {
    pub id: String,
    pub template_id: String,
    pub project_id: String,
    pub tenant_id: String,
    pub status: TemplateDeploymentStatus,
    pub message: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl EnvVar {
    /// Build the composite key for the env vars table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service_id, self.id)
    }
}

impl EnvVarReference {
    /// Build the composite key for the env references table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service_id, self.id)
    }
}

impl Domain {
    /// Build the composite key for the domains table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service_id, self.id)
    }
}

impl Volume {
    /// Build the composite key for the volumes table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service_id, self.id)
    }
}
