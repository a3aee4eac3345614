//! Naming rules that map store records onto cluster object names.
//!
//! Cluster names must be valid RFC 1123 labels: lowercase alphanumerics and
//! `-`, starting and ending with an alphanumeric, at most 63 characters.

use sha2::{Digest, Sha256};

/// Maximum length of a DNS label / most cluster object names.
pub const MAX_LABEL_LEN: usize = 63;

/// Label key: which system manages the object.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// Label value for [`LABEL_MANAGED_BY`].
pub const MANAGED_BY: &str = "keel";
/// Label key: tenant (workspace) identifier.
pub const LABEL_TENANT: &str = "keel.dev/tenant";
/// Label key: service identifier.
pub const LABEL_SERVICE: &str = "keel.dev/service";
/// Label key: deployment identifier. The exposure selector targets this.
pub const LABEL_DEPLOYMENT: &str = "keel.dev/deployment";
/// Label key: workload name, used to find pods by workload.
pub const LABEL_WORKLOAD: &str = "keel.dev/workload";

/// Lowercase `input` and squash every run of non-alphanumerics into one `-`.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Coerce an identifier into a valid label value: `[A-Za-z0-9_.-]`, at
/// most 63 characters, alphanumeric at both ends.
pub fn label_value(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_LEN)
        .collect();
    cleaned
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Truncate a slug to `max` characters without leaving a trailing `-`.
fn truncate_slug(slug: &str, max: usize) -> String {
    let mut cut: String = slug.chars().take(max).collect();
    while cut.ends_with('-') {
        cut.pop();
    }
    cut
}

/// Namespace name for a tenant.
///
/// The hash suffix keeps the name unique even when two tenant ids slugify to
/// the same prefix.
pub fn tenant_namespace(tenant_id: &str) -> String {
    let digest = hex::encode(Sha256::digest(tenant_id.as_bytes()));
    let hash = &digest[..12];
    // "tenant-" + slug + "-" + hash
    let budget = MAX_LABEL_LEN - "tenant-".len() - 1 - hash.len();
    let slug = truncate_slug(&slugify(tenant_id), budget);
    if slug.is_empty() {
        format!("tenant-{hash}")
    } else {
        format!("tenant-{slug}-{hash}")
    }
}

/// First `len` hex chars of the sha256 of `id`.
fn short_hash(id: &str, len: usize) -> String {
    let digest = hex::encode(Sha256::digest(id.as_bytes()));
    digest[..len].to_string()
}

/// Cluster name for a service, derived from its id rather than its display
/// name (display names are not unique). Ids that share a prefix still get
/// distinct names.
pub fn service_resource_name(service_id: &str) -> String {
    format!("svc-{}", short_hash(service_id, 10))
}

/// Workload name for one rollout attempt of a service. Distinct deployment
/// ids give distinct names, however alike the ids look.
pub fn workload_name(service_resource_name: &str, deployment_id: &str) -> String {
    let short = short_hash(deployment_id, 10);
    let budget = MAX_LABEL_LEN - 1 - short.len();
    format!("{}-{short}", truncate_slug(service_resource_name, budget))
}

/// Secret holding a deployment's merged environment.
pub fn deployment_secret_name(workload_name: &str) -> String {
    format!("{workload_name}-env")
}

/// Persistent volume claim for a service volume.
pub fn volume_claim_name(service_resource_name: &str, volume_name: &str) -> String {
    let volume = slugify(volume_name);
    let budget = MAX_LABEL_LEN.saturating_sub(service_resource_name.len() + 1);
    format!("{service_resource_name}-{}", truncate_slug(&volume, budget))
}

/// TLS secret used for an ingress that serves custom domains.
pub fn ingress_tls_secret_name(service_resource_name: &str) -> String {
    format!("{service_resource_name}-tls")
}
