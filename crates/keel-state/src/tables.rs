//! redb table definitions for the keel state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Child records use `{parent_id}:{child_id}` keys so they can be prefix-scanned.

use redb::TableDefinition;

/// Services keyed by `{service_id}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Deployments keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Custom domains keyed by `{service_id}:{domain_id}`.
pub const DOMAINS: TableDefinition<&str, &[u8]> = TableDefinition::new("domains");

/// Environment variables keyed by `{service_id}:{env_var_id}`.
pub const ENV_VARS: TableDefinition<&str, &[u8]> = TableDefinition::new("env_vars");

/// Env var reference edges keyed by `{service_id}:{reference_id}`.
pub const ENV_REFERENCES: TableDefinition<&str, &[u8]> = TableDefinition::new("env_references");

/// Volumes keyed by `{service_id}:{volume_id}`.
pub const VOLUMES: TableDefinition<&str, &[u8]> = TableDefinition::new("volumes");

/// Template definitions keyed by `{template_id}`.
pub const TEMPLATES: TableDefinition<&str, &[u8]> = TableDefinition::new("templates");

/// Template deployment batches keyed by `{template_deployment_id}`.
pub const TEMPLATE_DEPLOYMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("template_deployments");
