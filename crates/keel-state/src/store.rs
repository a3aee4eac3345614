//! StateStore — redb-backed state persistence for keel.
//!
//! Provides typed CRUD operations over services, deployments, domains,
//! env vars, env references, volumes, templates and template deployments.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [
            SERVICES,
            DEPLOYMENTS,
            DOMAINS,
            ENV_VARS,
            ENV_REFERENCES,
            VOLUMES,
            TEMPLATES,
            TEMPLATE_DEPLOYMENTS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON helpers ───────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Every value whose key starts with `prefix` (all values for `""`).
    fn scan_json<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    /// Delete every value under `prefix` for which `pred` holds, in one
    /// write transaction. Returns the number deleted.
    fn delete_where<T, F>(&self, table: JsonTable, prefix: &str, pred: F) -> StateResult<u32>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            let mut doomed = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let key = key.value();
                if !key.starts_with(prefix) {
                    continue;
                }
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if pred(&item) {
                    doomed.push(key.to_string());
                }
            }
            for key in &doomed {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            count = doomed.len() as u32;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a service.
    pub fn put_service(&self, service: &Service) -> StateResult<()> {
        self.put_json(SERVICES, &service.id, service)?;
        debug!(service_id = %service.id, "service stored");
        Ok(())
    }

    /// Get a service by id.
    pub fn get_service(&self, service_id: &str) -> StateResult<Option<Service>> {
        self.get_json(SERVICES, service_id)
    }

    /// List all services.
    pub fn list_services(&self) -> StateResult<Vec<Service>> {
        self.scan_json(SERVICES, "")
    }

    /// Services a template deployment created, oldest first.
    ///
    /// Lets a re-run of the same template deployment reuse the services a
    /// previous attempt created instead of duplicating them.
    pub fn list_template_services(&self, template_deployment_id: &str) -> StateResult<Vec<Service>> {
        let mut services: Vec<Service> = self
            .list_services()?
            .into_iter()
            .filter(|s| s.template_deployment_id.as_deref() == Some(template_deployment_id))
            .collect();
        services.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(services)
    }

    /// Set a service's public subdomain and URL.
    pub fn update_service_endpoint(
        &self,
        service_id: &str,
        subdomain: Option<String>,
        url: Option<String>,
    ) -> StateResult<Service> {
        let mut service = self
            .get_service(service_id)?
            .ok_or_else(|| StateError::not_found("service", service_id))?;
        service.subdomain = subdomain;
        service.url = url;
        service.updated_at = epoch_secs();
        self.put_service(&service)?;
        Ok(service)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        self.put_json(DEPLOYMENTS, &deployment.id, deployment)?;
        debug!(deployment_id = %deployment.id, status = ?deployment.status, "deployment stored");
        Ok(())
    }

    /// Get a deployment by id.
    pub fn get_deployment(&self, deployment_id: &str) -> StateResult<Option<Deployment>> {
        self.get_json(DEPLOYMENTS, deployment_id)
    }

    /// List every deployment of a service.
    pub fn list_deployments_for_service(&self, service_id: &str) -> StateResult<Vec<Deployment>> {
        let all: Vec<Deployment> = self.scan_json(DEPLOYMENTS, "")?;
        Ok(all.into_iter().filter(|d| d.service_id == service_id).collect())
    }

    /// Whether a service has a deployment that is pending, deploying or running.
    pub fn has_live_deployment(&self, service_id: &str) -> StateResult<bool> {
        Ok(self
            .list_deployments_for_service(service_id)?
            .iter()
            .any(|d| d.status.is_live()))
    }

    /// Set a deployment's status.
    pub fn update_deployment_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
    ) -> StateResult<Deployment> {
        let mut deployment = self
            .get_deployment(deployment_id)?
            .ok_or_else(|| StateError::not_found("deployment", deployment_id))?;
        deployment.status = status;
        deployment.updated_at = epoch_secs();
        self.put_deployment(&deployment)?;
        Ok(deployment)
    }

    /// Mark a deployment FAILED and inactive, attaching a log blob.
    pub fn mark_deployment_failed(
        &self,
        deployment_id: &str,
        log: String,
    ) -> StateResult<Deployment> {
        let mut deployment = self
            .get_deployment(deployment_id)?
            .ok_or_else(|| StateError::not_found("deployment", deployment_id))?;
        deployment.status = DeploymentStatus::Failed;
        deployment.is_active = false;
        deployment.log = Some(log);
        deployment.updated_at = epoch_secs();
        self.put_deployment(&deployment)?;
        Ok(deployment)
    }

    /// Mark a deployment RUNNING and active, and stop every other live
    /// deployment of the same service.
    ///
    /// The read of sibling deployments and all the writes happen inside one
    /// write transaction. redb serializes write transactions, so two
    /// rollouts of the same service finishing at once cannot both end up
    /// active. Returns the deployments that were superseded.
    pub fn activate_deployment(
        &self,
        deployment_id: &str,
        deployed_at: u64,
        log: Option<String>,
    ) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let superseded;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;

            let mut target: Deployment = match table.get(deployment_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::not_found("deployment", deployment_id)),
            };

            let mut siblings = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let other: Deployment =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if other.id != target.id
                    && other.service_id == target.service_id
                    && (other.is_active
                        || matches!(
                            other.status,
                            DeploymentStatus::Running | DeploymentStatus::Deploying
                        ))
                {
                    siblings.push(other);
                }
            }

            let now = epoch_secs();
            for other in &mut siblings {
                other.status = DeploymentStatus::Stopped;
                other.is_active = false;
                other.updated_at = now;
                let value = serde_json::to_vec(&*other).map_err(map_err!(Serialize))?;
                table
                    .insert(other.id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            target.status = DeploymentStatus::Running;
            target.is_active = true;
            target.deployed_at = Some(deployed_at);
            if log.is_some() {
                target.log = log;
            }
            target.updated_at = now;
            let value = serde_json::to_vec(&target).map_err(map_err!(Serialize))?;
            table
                .insert(target.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            superseded = siblings;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %deployment_id,
            superseded = superseded.len(),
            "deployment activated"
        );
        Ok(superseded)
    }

    // ── Domains ────────────────────────────────────────────────────

    /// Insert or update a custom domain.
    pub fn put_domain(&self, domain: &Domain) -> StateResult<()> {
        self.put_json(DOMAINS, &domain.table_key(), domain)
    }

    /// Verified custom domains of a service.
    pub fn list_verified_domains(&self, service_id: &str) -> StateResult<Vec<Domain>> {
        let domains: Vec<Domain> = self.scan_json(DOMAINS, &format!("{service_id}:"))?;
        Ok(domains.into_iter().filter(|d| d.verified).collect())
    }

    // ── Environment variables ──────────────────────────────────────

    /// Insert or update an env var.
    pub fn put_env_var(&self, var: &EnvVar) -> StateResult<()> {
        self.put_json(ENV_VARS, &var.table_key(), var)
    }

    /// All env vars of a service, both scopes.
    pub fn list_env_vars(&self, service_id: &str) -> StateResult<Vec<EnvVar>> {
        self.scan_json(ENV_VARS, &format!("{service_id}:"))
    }

    /// Service-scoped env vars (no deployment override).
    pub fn list_service_env_vars(&self, service_id: &str) -> StateResult<Vec<EnvVar>> {
        Ok(self
            .list_env_vars(service_id)?
            .into_iter()
            .filter(|v| v.deployment_id.is_none())
            .collect())
    }

    /// Env vars scoped to one deployment.
    pub fn list_deployment_env_vars(
        &self,
        service_id: &str,
        deployment_id: &str,
    ) -> StateResult<Vec<EnvVar>> {
        Ok(self
            .list_env_vars(service_id)?
            .into_iter()
            .filter(|v| v.deployment_id.as_deref() == Some(deployment_id))
            .collect())
    }

    /// Find a system-managed, service-scoped env var by key.
    pub fn find_system_env_var(&self, service_id: &str, key: &str) -> StateResult<Option<EnvVar>> {
        Ok(self
            .list_env_vars(service_id)?
            .into_iter()
            .find(|v| v.is_system && v.deployment_id.is_none() && v.key == key))
    }

    /// Delete one env var. Returns true if it existed.
    pub fn delete_env_var(&self, var: &EnvVar) -> StateResult<bool> {
        let key = var.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ENV_VARS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Delete every user (non-system) env var of a service.
    pub fn delete_user_env_vars(&self, service_id: &str) -> StateResult<u32> {
        self.delete_where::<EnvVar, _>(ENV_VARS, &format!("{service_id}:"), |v| !v.is_system)
    }

    // ── Env references ─────────────────────────────────────────────

    pub fn put_env_reference(&self, reference: &EnvVarReference) -> StateResult<()> {
        self.put_json(ENV_REFERENCES, &reference.table_key(), reference)
    }

    pub fn list_env_references(&self, service_id: &str) -> StateResult<Vec<EnvVarReference>> {
        self.scan_json(ENV_REFERENCES, &format!("{service_id}:"))
    }

    /// Delete every reference edge originating at a service.
    pub fn delete_env_references(&self, service_id: &str) -> StateResult<u32> {
        self.delete_where::<EnvVarReference, _>(ENV_REFERENCES, &format!("{service_id}:"), |_| true)
    }

    // ── Volumes ────────────────────────────────────────────────────

    pub fn put_volume(&self, volume: &Volume) -> StateResult<()> {
        self.put_json(VOLUMES, &volume.table_key(), volume)
    }

    pub fn list_volumes(&self, service_id: &str) -> StateResult<Vec<Volume>> {
        self.scan_json(VOLUMES, &format!("{service_id}:"))
    }

    /// Find a service's volume by its logical name.
    pub fn find_volume(&self, service_id: &str, name: &str) -> StateResult<Option<Volume>> {
        Ok(self
            .list_volumes(service_id)?
            .into_iter()
            .find(|v| v.name == name))
    }

    // ── Templates ──────────────────────────────────────────────────

    pub fn put_template(&self, template: &TemplateDefinition) -> StateResult<()> {
        self.put_json(TEMPLATES, &template.id, template)
    }

    pub fn get_template(&self, template_id: &str) -> StateResult<Option<TemplateDefinition>> {
        self.get_json(TEMPLATES, template_id)
    }

    // ── Template deployments ───────────────────────────────────────

    pub fn put_template_deployment(&self, batch: &TemplateDeployment) -> StateResult<()> {
        self.put_json(TEMPLATE_DEPLOYMENTS, &batch.id, batch)
    }

    pub fn get_template_deployment(&self, id: &str) -> StateResult<Option<TemplateDeployment>> {
        self.get_json(TEMPLATE_DEPLOYMENTS, id)
    }

    /// Set a template deployment's status and message.
    pub fn update_template_deployment_status(
        &self,
        id: &str,
        status: TemplateDeploymentStatus,
        message: Option<String>,
    ) -> StateResult<TemplateDeployment> {
        let mut batch = self
            .get_template_deployment(id)?
            .ok_or_else(|| StateError::not_found("template deployment", id))?;
        batch.status = status;
        batch.message = message;
        batch.updated_at = epoch_secs();
        self.put_template_deployment(&batch)?;
        Ok(batch)
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service(id: &str) -> Service {
        Service {
            id: id.to_string(),
            project_id: "proj-1".to_string(),
            tenant_id: "ws-1".to_string(),
            name: "api".to_string(),
            resource_name: format!("svc-{id}"),
            subdomain: Some("api".to_string()),
            url: None,
            image: "ghcr.io/acme/api".to_string(),
            port: 8080,
            replicas: 1,
            resources: ResourceSizing::default(),
            health_check_path: Some("/healthz".to_string()),
            autoscaling: None,
            template_deployment_id: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_deployment(id: &str, service_id: &str, status: DeploymentStatus) -> Deployment {
        Deployment {
            id: id.to_string(),
            service_id: service_id.to_string(),
            image: "ghcr.io/acme/api".to_string(),
            tag: "v1".to_string(),
            port: 8080,
            replicas: 1,
            resources: ResourceSizing::default(),
            health_check_path: None,
            command: None,
            args: None,
            status,
            is_active: status == DeploymentStatus::Running,
            deployed_at: None,
            log: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_env(service_id: &str, id: &str, key: &str, deployment: Option<&str>) -> EnvVar {
        EnvVar {
            id: id.to_string(),
            service_id: service_id.to_string(),
            deployment_id: deployment.map(str::to_string),
            key: key.to_string(),
            ciphertext: "00".to_string(),
            iv_tag: "00:00".to_string(),
            is_system: false,
        }
    }

    // ── Services ───────────────────────────────────────────────────

    #[test]
    fn service_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let svc = test_service("s1");

        store.put_service(&svc).unwrap();
        assert_eq!(store.get_service("s1").unwrap(), Some(svc));
        assert!(store.get_service("nope").unwrap().is_none());
    }

    #[test]
    fn list_template_services_is_scoped_and_ordered() {
        let store = StateStore::open_in_memory().unwrap();
        for (id, created) in [("b", 2), ("a", 1), ("c", 3)] {
            let mut svc = test_service(id);
            svc.template_deployment_id = Some("td-1".to_string());
            svc.created_at = created;
            store.put_service(&svc).unwrap();
        }
        store.put_service(&test_service("other")).unwrap();

        let ids: Vec<String> = store
            .list_template_services("td-1")
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn update_service_endpoint_missing_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_service_endpoint("nope", None, None).unwrap_err();
        assert!(matches!(err, StateError::NotFound { .. }));
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn activate_deployment_stops_siblings() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_deployment(&test_deployment("d0", "s1", DeploymentStatus::Running))
            .unwrap();
        store
            .put_deployment(&test_deployment("d1", "s1", DeploymentStatus::Deploying))
            .unwrap();
        store
            .put_deployment(&test_deployment("old", "s1", DeploymentStatus::Failed))
            .unwrap();
        store
            .put_deployment(&test_deployment("other", "s2", DeploymentStatus::Running))
            .unwrap();

        let superseded = store.activate_deployment("d1", 5000, None).unwrap();
        let ids: Vec<_> = superseded.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d0"]);

        let d1 = store.get_deployment("d1").unwrap().unwrap();
        assert_eq!(d1.status, DeploymentStatus::Running);
        assert!(d1.is_active);
        assert_eq!(d1.deployed_at, Some(5000));

        let d0 = store.get_deployment("d0").unwrap().unwrap();
        assert_eq!(d0.status, DeploymentStatus::Stopped);
        assert!(!d0.is_active);

        // Failed deployments and other services are untouched.
        assert_eq!(
            store.get_deployment("old").unwrap().unwrap().status,
            DeploymentStatus::Failed
        );
        assert!(store.get_deployment("other").unwrap().unwrap().is_active);
    }

    #[test]
    fn at_most_one_active_after_successive_activations() {
        let store = StateStore::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store
                .put_deployment(&test_deployment(id, "s1", DeploymentStatus::Deploying))
                .unwrap();
            store.activate_deployment(id, 1, None).unwrap();
        }
        let active: Vec<_> = store
            .list_deployments_for_service("s1")
            .unwrap()
            .into_iter()
            .filter(|d| d.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "c");
    }

    #[test]
    fn activate_missing_deployment_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.activate_deployment("ghost", 1, None).unwrap_err();
        assert!(matches!(err, StateError::NotFound { .. }));
    }

    #[test]
    fn mark_failed_attaches_log() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_deployment(&test_deployment("d1", "s1", DeploymentStatus::Deploying))
            .unwrap();
        let failed = store
            .mark_deployment_failed("d1", "boom".to_string())
            .unwrap();
        assert_eq!(failed.status, DeploymentStatus::Failed);
        assert_eq!(failed.log.as_deref(), Some("boom"));
        assert!(!failed.is_active);
    }

    #[test]
    fn has_live_deployment_checks_status() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(!store.has_live_deployment("s1").unwrap());
        store
            .put_deployment(&test_deployment("d1", "s1", DeploymentStatus::Failed))
            .unwrap();
        assert!(!store.has_live_deployment("s1").unwrap());
        store
            .put_deployment(&test_deployment("d2", "s1", DeploymentStatus::Pending))
            .unwrap();
        assert!(store.has_live_deployment("s1").unwrap());
    }

    // ── Domains ────────────────────────────────────────────────────

    #[test]
    fn only_verified_domains_are_listed() {
        let store = StateStore::open_in_memory().unwrap();
        for (id, verified) in [("a", true), ("b", false)] {
            store
                .put_domain(&Domain {
                    id: id.to_string(),
                    service_id: "s1".to_string(),
                    hostname: format!("{id}.example.com"),
                    verified,
                })
                .unwrap();
        }
        let domains = store.list_verified_domains("s1").unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].hostname, "a.example.com");
    }

    // ── Env vars ───────────────────────────────────────────────────

    #[test]
    fn env_vars_split_by_scope() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_env_var(&test_env("s1", "e1", "A", None)).unwrap();
        store.put_env_var(&test_env("s1", "e2", "B", Some("d1"))).unwrap();
        store.put_env_var(&test_env("s2", "e3", "C", None)).unwrap();

        assert_eq!(store.list_service_env_vars("s1").unwrap().len(), 1);
        assert_eq!(store.list_deployment_env_vars("s1", "d1").unwrap().len(), 1);
        assert!(store.list_deployment_env_vars("s1", "d2").unwrap().is_empty());
    }

    #[test]
    fn delete_user_env_vars_keeps_system_vars() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_env_var(&test_env("s1", "e1", "A", None)).unwrap();
        let mut system = test_env("s1", "e2", "PUBLIC_DOMAIN", None);
        system.is_system = true;
        store.put_env_var(&system).unwrap();

        assert_eq!(store.delete_user_env_vars("s1").unwrap(), 1);
        let left = store.list_env_vars("s1").unwrap();
        assert_eq!(left, vec![system.clone()]);
        assert_eq!(
            store.find_system_env_var("s1", "PUBLIC_DOMAIN").unwrap(),
            Some(system.clone())
        );
        assert!(store.delete_env_var(&system).unwrap());
        assert!(!store.delete_env_var(&system).unwrap());
    }

    #[test]
    fn env_references_replace_cleanly() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_env_reference(&EnvVarReference {
                id: "r1".to_string(),
                service_id: "s1".to_string(),
                key: "DB_HOST".to_string(),
                referenced_service_id: "s0".to_string(),
            })
            .unwrap();
        assert_eq!(store.list_env_references("s1").unwrap().len(), 1);
        assert_eq!(store.delete_env_references("s1").unwrap(), 1);
        assert!(store.list_env_references("s1").unwrap().is_empty());
    }

    // ── Template deployments ───────────────────────────────────────

    #[test]
    fn template_deployment_status_update() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_template_deployment(&TemplateDeployment {
                id: "td-1".to_string(),
                template_id: "t-1".to_string(),
                project_id: "p".to_string(),
                tenant_id: "ws".to_string(),
                status: TemplateDeploymentStatus::Pending,
                message: None,
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();

        let batch = store
            .update_template_deployment_status(
                "td-1",
                TemplateDeploymentStatus::Failed,
                Some("bad input".to_string()),
            )
            .unwrap();
        assert_eq!(batch.status, TemplateDeploymentStatus::Failed);
        assert_eq!(batch.message.as_deref(), Some("bad input"));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_service(&test_service("s1")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let svc = store.get_service("s1").unwrap();
        assert_eq!(svc.map(|s| s.name), Some("api".to_string()));
    }
}
