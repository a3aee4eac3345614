//! Template deploy consumer.
//!
//! Pass 1 registers one service per definition, reusing services a
//! previous attempt of the same batch created. Pass 2 resolves each
//! service's environment and issues its manifests, skipping services that
//! already have a live deployment. Deployments are marked RUNNING as soon
//! as their manifests are accepted; no rollout wait happens here.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use keel_core::names::{
    deployment_secret_name, service_resource_name, volume_claim_name, workload_name,
};
use keel_state::store::epoch_secs;
use keel_state::{
    Deployment, DeploymentStatus, EnvVar, EnvVarReference, Service, TemplateDeploymentStatus,
    TemplateService, Volume,
};
use keel_workload::{ExposureSpec, IngressSpec, VolumeMountSpec, WorkloadSpec};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::JobContext;
use crate::error::{JobError, JobResult};
use crate::job::TemplateJob;
use crate::resolver::{RegisteredService, ResolvedVar, ValueResolver};

/// Per-batch result: which services were deployed and which were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateOutcome {
    /// Template-local name to service id, for every definition.
    pub services: BTreeMap<String, String>,
    pub deployed: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct TemplateConsumer {
    ctx: Arc<JobContext>,
}

impl TemplateConsumer {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, job: &TemplateJob) -> JobResult<TemplateOutcome> {
        let store = &self.ctx.store;
        store.update_template_deployment_status(
            &job.template_deployment_id,
            TemplateDeploymentStatus::Deploying,
            None,
        )?;
        info!(
            template_deployment_id = %job.template_deployment_id,
            template_id = %job.template_id,
            "template deploy started"
        );

        match self.execute(job).await {
            Ok(outcome) => {
                store.update_template_deployment_status(
                    &job.template_deployment_id,
                    TemplateDeploymentStatus::Deployed,
                    None,
                )?;
                info!(
                    template_deployment_id = %job.template_deployment_id,
                    deployed = outcome.deployed.len(),
                    skipped = outcome.skipped.len(),
                    "template deployed"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(template_deployment_id = %job.template_deployment_id, error = %e, "template deploy failed");
                if let Err(status_err) = store.update_template_deployment_status(
                    &job.template_deployment_id,
                    TemplateDeploymentStatus::Failed,
                    Some(e.to_string()),
                ) {
                    error!(
                        template_deployment_id = %job.template_deployment_id,
                        error = %status_err,
                        "failed to record template failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &TemplateJob) -> JobResult<TemplateOutcome> {
        let template = self
            .ctx
            .store
            .get_template(&job.template_id)?
            .ok_or_else(|| JobError::not_found("template", &job.template_id))?;
        let namespace = self.ctx.namespaces.ensure(&job.tenant_id).await?;

        let registry = self.register(job, &template.services)?;

        let mut outcome = TemplateOutcome {
            services: registry
                .iter()
                .map(|(name, reg)| (name.clone(), reg.id.clone()))
                .collect(),
            ..Default::default()
        };
        let mut resolver = ValueResolver::new(&template.services, &registry, &job.inputs);
        let live = self.recall_live(&registry, &mut resolver)?;
        for definition in &template.services {
            let Some(registered) = registry.get(&definition.name) else {
                continue;
            };
            if live.contains(&definition.name) {
                debug!(service = %definition.name, service_id = %registered.id, "live deployment exists, skipping");
                outcome.skipped.push(definition.name.clone());
                continue;
            }
            let resolved = resolver.resolve_service(&definition.name)?;
            self.deploy_service(job, &namespace, definition, registered, &resolved)
                .await?;
            outcome.deployed.push(definition.name.clone());
        }
        Ok(outcome)
    }

    /// Services that already have a live deployment. Their generated values
    /// are fed back into the resolver so new references agree with them.
    fn recall_live(
        &self,
        registry: &BTreeMap<String, RegisteredService>,
        resolver: &mut ValueResolver<'_>,
    ) -> JobResult<HashSet<String>> {
        let store = &self.ctx.store;
        let cipher = self.ctx.secrets.cipher();
        let mut live = HashSet::new();
        for (name, registered) in registry {
            if !store.has_live_deployment(&registered.id)? {
                continue;
            }
            for var in store.list_service_env_vars(&registered.id)? {
                if var.is_system {
                    continue;
                }
                let value = cipher.decrypt(&var.ciphertext, &var.iv_tag)?;
                resolver.remember_generated(name, &var.key, value);
            }
            live.insert(name.clone());
        }
        Ok(live)
    }

    /// Pass 1: find or create a service for every definition.
    fn register(
        &self,
        job: &TemplateJob,
        definitions: &[TemplateService],
    ) -> JobResult<BTreeMap<String, RegisteredService>> {
        let store = &self.ctx.store;
        let existing = store.list_template_services(&job.template_deployment_id)?;
        let mut claimed: HashSet<String> = HashSet::new();
        let mut registry = BTreeMap::new();

        for definition in definitions {
            let reused = existing
                .iter()
                .filter(|s| s.image == definition.image && !claimed.contains(&s.id))
                .min_by_key(|s| s.name != definition.name)
                .cloned();
            let service = match reused {
                Some(service) => {
                    debug!(service = %definition.name, service_id = %service.id, "reusing service");
                    service
                }
                None => {
                    let service = new_service(job, definition);
                    store.put_service(&service)?;
                    info!(service = %definition.name, service_id = %service.id, "service registered");
                    service
                }
            };
            claimed.insert(service.id.clone());
            registry.insert(
                definition.name.clone(),
                RegisteredService {
                    id: service.id,
                    display_name: service.name,
                    resource_name: service.resource_name,
                },
            );
        }
        Ok(registry)
    }

    /// Pass 2 for one service.
    async fn deploy_service(
        &self,
        job: &TemplateJob,
        namespace: &str,
        definition: &TemplateService,
        registered: &RegisteredService,
        resolved: &[ResolvedVar],
    ) -> JobResult<()> {
        let store = &self.ctx.store;
        let service_id = &registered.id;

        self.persist_env(service_id, resolved)?;
        let mounts = self.materialize_volumes(job, namespace, definition, registered).await?;

        let now = epoch_secs();
        let deployment = Deployment {
            id: Uuid::new_v4().to_string(),
            service_id: service_id.clone(),
            image: definition.image.clone(),
            tag: String::new(),
            port: definition.port,
            replicas: definition.replicas,
            resources: definition.resources.clone(),
            health_check_path: definition.health_check_path.clone(),
            command: definition.command.clone(),
            args: definition.args.clone(),
            status: DeploymentStatus::Pending,
            is_active: false,
            deployed_at: None,
            log: None,
            created_at: now,
            updated_at: now,
        };
        store.put_deployment(&deployment)?;

        let workload = workload_name(&registered.resource_name, &deployment.id);
        let secret = deployment_secret_name(&workload);
        // Failures below settle the record as FAILED; a PENDING one reads as
        // live and a retry would skip the service.
        let applied = async {
            let env_secret = if resolved.is_empty() {
                None
            } else {
                let data = resolved
                    .iter()
                    .map(|v| (v.key.clone(), v.value.clone()))
                    .collect();
                self.ctx.secrets.write(namespace, &secret, data).await?;
                Some(secret.clone())
            };
            self.apply_manifests(
                job,
                namespace,
                definition,
                registered,
                &deployment,
                &workload,
                env_secret,
                mounts,
            )
            .await?;
            store.activate_deployment(&deployment.id, epoch_secs(), None)?;
            Ok::<(), JobError>(())
        }
        .await;
        if let Err(e) = applied {
            self.abandon(namespace, &deployment.id, &workload, &secret, &e).await;
            return Err(e);
        }

        info!(
            service = %definition.name,
            %service_id,
            deployment_id = %deployment.id,
            %workload,
            "template service deployed"
        );
        Ok(())
    }

    /// Workload, exposure, and for public services the endpoint and ingress.
    #[allow(clippy::too_many_arguments)]
    async fn apply_manifests(
        &self,
        job: &TemplateJob,
        namespace: &str,
        definition: &TemplateService,
        registered: &RegisteredService,
        deployment: &Deployment,
        workload: &str,
        env_secret: Option<String>,
        mounts: Vec<VolumeMountSpec>,
    ) -> JobResult<()> {
        let store = &self.ctx.store;
        let service_id = &registered.id;
        let deployments = &self.ctx.deployments;
        deployments
            .apply_workload(&WorkloadSpec {
                namespace: namespace.to_string(),
                name: workload.to_string(),
                tenant_id: job.tenant_id.clone(),
                service_id: service_id.clone(),
                deployment_id: deployment.id.clone(),
                image: deployment.image_ref(),
                port: definition.port,
                replicas: i32::try_from(definition.replicas).unwrap_or(i32::MAX),
                resources: definition.resources.clone(),
                health_check_path: definition.health_check_path.clone(),
                command: definition.command.clone(),
                args: definition.args.clone(),
                env_secret,
                mounts,
            })
            .await?;
        deployments
            .apply_exposure(&ExposureSpec {
                namespace: namespace.to_string(),
                name: registered.resource_name.clone(),
                tenant_id: job.tenant_id.clone(),
                service_id: service_id.clone(),
                deployment_id: deployment.id.clone(),
                port: definition.port,
            })
            .await?;

        if definition.public {
            let subdomain = registered.resource_name.clone();
            let host = format!("{subdomain}.{}", self.ctx.platform().domain_suffix);
            store.update_service_endpoint(
                service_id,
                Some(subdomain),
                Some(format!("http://{host}")),
            )?;
            deployments
                .reconcile_ingress(&IngressSpec {
                    namespace: namespace.to_string(),
                    name: registered.resource_name.clone(),
                    tenant_id: job.tenant_id.clone(),
                    service_id: service_id.clone(),
                    port: definition.port,
                    platform_host: Some(host),
                    custom_domains: Vec::new(),
                })
                .await?;
        }
        Ok(())
    }

    /// Settle a half-applied deployment as FAILED and drop what it created.
    async fn abandon(
        &self,
        namespace: &str,
        deployment_id: &str,
        workload: &str,
        secret: &str,
        err: &JobError,
    ) {
        if let Err(e) = self
            .ctx
            .store
            .mark_deployment_failed(deployment_id, format!("deployment failed: {err}"))
        {
            error!(%deployment_id, error = %e, "failed to record deployment failure");
        }
        if let Err(e) = self.ctx.deployments.delete_workload(namespace, workload).await {
            warn!(%workload, error = %e, "cleanup: failed to delete workload");
        }
        if let Err(e) = self.ctx.secrets.delete(namespace, secret).await {
            warn!(%secret, error = %e, "cleanup: failed to delete secret");
        }
    }

    /// Replace the service's user variables and reference edges.
    fn persist_env(&self, service_id: &str, resolved: &[ResolvedVar]) -> JobResult<()> {
        let store = &self.ctx.store;
        let cipher = self.ctx.secrets.cipher();

        store.delete_user_env_vars(service_id)?;
        for var in resolved {
            let (ciphertext, iv_tag) = cipher.encrypt(&var.value)?;
            store.put_env_var(&EnvVar {
                id: Uuid::new_v4().to_string(),
                service_id: service_id.to_string(),
                deployment_id: None,
                key: var.key.clone(),
                ciphertext,
                iv_tag,
                is_system: false,
            })?;
        }

        store.delete_env_references(service_id)?;
        for var in resolved {
            if let Some(referenced) = &var.referenced_service_id {
                store.put_env_reference(&EnvVarReference {
                    id: Uuid::new_v4().to_string(),
                    service_id: service_id.to_string(),
                    key: var.key.clone(),
                    referenced_service_id: referenced.clone(),
                })?;
            }
        }
        Ok(())
    }

    async fn materialize_volumes(
        &self,
        job: &TemplateJob,
        namespace: &str,
        definition: &TemplateService,
        registered: &RegisteredService,
    ) -> JobResult<Vec<VolumeMountSpec>> {
        let store = &self.ctx.store;
        let mut mounts = Vec::with_capacity(definition.volumes.len());
        for declared in &definition.volumes {
            let claim_name = volume_claim_name(&registered.resource_name, &declared.name);
            self.ctx
                .deployments
                .ensure_volume_claim(namespace, &claim_name, &declared.size, &job.tenant_id, &registered.id)
                .await?;

            let volume = match store.find_volume(&registered.id, &declared.name)? {
                Some(existing) => Volume {
                    bound: true,
                    ..existing
                },
                None => Volume {
                    id: Uuid::new_v4().to_string(),
                    service_id: registered.id.clone(),
                    name: declared.name.clone(),
                    claim_name: claim_name.clone(),
                    mount_path: declared.mount_path.clone(),
                    size: declared.size.clone(),
                    bound: true,
                },
            };
            store.put_volume(&volume)?;

            mounts.push(VolumeMountSpec {
                claim_name,
                mount_path: declared.mount_path.clone(),
            });
        }
        Ok(mounts)
    }
}

fn new_service(job: &TemplateJob, definition: &TemplateService) -> Service {
    let id = Uuid::new_v4().to_string();
    let now = epoch_secs();
    Service {
        resource_name: service_resource_name(&id),
        id,
        project_id: job.project_id.clone(),
        tenant_id: job.tenant_id.clone(),
        name: definition.name.clone(),
        subdomain: None,
        url: None,
        image: definition.image.clone(),
        port: definition.port,
        replicas: definition.replicas,
        resources: definition.resources.clone(),
        health_check_path: definition.health_check_path.clone(),
        autoscaling: None,
        template_deployment_id: Some(job.template_deployment_id.clone()),
        created_at: now,
        updated_at: now,
    }
}
