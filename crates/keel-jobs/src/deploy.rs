//! Single-service deploy consumer.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_autoscale::AutoscalerSpec;
use keel_core::names::{deployment_secret_name, workload_name};
use keel_rollout::RolloutOutcome;
use keel_secrets::SecretEntry;
use keel_state::store::epoch_secs;
use keel_state::{Deployment, DeploymentStatus, EnvVar, Service};
use keel_workload::{ExposureSpec, IngressSpec, WorkloadSpec};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::JobContext;
use crate::error::{JobError, JobResult};
use crate::job::DeployJob;

/// Terminal business outcome of a deploy job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Running { url: Option<String> },
    Failed { reason: String },
}

/// Where the cluster side of a deployment lives, once known.
#[derive(Debug, Clone)]
struct Target {
    namespace: String,
    workload: String,
    secret: String,
    tenant_id: String,
    service_id: String,
    /// The shared exposure name.
    exposure: String,
    /// Set once the exposure selects this rollout's pods.
    exposure_switched: bool,
}

pub struct DeployConsumer {
    ctx: Arc<JobContext>,
}

impl DeployConsumer {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    /// Run one deploy job to RUNNING or FAILED.
    ///
    /// A failed rollout is `Ok(DeployOutcome::Failed)`. An `Err` means the
    /// record was marked FAILED after an unexpected error and the job may
    /// be retried.
    pub async fn run(&self, job: &DeployJob) -> JobResult<DeployOutcome> {
        let deployment = self
            .ctx
            .store
            .update_deployment_status(&job.deployment_id, DeploymentStatus::Deploying)?;
        info!(deployment_id = %job.deployment_id, tenant_id = %job.tenant_id, "deploy started");

        let mut target = None;
        match self.execute(job, deployment, &mut target).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail_unexpected(&job.deployment_id, target.as_ref(), &e).await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job: &DeployJob,
        deployment: Deployment,
        target_slot: &mut Option<Target>,
    ) -> JobResult<DeployOutcome> {
        let store = &self.ctx.store;
        let service = store
            .get_service(&deployment.service_id)?
            .ok_or_else(|| JobError::not_found("service", &deployment.service_id))?;
        let custom_domains: Vec<String> = store
            .list_verified_domains(&service.id)?
            .into_iter()
            .map(|d| d.hostname)
            .collect();
        let platform_host = service
            .subdomain
            .as_ref()
            .map(|sub| format!("{sub}.{}", self.ctx.platform().domain_suffix));

        // Resolved before the env is read so this rollout already sees it.
        let public_domain = custom_domains
            .first()
            .map(String::as_str)
            .or(platform_host.as_deref());
        self.sync_public_domain_env(&service.id, public_domain)?;

        let service_env = store.list_service_env_vars(&service.id)?;
        let deployment_env = store.list_deployment_env_vars(&service.id, &deployment.id)?;

        let namespace = self.ctx.namespaces.ensure(&job.tenant_id).await?;
        let workload = workload_name(&service.resource_name, &deployment.id);
        let target = Target {
            secret: deployment_secret_name(&workload),
            namespace,
            workload,
            tenant_id: job.tenant_id.clone(),
            service_id: service.id.clone(),
            exposure: service.resource_name.clone(),
            exposure_switched: false,
        };
        *target_slot = Some(target.clone());

        let entries = merge_env(&service_env, &deployment_env);
        let env_secret = if entries.is_empty() {
            None
        } else {
            self.ctx
                .secrets
                .materialize(&target.namespace, &target.secret, &entries)
                .await?;
            Some(target.secret.clone())
        };

        let deployments = &self.ctx.deployments;
        deployments
            .apply_workload(&WorkloadSpec {
                namespace: target.namespace.clone(),
                name: target.workload.clone(),
                tenant_id: job.tenant_id.clone(),
                service_id: service.id.clone(),
                deployment_id: deployment.id.clone(),
                image: deployment.image_ref(),
                port: deployment.port,
                replicas: i32::try_from(deployment.replicas).unwrap_or(i32::MAX),
                resources: deployment.resources.clone(),
                health_check_path: deployment.health_check_path.clone(),
                command: deployment.command.clone(),
                args: deployment.args.clone(),
                env_secret,
                mounts: Vec::new(),
            })
            .await?;
        deployments
            .reconcile_ingress(&IngressSpec {
                namespace: target.namespace.clone(),
                name: service.resource_name.clone(),
                tenant_id: job.tenant_id.clone(),
                service_id: service.id.clone(),
                port: deployment.port,
                platform_host: platform_host.clone(),
                custom_domains: custom_domains.clone(),
            })
            .await?;

        let outcome = deployments
            .wait_for_rollout(&target.namespace, &target.workload, self.ctx.rollout_timeout)
            .await;
        // Pods are gone once cleanup runs, so logs come first.
        let logs = self.capture_logs(&target, &deployment.id).await;

        match outcome {
            RolloutOutcome::Ready => {
                // Traffic moves only once the new pods are ready.
                if let Some(slot) = target_slot.as_mut() {
                    slot.exposure_switched = true;
                }
                deployments
                    .apply_exposure(&target.exposure_spec(&deployment))
                    .await?;
                let superseded =
                    store.activate_deployment(&deployment.id, epoch_secs(), Some(logs))?;
                self.retire(&target.namespace, &service, &superseded).await;

                let url = public_url(&custom_domains, platform_host.as_deref());
                store.update_service_endpoint(&service.id, service.subdomain.clone(), url.clone())?;
                self.sync_autoscaler(&target, &service).await?;

                info!(
                    deployment_id = %deployment.id,
                    service_id = %service.id,
                    url = url.as_deref().unwrap_or("-"),
                    superseded = superseded.len(),
                    "deployment running"
                );
                Ok(DeployOutcome::Running { url })
            }
            failed => {
                let reason = failed
                    .failure_reason()
                    .unwrap_or_else(|| "rollout failed".to_string());
                store.mark_deployment_failed(&deployment.id, format!("{reason}\n\n{logs}"))?;
                self.cleanup(&target).await;
                warn!(deployment_id = %deployment.id, %reason, "deployment failed");
                Ok(DeployOutcome::Failed { reason })
            }
        }
    }

    /// Pod logs, or a pod status dump when logs cannot be read.
    async fn capture_logs(&self, target: &Target, deployment_id: &str) -> String {
        let deployments = &self.ctx.deployments;
        match deployments
            .pod_logs(&target.namespace, deployment_id, None)
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                debug!(%deployment_id, error = %e, "pod logs unavailable, dumping pod status");
                let report = deployments
                    .pod_status(&target.namespace, &target.workload)
                    .await;
                let dump = serde_json::to_string_pretty(&report)
                    .unwrap_or_else(|_| report.status.clone());
                format!("Error fetching logs: {e}\n{dump}\n")
            }
        }
    }

    /// Delete the workloads and secrets of superseded deployments. The
    /// shared exposure stays.
    async fn retire(&self, namespace: &str, service: &Service, superseded: &[Deployment]) {
        for old in superseded {
            let workload = workload_name(&service.resource_name, &old.id);
            if let Err(e) = self.ctx.deployments.delete_workload(namespace, &workload).await {
                warn!(deployment_id = %old.id, %workload, error = %e, "failed to delete superseded workload");
            }
            let secret = deployment_secret_name(&workload);
            if let Err(e) = self.ctx.secrets.delete(namespace, &secret).await {
                warn!(deployment_id = %old.id, %secret, error = %e, "failed to delete superseded secret");
            }
            info!(deployment_id = %old.id, %workload, "superseded deployment stopped");
        }
    }

    /// Best-effort removal of a rollout's workload and env secret.
    async fn cleanup(&self, target: &Target) {
        if let Err(e) = self
            .ctx
            .deployments
            .delete_workload(&target.namespace, &target.workload)
            .await
        {
            warn!(workload = %target.workload, error = %e, "cleanup: failed to delete workload");
        }
        if let Err(e) = self.ctx.secrets.delete(&target.namespace, &target.secret).await {
            warn!(secret = %target.secret, error = %e, "cleanup: failed to delete secret");
        }
    }

    async fn fail_unexpected(&self, deployment_id: &str, target: Option<&Target>, err: &JobError) {
        error!(%deployment_id, error = %err, "deploy failed unexpectedly");
        let mut log = format!("deployment failed: {err}");
        if let Some(target) = target {
            log.push_str("\n\n");
            log.push_str(&self.capture_logs(target, deployment_id).await);
        }
        if let Err(e) = self.ctx.store.mark_deployment_failed(deployment_id, log) {
            error!(%deployment_id, error = %e, "failed to record deployment failure");
        }
        if let Some(target) = target {
            if target.exposure_switched {
                self.restore_exposure(target, deployment_id).await;
            }
            self.cleanup(target).await;
        }
    }

    /// Point the shared exposure back at the service's active deployment,
    /// if one is left.
    async fn restore_exposure(&self, target: &Target, failed_id: &str) {
        let active = match self.ctx.store.list_deployments_for_service(&target.service_id) {
            Ok(all) => all.into_iter().find(|d| d.is_active && d.id != failed_id),
            Err(e) => {
                warn!(service_id = %target.service_id, error = %e, "cannot look up active deployment to restore exposure");
                return;
            }
        };
        let Some(active) = active else {
            return;
        };
        match self
            .ctx
            .deployments
            .apply_exposure(&target.exposure_spec(&active))
            .await
        {
            Ok(()) => info!(deployment_id = %active.id, exposure = %target.exposure, "exposure restored"),
            Err(e) => warn!(deployment_id = %active.id, error = %e, "failed to restore exposure"),
        }
    }

    /// Keep the public-domain system variable in step with the routed hosts.
    fn sync_public_domain_env(&self, service_id: &str, domain: Option<&str>) -> JobResult<()> {
        let store = &self.ctx.store;
        let key = &self.ctx.platform().public_domain_env;
        let existing = store.find_system_env_var(service_id, key)?;
        match (domain, existing) {
            (Some(domain), existing) => {
                let (ciphertext, iv_tag) = self.ctx.secrets.cipher().encrypt(domain)?;
                let id = existing
                    .map(|v| v.id)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                store.put_env_var(&EnvVar {
                    id,
                    service_id: service_id.to_string(),
                    deployment_id: None,
                    key: key.clone(),
                    ciphertext,
                    iv_tag,
                    is_system: true,
                })?;
                debug!(%service_id, %domain, "public domain variable set");
            }
            (None, Some(existing)) => {
                store.delete_env_var(&existing)?;
                debug!(%service_id, "public domain variable removed");
            }
            (None, None) => {}
        }
        Ok(())
    }

    async fn sync_autoscaler(&self, target: &Target, service: &Service) -> JobResult<()> {
        let autoscalers = &self.ctx.autoscalers;
        match &service.autoscaling {
            Some(policy) => {
                autoscalers
                    .upsert(
                        &target.namespace,
                        &AutoscalerSpec {
                            name: service.resource_name.clone(),
                            service_id: service.id.clone(),
                            target_workload: target.workload.clone(),
                            min_replicas: policy.min_replicas,
                            max_replicas: policy.max_replicas,
                            target_cpu_percent: policy.target_cpu_percent,
                            target_memory_percent: policy.target_memory_percent,
                        },
                    )
                    .await?;
            }
            None => {
                autoscalers
                    .delete(&target.namespace, &service.resource_name)
                    .await?;
            }
        }
        Ok(())
    }
}

impl Target {
    fn exposure_spec(&self, deployment: &Deployment) -> ExposureSpec {
        ExposureSpec {
            namespace: self.namespace.clone(),
            name: self.exposure.clone(),
            tenant_id: self.tenant_id.clone(),
            service_id: self.service_id.clone(),
            deployment_id: deployment.id.clone(),
            port: deployment.port,
        }
    }
}

/// Service-scoped entries overlaid by deployment-scoped ones.
fn merge_env(service_env: &[EnvVar], deployment_env: &[EnvVar]) -> Vec<SecretEntry> {
    let mut merged: BTreeMap<&str, &EnvVar> = BTreeMap::new();
    for var in service_env.iter().chain(deployment_env) {
        merged.insert(var.key.as_str(), var);
    }
    merged.into_values().map(SecretEntry::from).collect()
}

/// Custom domains win over the platform subdomain.
fn public_url(custom_domains: &[String], platform_host: Option<&str>) -> Option<String> {
    match (custom_domains.first(), platform_host) {
        (Some(domain), _) => Some(format!("https://{domain}")),
        (None, Some(host)) => Some(format!("http://{host}")),
        (None, None) => None,
    }
}
