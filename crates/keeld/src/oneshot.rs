//! Single operations run from the command line.

use std::sync::Arc;

use keel_cluster::ClusterClient;
use keel_jobs::{DeployConsumer, DeployJob, DeployOutcome, JobContext};
use keel_workload::NamespaceManager;
use tracing::info;

pub async fn deploy(
    ctx: Arc<JobContext>,
    deployment_id: String,
    project_id: String,
    tenant_id: String,
) -> anyhow::Result<()> {
    let job = DeployJob {
        deployment_id,
        project_id,
        tenant_id,
    };
    match DeployConsumer::new(ctx).run(&job).await? {
        DeployOutcome::Running { url } => {
            info!(deployment_id = %job.deployment_id, url = url.as_deref().unwrap_or("-"), "deployment running");
            Ok(())
        }
        DeployOutcome::Failed { reason } => {
            anyhow::bail!("deployment {} failed: {reason}", job.deployment_id)
        }
    }
}

pub async fn teardown(cluster: Arc<dyn ClusterClient>, tenant_id: &str) -> anyhow::Result<()> {
    let deleted = NamespaceManager::new(cluster).teardown(tenant_id).await?;
    info!(%tenant_id, deleted, "tenant torn down");
    Ok(())
}
