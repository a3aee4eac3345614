//! End-to-end consumer runs against the in-memory cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_cluster::{ClusterClient, Fault, MemoryCluster, ResourceKind, RolloutMode};
use keel_core::KeelConfig;
use keel_core::names::{
    LABEL_DEPLOYMENT, deployment_secret_name, label_value, service_resource_name,
    tenant_namespace, workload_name,
};
use keel_jobs::{
    DeployConsumer, DeployJob, DeployOutcome, JobContext, JobError, ResolveError,
    TemplateConsumer, TemplateJob,
};
use keel_secrets::SecretCipher;
use keel_state::{
    AutoscalingPolicy, Deployment, DeploymentStatus, Domain, EnvVar, ResourceSizing, Service,
    StateStore, TemplateDefinition, TemplateDeployment, TemplateDeploymentStatus,
};

const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
const TENANT: &str = "acme";

struct Harness {
    cluster: MemoryCluster,
    store: StateStore,
    cipher: Arc<SecretCipher>,
    ctx: Arc<JobContext>,
    namespace: String,
}

fn harness() -> Harness {
    let cluster = MemoryCluster::new();
    let store = StateStore::open_in_memory().unwrap();
    let cipher = Arc::new(SecretCipher::from_hex(KEY).unwrap());
    let mut config = KeelConfig::default();
    config.rollout.interval = "1s".to_string();
    config.rollout.timeout = "30s".to_string();
    let ctx = JobContext::from_config(
        &config,
        Arc::new(cluster.clone()),
        store.clone(),
        cipher.clone(),
    )
    .unwrap();
    Harness {
        cluster,
        store,
        cipher,
        ctx: Arc::new(ctx),
        namespace: tenant_namespace(TENANT),
    }
}

impl Harness {
    fn service(&self, id: &str, subdomain: Option<&str>) -> Service {
        let service = Service {
            id: id.to_string(),
            project_id: "proj".to_string(),
            tenant_id: TENANT.to_string(),
            name: "api".to_string(),
            resource_name: service_resource_name(id),
            subdomain: subdomain.map(str::to_string),
            url: None,
            image: "ghcr.io/acme/api".to_string(),
            port: 8080,
            replicas: 2,
            resources: ResourceSizing::default(),
            health_check_path: Some("/healthz".to_string()),
            autoscaling: None,
            template_deployment_id: None,
            created_at: 1,
            updated_at: 1,
        };
        self.store.put_service(&service).unwrap();
        service
    }

    fn deployment(&self, id: &str, service_id: &str) -> Deployment {
        let deployment = Deployment {
            id: id.to_string(),
            service_id: service_id.to_string(),
            image: "ghcr.io/acme/api".to_string(),
            tag: format!("v-{id}"),
            port: 8080,
            replicas: 2,
            resources: ResourceSizing::default(),
            health_check_path: Some("/healthz".to_string()),
            command: None,
            args: None,
            status: DeploymentStatus::Pending,
            is_active: false,
            deployed_at: None,
            log: None,
            created_at: 1,
            updated_at: 1,
        };
        self.store.put_deployment(&deployment).unwrap();
        deployment
    }

    fn env(&self, service_id: &str, deployment_id: Option<&str>, key: &str, value: &str) {
        let (ciphertext, iv_tag) = self.cipher.encrypt(value).unwrap();
        self.store
            .put_env_var(&EnvVar {
                id: format!("{key}-{}", deployment_id.unwrap_or("svc")),
                service_id: service_id.to_string(),
                deployment_id: deployment_id.map(str::to_string),
                key: key.to_string(),
                ciphertext,
                iv_tag,
                is_system: false,
            })
            .unwrap();
    }

    async fn deploy(&self, deployment_id: &str) -> Result<DeployOutcome, JobError> {
        DeployConsumer::new(self.ctx.clone())
            .run(&DeployJob {
                deployment_id: deployment_id.to_string(),
                project_id: "proj".to_string(),
                tenant_id: TENANT.to_string(),
            })
            .await
    }

    fn active_count(&self, service_id: &str) -> usize {
        self.store
            .list_deployments_for_service(service_id)
            .unwrap()
            .iter()
            .filter(|d| d.is_active)
            .count()
    }

    async fn secret_data(&self, name: &str) -> BTreeMap<String, String> {
        let manifest = self
            .cluster
            .get(ResourceKind::Secret, Some(&self.namespace), name)
            .await
            .unwrap();
        manifest.as_secret().unwrap().string_data.clone().unwrap()
    }

    /// Deployment label the shared exposure currently selects.
    async fn exposure_target(&self, service: &Service) -> String {
        let manifest = self
            .cluster
            .get(ResourceKind::Exposure, Some(&self.namespace), &service.resource_name)
            .await
            .unwrap();
        let exposure = manifest.as_exposure().unwrap();
        let selector = exposure.spec.as_ref().unwrap().selector.clone().unwrap();
        selector[LABEL_DEPLOYMENT].clone()
    }
}

// ── Single-service deploys ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn successful_rollout_supersedes_previous_deployment() {
    let h = harness();
    let service = h.service("svc-one", Some("api"));
    h.deployment("d0-old", &service.id);
    h.deployment("d1-new", &service.id);
    h.env(&service.id, None, "A", "1");
    h.env(&service.id, None, "B", "2");
    h.env(&service.id, Some("d1-new"), "B", "3");

    assert!(matches!(h.deploy("d0-old").await.unwrap(), DeployOutcome::Running { .. }));
    let old_workload = workload_name(&service.resource_name, "d0-old");
    assert!(h.cluster.contains(ResourceKind::Workload, Some(&h.namespace), &old_workload).await);

    let outcome = h.deploy("d1-new").await.unwrap();
    assert_eq!(
        outcome,
        DeployOutcome::Running {
            url: Some("http://api.apps.keel.local".to_string())
        }
    );

    let new = h.store.get_deployment("d1-new").unwrap().unwrap();
    let old = h.store.get_deployment("d0-old").unwrap().unwrap();
    assert_eq!(new.status, DeploymentStatus::Running);
    assert!(new.is_active);
    assert!(new.deployed_at.is_some());
    assert_eq!(old.status, DeploymentStatus::Stopped);
    assert!(!old.is_active);
    assert_eq!(h.active_count(&service.id), 1);

    let new_workload = workload_name(&service.resource_name, "d1-new");
    let ns = Some(h.namespace.as_str());
    assert!(h.cluster.contains(ResourceKind::Workload, ns, &new_workload).await);
    assert!(!h.cluster.contains(ResourceKind::Workload, ns, &old_workload).await);
    assert!(!h.cluster.contains(ResourceKind::Secret, ns, &deployment_secret_name(&old_workload)).await);
    // The exposure is shared across rollouts and survives.
    assert!(h.cluster.contains(ResourceKind::Exposure, ns, &service.resource_name).await);

    let data = h.secret_data(&deployment_secret_name(&new_workload)).await;
    assert_eq!(
        data,
        BTreeMap::from([
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "3".to_string()),
            ("PUBLIC_DOMAIN".to_string(), "api.apps.keel.local".to_string()),
        ])
    );

    let stored = h.store.get_service(&service.id).unwrap().unwrap();
    assert_eq!(stored.url.as_deref(), Some("http://api.apps.keel.local"));
    let public = h
        .store
        .find_system_env_var(&service.id, "PUBLIC_DOMAIN")
        .unwrap()
        .unwrap();
    assert_eq!(
        h.cipher.decrypt(&public.ciphertext, &public.iv_tag).unwrap(),
        "api.apps.keel.local"
    );
    assert!(h.cluster.contains(ResourceKind::Ingress, ns, &service.resource_name).await);
}

#[tokio::test(start_paused = true)]
async fn sequential_deployment_ids_keep_the_new_workload() {
    let h = harness();
    let service = h.service("svc_000001", None);
    h.deployment("dep_000001", &service.id);
    h.deployment("dep_000002", &service.id);

    assert!(matches!(h.deploy("dep_000001").await.unwrap(), DeployOutcome::Running { .. }));
    assert!(matches!(h.deploy("dep_000002").await.unwrap(), DeployOutcome::Running { .. }));

    let ns = Some(h.namespace.as_str());
    let old_workload = workload_name(&service.resource_name, "dep_000001");
    let new_workload = workload_name(&service.resource_name, "dep_000002");
    assert_ne!(old_workload, new_workload);
    assert!(h.cluster.contains(ResourceKind::Workload, ns, &new_workload).await);
    assert!(!h.cluster.contains(ResourceKind::Workload, ns, &old_workload).await);
    assert!(h.cluster.contains(ResourceKind::Secret, ns, &deployment_secret_name(&new_workload)).await);
    assert_eq!(h.active_count(&service.id), 1);
    assert_eq!(h.exposure_target(&service).await, label_value("dep_000002"));
}

#[tokio::test(start_paused = true)]
async fn first_rollout_sees_its_public_domain() {
    let h = harness();
    let service = h.service("svc-domain", Some("shop"));
    h.deployment("d-only", &service.id);

    h.deploy("d-only").await.unwrap();
    let workload = workload_name(&service.resource_name, "d-only");
    let data = h.secret_data(&deployment_secret_name(&workload)).await;
    assert_eq!(data["PUBLIC_DOMAIN"], "shop.apps.keel.local");
}

#[tokio::test(start_paused = true)]
async fn failed_rollout_leaves_traffic_on_the_active_deployment() {
    let h = harness();
    let service = h.service("svc-keep", None);
    h.deployment("d0-good", &service.id);
    h.deployment("d1-bad", &service.id);

    h.deploy("d0-good").await.unwrap();
    assert_eq!(h.exposure_target(&service).await, label_value("d0-good"));

    h.cluster
        .set_workload_rollout(
            &workload_name(&service.resource_name, "d1-bad"),
            RolloutMode::Waiting("CrashLoopBackOff".to_string()),
        )
        .await;
    let outcome = h.deploy("d1-bad").await.unwrap();
    assert!(matches!(outcome, DeployOutcome::Failed { .. }), "{outcome:?}");

    assert_eq!(h.exposure_target(&service).await, label_value("d0-good"));
    let old = h.store.get_deployment("d0-good").unwrap().unwrap();
    assert_eq!(old.status, DeploymentStatus::Running);
    assert!(old.is_active);
    assert!(
        h.cluster
            .contains(
                ResourceKind::Workload,
                Some(&h.namespace),
                &workload_name(&service.resource_name, "d0-good")
            )
            .await
    );
}

#[tokio::test(start_paused = true)]
async fn crash_loop_fails_fast_and_keeps_logs() {
    let h = harness();
    let service = h.service("svc-crash", Some("crash"));
    h.deployment("d-crash", &service.id);
    h.cluster
        .set_rollout_mode(RolloutMode::Waiting("CrashLoopBackOff".to_string()))
        .await;

    let started = tokio::time::Instant::now();
    let outcome = h.deploy("d-crash").await.unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(30));

    let DeployOutcome::Failed { reason } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(reason.contains("CrashLoopBackOff"), "{reason}");

    let stored = h.store.get_deployment("d-crash").unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Failed);
    assert!(!stored.is_active);
    let log = stored.log.unwrap();
    assert!(log.starts_with(&reason));
    assert!(log.contains("panic: missing DATABASE_URL"), "{log}");

    let workload = workload_name(&service.resource_name, "d-crash");
    assert!(!h.cluster.contains(ResourceKind::Workload, Some(&h.namespace), &workload).await);
    assert_eq!(h.active_count(&service.id), 0);
    // A failed rollout never becomes the service URL.
    assert!(h.store.get_service(&service.id).unwrap().unwrap().url.is_none());
}

#[tokio::test(start_paused = true)]
async fn stuck_rollout_times_out() {
    let h = harness();
    let service = h.service("svc-stuck", None);
    h.deployment("d-stuck", &service.id);
    h.cluster.set_rollout_mode(RolloutMode::Stuck).await;

    let outcome = h.deploy("d-stuck").await.unwrap();
    let DeployOutcome::Failed { reason } = outcome else {
        panic!("expected failure");
    };
    assert!(reason.contains("timed out"), "{reason}");
}

#[tokio::test(start_paused = true)]
async fn ingress_follows_verified_domains() {
    let h = harness();
    let service = h.service("svc-dom", None);
    let ns = Some(h.namespace.as_str());

    h.deployment("d-first", &service.id);
    assert_eq!(
        h.deploy("d-first").await.unwrap(),
        DeployOutcome::Running { url: None }
    );
    assert!(!h.cluster.contains(ResourceKind::Ingress, ns, &service.resource_name).await);
    assert!(h.store.find_system_env_var(&service.id, "PUBLIC_DOMAIN").unwrap().is_none());

    h.store
        .put_domain(&Domain {
            id: "dom-1".to_string(),
            service_id: service.id.clone(),
            hostname: "shop.example.com".to_string(),
            verified: true,
        })
        .unwrap();
    h.store
        .put_domain(&Domain {
            id: "dom-2".to_string(),
            service_id: service.id.clone(),
            hostname: "unverified.example.com".to_string(),
            verified: false,
        })
        .unwrap();
    h.deployment("d-second", &service.id);
    assert_eq!(
        h.deploy("d-second").await.unwrap(),
        DeployOutcome::Running {
            url: Some("https://shop.example.com".to_string())
        }
    );

    let ingress = h
        .cluster
        .get(ResourceKind::Ingress, ns, &service.resource_name)
        .await
        .unwrap();
    let ingress = ingress.as_ingress().unwrap();
    let rules = ingress.spec.as_ref().unwrap().rules.clone().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].host.as_deref(), Some("shop.example.com"));
    let annotations = ingress.metadata.annotations.clone().unwrap();
    assert_eq!(
        annotations.get("cert-manager.io/cluster-issuer").map(String::as_str),
        Some("letsencrypt-prod")
    );
}

#[tokio::test(start_paused = true)]
async fn autoscaler_tracks_service_policy() {
    let h = harness();
    let mut service = h.service("svc-scale", None);
    service.autoscaling = Some(AutoscalingPolicy {
        min_replicas: 2,
        max_replicas: 10,
        target_cpu_percent: 75,
        target_memory_percent: None,
    });
    h.store.put_service(&service).unwrap();
    h.deployment("d-scale", &service.id);

    h.deploy("d-scale").await.unwrap();
    let status = h
        .ctx
        .autoscalers
        .status(&h.namespace, &service.resource_name)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.target_workload, workload_name(&service.resource_name, "d-scale"));
    assert_eq!(status.max_replicas, 10);

    service.autoscaling = None;
    h.store.put_service(&service).unwrap();
    h.deployment("d-noscale", &service.id);
    h.deploy("d-noscale").await.unwrap();
    assert!(
        h.ctx
            .autoscalers
            .status(&h.namespace, &service.resource_name)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test(start_paused = true)]
async fn unexpected_error_marks_failed_and_propagates() {
    let h = harness();
    let service = h.service("svc-err", None);
    h.deployment("d-err", &service.id);
    h.cluster.inject_fault(Fault::Write(ResourceKind::Exposure)).await;

    let err = h.deploy("d-err").await.unwrap_err();
    assert!(matches!(err, JobError::Workload(_)), "{err}");

    let stored = h.store.get_deployment("d-err").unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Failed);
    assert!(stored.log.unwrap().starts_with("deployment failed:"));
    let workload = workload_name(&service.resource_name, "d-err");
    assert!(!h.cluster.contains(ResourceKind::Workload, Some(&h.namespace), &workload).await);
}

#[tokio::test(start_paused = true)]
async fn cleanup_failure_does_not_hide_the_failed_status() {
    let h = harness();
    let service = h.service("svc-cleanup", None);
    h.deployment("d-cleanup", &service.id);
    h.cluster.inject_fault(Fault::Write(ResourceKind::Exposure)).await;
    h.cluster.inject_fault(Fault::Delete(ResourceKind::Workload)).await;

    assert!(matches!(h.deploy("d-cleanup").await, Err(JobError::Workload(_))));
    let stored = h.store.get_deployment("d-cleanup").unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Failed);
}

// ── Template deploys ───────────────────────────────────────────────

fn template() -> TemplateDefinition {
    serde_json::from_value(serde_json::json!({
        "id": "tpl-blog",
        "name": "blog",
        "services": [
            {
                "name": "db",
                "image": "postgres:16",
                "port": 5432,
                "volumes": [{"name": "data", "mount_path": "/var/lib/postgresql/data", "size": "5Gi"}],
                "env": {
                    "POSTGRES_USER": "blog",
                    "POSTGRES_PASSWORD": {"generate": "secret"},
                    "POSTGRES_DB": "blog"
                }
            },
            {
                "name": "web",
                "image": "ghost:5",
                "port": 2368,
                "public": true,
                "env": {
                    "DATABASE_URL": {"ref": {"service": "db", "property": "connection_url"}},
                    "DB_PASSWORD": {"ref": {"service": "db", "property": "env.POSTGRES_PASSWORD"}},
                    "ADMIN_EMAIL": {"input": {"key": "admin_email"}}
                }
            }
        ]
    }))
    .unwrap()
}

fn template_job(inputs: &[(&str, &str)]) -> TemplateJob {
    TemplateJob {
        template_deployment_id: "td-1".to_string(),
        template_id: "tpl-blog".to_string(),
        project_id: "proj".to_string(),
        tenant_id: TENANT.to_string(),
        inputs: inputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn seed_template(h: &Harness) {
    h.store.put_template(&template()).unwrap();
    h.store
        .put_template_deployment(&TemplateDeployment {
            id: "td-1".to_string(),
            template_id: "tpl-blog".to_string(),
            project_id: "proj".to_string(),
            tenant_id: TENANT.to_string(),
            status: TemplateDeploymentStatus::Pending,
            message: None,
            created_at: 1,
            updated_at: 1,
        })
        .unwrap();
}

#[tokio::test]
async fn template_deploys_every_service_without_waiting() {
    let h = harness();
    seed_template(&h);
    // Pods never become ready; the template path does not wait.
    h.cluster.set_rollout_mode(RolloutMode::Stuck).await;

    let outcome = TemplateConsumer::new(h.ctx.clone())
        .run(&template_job(&[("web.admin_email", "me@acme.dev")]))
        .await
        .unwrap();
    assert_eq!(outcome.deployed, vec!["db", "web"]);
    assert!(outcome.skipped.is_empty());

    let batch = h.store.get_template_deployment("td-1").unwrap().unwrap();
    assert_eq!(batch.status, TemplateDeploymentStatus::Deployed);

    let db = h.store.get_service(&outcome.services["db"]).unwrap().unwrap();
    let web = h.store.get_service(&outcome.services["web"]).unwrap().unwrap();
    for service in [&db, &web] {
        let deployments = h.store.list_deployments_for_service(&service.id).unwrap();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].status, DeploymentStatus::Running);
        assert!(deployments[0].is_active);
    }

    // Generated password is shared between db and the web reference.
    let db_deployment = &h.store.list_deployments_for_service(&db.id).unwrap()[0];
    let web_deployment = &h.store.list_deployments_for_service(&web.id).unwrap()[0];
    let db_env = h
        .secret_data(&deployment_secret_name(&workload_name(&db.resource_name, &db_deployment.id)))
        .await;
    let web_env = h
        .secret_data(&deployment_secret_name(&workload_name(&web.resource_name, &web_deployment.id)))
        .await;
    let password = &db_env["POSTGRES_PASSWORD"];
    assert_eq!(&web_env["DB_PASSWORD"], password);
    assert_eq!(
        web_env["DATABASE_URL"],
        format!("postgresql://blog:{password}@{}:5432/blog", db.resource_name)
    );
    assert_eq!(web_env["ADMIN_EMAIL"], "me@acme.dev");

    // Stored env is encrypted and reference edges point at db.
    let stored = h.store.list_service_env_vars(&web.id).unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|v| !v.ciphertext.contains(password.as_str())));
    let references = h.store.list_env_references(&web.id).unwrap();
    assert_eq!(references.len(), 2);
    assert!(references.iter().all(|r| r.referenced_service_id == db.id));

    let volume = h.store.find_volume(&db.id, "data").unwrap().unwrap();
    assert!(volume.bound);
    assert!(
        h.cluster
            .contains(ResourceKind::VolumeClaim, Some(&h.namespace), &volume.claim_name)
            .await
    );

    assert_eq!(web.subdomain.as_deref(), Some(web.resource_name.as_str()));
    assert_eq!(
        web.url,
        Some(format!("http://{}.apps.keel.local", web.resource_name))
    );
    assert!(
        h.cluster
            .contains(ResourceKind::Ingress, Some(&h.namespace), &web.resource_name)
            .await
    );
    assert!(
        !h.cluster
            .contains(ResourceKind::Ingress, Some(&h.namespace), &db.resource_name)
            .await
    );
}

#[tokio::test]
async fn template_rerun_reuses_services() {
    let h = harness();
    seed_template(&h);
    let job = template_job(&[("web.admin_email", "me@acme.dev")]);
    let consumer = TemplateConsumer::new(h.ctx.clone());

    let first = consumer.run(&job).await.unwrap();
    let second = consumer.run(&job).await.unwrap();

    assert_eq!(first.services, second.services);
    assert_eq!(h.store.list_template_services("td-1").unwrap().len(), 2);
    assert!(second.deployed.is_empty());
    assert_eq!(second.skipped, vec!["db", "web"]);
    for id in second.services.values() {
        assert_eq!(h.store.list_deployments_for_service(id).unwrap().len(), 1);
        assert_eq!(h.active_count(id), 1);
    }
}

#[tokio::test]
async fn missing_input_fails_the_batch() {
    let h = harness();
    seed_template(&h);

    let err = TemplateConsumer::new(h.ctx.clone())
        .run(&template_job(&[]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JobError::Resolve(ResolveError::MissingInput { ref key }) if key == "web.admin_email"
    ));

    let batch = h.store.get_template_deployment("td-1").unwrap().unwrap();
    assert_eq!(batch.status, TemplateDeploymentStatus::Failed);
    assert!(batch.message.unwrap().contains("web.admin_email"));

    // db was deployed before web failed; a retry with the input skips it.
    let retry = TemplateConsumer::new(h.ctx.clone())
        .run(&template_job(&[("web.admin_email", "me@acme.dev")]))
        .await
        .unwrap();
    assert_eq!(retry.skipped, vec!["db"]);
    assert_eq!(retry.deployed, vec!["web"]);
    assert_eq!(h.store.list_template_services("td-1").unwrap().len(), 2);

    // The retry reuses db's persisted password instead of minting a new one.
    let db_password = h
        .store
        .list_service_env_vars(&retry.services["db"])
        .unwrap()
        .into_iter()
        .find(|v| v.key == "POSTGRES_PASSWORD")
        .unwrap();
    let web_password = h
        .store
        .list_service_env_vars(&retry.services["web"])
        .unwrap()
        .into_iter()
        .find(|v| v.key == "DB_PASSWORD")
        .unwrap();
    assert_eq!(
        h.cipher.decrypt(&db_password.ciphertext, &db_password.iv_tag).unwrap(),
        h.cipher.decrypt(&web_password.ciphertext, &web_password.iv_tag).unwrap()
    );
}

#[tokio::test]
async fn template_retry_redeploys_a_service_whose_manifests_failed() {
    let h = harness();
    seed_template(&h);
    let job = template_job(&[("web.admin_email", "me@acme.dev")]);
    let consumer = TemplateConsumer::new(h.ctx.clone());

    h.cluster.inject_fault(Fault::Write(ResourceKind::Exposure)).await;
    let err = consumer.run(&job).await.unwrap_err();
    assert!(matches!(err, JobError::Workload(_)), "{err}");

    let services = h.store.list_template_services("td-1").unwrap();
    let db = services.iter().find(|s| s.name == "db").unwrap().clone();
    let attempts = h.store.list_deployments_for_service(&db.id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, DeploymentStatus::Failed);
    assert!(attempts[0].log.as_deref().unwrap().starts_with("deployment failed:"));
    assert!(!h.store.has_live_deployment(&db.id).unwrap());
    let ns = Some(h.namespace.as_str());
    let failed_workload = workload_name(&db.resource_name, &attempts[0].id);
    assert!(!h.cluster.contains(ResourceKind::Workload, ns, &failed_workload).await);

    h.cluster.clear_fault(&Fault::Write(ResourceKind::Exposure)).await;
    let retry = consumer.run(&job).await.unwrap();
    assert_eq!(retry.services["db"], db.id);
    assert_eq!(retry.deployed, vec!["db", "web"]);
    assert!(retry.skipped.is_empty());

    let batch = h.store.get_template_deployment("td-1").unwrap().unwrap();
    assert_eq!(batch.status, TemplateDeploymentStatus::Deployed);

    let running: Vec<Deployment> = h
        .store
        .list_deployments_for_service(&db.id)
        .unwrap()
        .into_iter()
        .filter(|d| d.is_active)
        .collect();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].status, DeploymentStatus::Running);
    assert!(h.cluster.contains(ResourceKind::Exposure, ns, &db.resource_name).await);
    assert_eq!(h.exposure_target(&db).await, label_value(&running[0].id));
}
