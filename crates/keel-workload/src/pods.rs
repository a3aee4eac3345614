//! Pod log collection and pod status summaries.

use keel_cluster::k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use keel_cluster::{ClusterClient, LogRequest};
use keel_rollout::crash_signature;
use serde::Serialize;
use tracing::debug;

/// One container's state, flattened for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerReport {
    pub name: String,
    /// `running`, `waiting`, `terminated` or `unknown`.
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub restart_count: i32,
    pub ready: bool,
}

impl From<&ContainerStatus> for ContainerReport {
    fn from(status: &ContainerStatus) -> Self {
        let state = status.state.as_ref();
        let (label, reason, exit_code) = match state {
            Some(s) if s.running.is_some() => ("running", None, None),
            Some(s) if s.waiting.is_some() => (
                "waiting",
                s.waiting.as_ref().and_then(|w| w.reason.clone()),
                None,
            ),
            Some(s) if s.terminated.is_some() => {
                let t = s.terminated.as_ref();
                (
                    "terminated",
                    t.and_then(|t| t.reason.clone()),
                    t.map(|t| t.exit_code),
                )
            }
            _ => ("unknown", None, None),
        };
        Self {
            name: status.name.clone(),
            state: label.to_string(),
            reason,
            exit_code,
            restart_count: status.restart_count,
            ready: status.ready,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodReport {
    pub name: String,
    pub phase: String,
    pub containers: Vec<ContainerReport>,
}

impl From<&Pod> for PodReport {
    fn from(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            phase: status
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            containers: status
                .and_then(|s| s.container_statuses.as_ref())
                .map(|cs| cs.iter().map(ContainerReport::from).collect())
                .unwrap_or_default(),
        }
    }
}

/// Pod status summary for one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatusReport {
    /// `NO_PODS`, `RUNNING`, `FAILING`, a pod's phase uppercased, or `ERROR`.
    pub status: String,
    pub pod_count: usize,
    pub pods: Vec<PodReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PodStatusReport {
    pub fn from_pods(pods: &[Pod]) -> Self {
        let reports: Vec<PodReport> = pods.iter().map(PodReport::from).collect();
        Self {
            status: classify(pods, &reports),
            pod_count: reports.len(),
            pods: reports,
            error: None,
        }
    }

    pub fn from_error(error: String) -> Self {
        Self {
            status: "ERROR".to_string(),
            pod_count: 0,
            pods: Vec::new(),
            error: Some(error),
        }
    }
}

fn classify(pods: &[Pod], reports: &[PodReport]) -> String {
    if pods.is_empty() {
        return "NO_PODS".to_string();
    }
    if pods.iter().any(|p| crash_signature(p).is_some()) {
        return "FAILING".to_string();
    }
    match reports.iter().find(|r| r.phase != "Running") {
        None => "RUNNING".to_string(),
        Some(report) => report.phase.to_uppercase(),
    }
}

/// `name: waiting (CrashLoopBackOff), restarts 4`
pub fn describe_container(report: &ContainerReport) -> String {
    let mut line = format!("{}: {}", report.name, report.state);
    match (&report.reason, report.exit_code) {
        (Some(reason), Some(code)) => line.push_str(&format!(" ({reason}, exit code {code})")),
        (Some(reason), None) => line.push_str(&format!(" ({reason})")),
        (None, Some(code)) => line.push_str(&format!(" (exit code {code})")),
        (None, None) => {}
    }
    line.push_str(&format!(", restarts {}", report.restart_count));
    line
}

fn pod_header(report: &PodReport) -> String {
    let mut header = format!("=== Pod: {} (phase: {}) ===\n", report.name, report.phase);
    for container in &report.containers {
        header.push_str("  ");
        header.push_str(&describe_container(container));
        header.push('\n');
    }
    header
}

/// Whether a previous container instance may have logs.
fn has_previous_instance(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .is_some_and(|cs| {
            cs.iter().any(|c| {
                c.restart_count > 0
                    || c.last_state.as_ref().is_some_and(|s| s.terminated.is_some())
                    || c.state.as_ref().is_some_and(|s| s.terminated.is_some())
            })
        })
}

/// Logs for one pod, with a status header. Never fails: an error is
/// rendered in place of the log body.
pub(crate) async fn pod_log_block(
    cluster: &dyn ClusterClient,
    namespace: &str,
    pod: &Pod,
    tail: Option<i64>,
) -> String {
    let report = PodReport::from(pod);
    let mut block = pod_header(&report);

    let current = LogRequest {
        tail,
        ..Default::default()
    };
    let result = match cluster.pod_logs(namespace, &report.name, &current).await {
        Ok(logs) => Ok(logs),
        Err(e) if has_previous_instance(pod) => {
            debug!(pod = %report.name, error = %e, "current logs unavailable, trying previous instance");
            let previous = LogRequest {
                previous: true,
                ..current
            };
            cluster
                .pod_logs(namespace, &report.name, &previous)
                .await
                .map(|logs| format!("--- previous container ---\n{logs}"))
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(logs) if logs.is_empty() => block.push_str("(no output)\n"),
        Ok(logs) => {
            block.push_str(&logs);
            if !logs.ends_with('\n') {
                block.push('\n');
            }
        }
        Err(e) => block.push_str(&format!("Error fetching logs: {e}\n")),
    }
    block
}
