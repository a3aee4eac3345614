//! Crash signatures in pod container statuses.

use keel_cluster::k8s_openapi::api::core::v1::{ContainerStatus, Pod};

/// Waiting reasons treated as a clear failure.
pub const CRASH_REASONS: [&str; 4] = [
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "InvalidImageName",
];

/// The failure a container shows, if any.
fn container_signature(status: &ContainerStatus) -> Option<String> {
    let state = status.state.as_ref()?;
    if let Some(reason) = state.waiting.as_ref().and_then(|w| w.reason.as_deref()) {
        if CRASH_REASONS.contains(&reason) {
            return Some(reason.to_string());
        }
    }
    if let Some(terminated) = &state.terminated {
        if terminated.exit_code != 0 {
            return Some(format!("exited with code {}", terminated.exit_code));
        }
    }
    None
}

/// First failure signature among a pod's containers, as `pod/container: reason`.
pub fn crash_signature(pod: &Pod) -> Option<String> {
    let pod_name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
    let status = pod.status.as_ref()?;
    let init = status.init_container_statuses.iter().flatten();
    let main = status.container_statuses.iter().flatten();
    init.chain(main).find_map(|c| {
        container_signature(c).map(|reason| format!("{pod_name}/{}: {reason}", c.name))
    })
}

/// Failure signatures across a set of pods.
pub fn failure_signatures(pods: &[Pod]) -> Vec<String> {
    pods.iter().filter_map(crash_signature).collect()
}
