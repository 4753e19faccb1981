//! Deployment controller: per-robot reconcile step driving a
//! [`DeploymentJob`] through the phase machine in spec §4.5, plus the
//! deployment-level aggregation in [`Deployment::recompute_status`].
//!
//! There is no resident reconcile loop per deployment (spec §5) — `tick`
//! recomputes the scheduling plan from the manifest and current fleet
//! snapshot on every call and diffs it against observed pod/service state.
//! That keeps each tick idempotent and safe to run from any worker in the
//! pool.

use std::collections::BTreeMap;

use chrono::Utc;

use kuberos_k8s_util::{KubernetesExecutor, OpResult};
use kuberos_model::batchjob::random_slug;
use kuberos_model::cluster::ClusterNode;
use kuberos_model::deployment::{Deployment, DeploymentJob, DeploymentJobPhase, PodPhaseTag, ServiceStatusEntry};
use kuberos_model::fleet::{Fleet, FleetNode};
use kuberos_model::manifest::DeploymentManifest;
use kuberos_scheduler::app_scheduler::{schedule, RobotPlacement, SchedulingInput};

use crate::error::{Error, Result};
use crate::metrics::TickMetrics;
use crate::store::Store;
use crate::taskqueue::{interval, Action};

/// Creates the deployment's shared ConfigMaps once. On any rejection or
/// transport failure the ConfigMaps already created this call are rolled
/// back so a retried tick starts from a clean slate (spec §4.5).
pub async fn ensure_configmaps(
    executor: &KubernetesExecutor,
    namespace: &str,
    deployment: &mut Deployment,
    configmaps: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<()> {
    if deployment.configmaps_created {
        return Ok(());
    }
    let mut created = Vec::new();
    for (name, data) in configmaps {
        match executor.create_configmap(namespace, name, data.clone()).await {
            OpResult::Success(_) => created.push(name.clone()),
            OpResult::Rejected { message, .. } => {
                rollback(executor, namespace, &created).await;
                return Err(Error::Rejected(namespace.to_string(), message));
            }
            OpResult::Failed(e) => {
                rollback(executor, namespace, &created).await;
                return Err(Error::K8s(e));
            }
        }
    }
    deployment.config_maps = created;
    deployment.configmaps_created = true;
    Ok(())
}

async fn rollback(executor: &KubernetesExecutor, namespace: &str, names: &[String]) {
    for name in names {
        let _ = executor.delete_configmap(namespace, name).await;
    }
}

/// `pending -> disc_server_in_progress` (spec §4.5 edge 1): emit the
/// robot's discovery server pod and service.
pub async fn start_job(executor: &KubernetesExecutor, namespace: &str, job: &mut DeploymentJob, placement: &RobotPlacement) -> Result<()> {
    let disc = &placement.discovery_server;
    match executor.create_pod(namespace, disc.pod.clone()).await {
        OpResult::Success(_) => {}
        OpResult::Rejected { message, .. } => return Err(Error::Rejected(namespace.to_string(), message)),
        OpResult::Failed(e) => return Err(Error::K8s(e)),
    }
    match executor.create_service(namespace, disc.service.clone()).await {
        OpResult::Success(_) => {}
        OpResult::Rejected { message, .. } => return Err(Error::Rejected(namespace.to_string(), message)),
        OpResult::Failed(e) => return Err(Error::K8s(e)),
    }
    job.discovery_server_pod_name = disc.pod_name.clone();
    job.discovery_server_service_name = disc.service_name.clone();
    job.phase = DeploymentJobPhase::DiscServerInProgress;
    Ok(())
}

/// `disc_server_success -> rosmodule_in_progress` (spec §4.5 edge 2): emit
/// every onboard/edge/cloud module pod for the robot.
async fn emit_rosmodules(executor: &KubernetesExecutor, namespace: &str, job: &mut DeploymentJob, placement: &RobotPlacement) -> Result<()> {
    for pod in &placement.onboard_pods {
        let name = pod.metadata.name.clone().unwrap_or_default();
        create_pod_or_fail(executor, namespace, pod.clone()).await?;
        job.onboard_module_pod_names.push(name);
    }
    for pod in &placement.edge_pods {
        let name = pod.metadata.name.clone().unwrap_or_default();
        create_pod_or_fail(executor, namespace, pod.clone()).await?;
        job.edge_module_pod_names.push(name);
    }
    job.phase = DeploymentJobPhase::RosmoduleInProgress;
    Ok(())
}

async fn create_pod_or_fail(executor: &KubernetesExecutor, namespace: &str, pod: k8s_openapi::api::core::v1::Pod) -> Result<()> {
    match executor.create_pod(namespace, pod).await {
        OpResult::Success(_) => Ok(()),
        OpResult::Rejected { message, .. } => Err(Error::Rejected(namespace.to_string(), message)),
        OpResult::Failed(e) => Err(Error::K8s(e)),
    }
}

/// Marks the job for termination; the next tick carries out
/// [`start_delete`] regardless of which phase the job was in (spec §4.5:
/// "any state forceable via delete request").
pub fn request_delete(job: &mut DeploymentJob) {
    job.phase = DeploymentJobPhase::RequestForDelete;
}

/// `request_for_delete -> delete_in_progress`.
pub async fn start_delete(executor: &KubernetesExecutor, namespace: &str, job: &mut DeploymentJob) -> Result<()> {
    for name in job.all_module_pod_names().cloned().collect::<Vec<_>>() {
        let _ = executor.delete_pod(namespace, &name).await;
    }
    if !job.discovery_server_pod_name.is_empty() {
        let _ = executor.delete_pod(namespace, &job.discovery_server_pod_name).await;
    }
    if !job.discovery_server_service_name.is_empty() {
        let _ = executor.delete_service(namespace, &job.discovery_server_service_name).await;
    }
    job.phase = DeploymentJobPhase::DeleteInProgress;
    Ok(())
}

/// Re-reads every pod/service this job owns and advances its phase per the
/// numbered rules in spec §4.5.
async fn reconcile_job(executor: &KubernetesExecutor, namespace: &str, job: &mut DeploymentJob, placement: &RobotPlacement) -> Result<()> {
    refresh_pod_statuses(executor, namespace, job, placement).await?;
    refresh_service_statuses(executor, namespace, job, placement).await?;

    match job.phase {
        DeploymentJobPhase::DiscServerInProgress => {
            let disc_phase = job
                .pod_statuses
                .iter()
                .find(|(n, _)| n == &job.discovery_server_pod_name)
                .map(|(_, p)| *p);
            match disc_phase {
                Some(PodPhaseTag::Running) | Some(PodPhaseTag::Succeeded) => {
                    job.phase = DeploymentJobPhase::DiscServerSuccess;
                    emit_rosmodules(executor, namespace, job, placement).await?;
                }
                Some(PodPhaseTag::Failed) => job.phase = DeploymentJobPhase::DiscServerFailed,
                _ => {}
            }
        }
        DeploymentJobPhase::RosmoduleInProgress => {
            let names: Vec<String> = job.all_module_pod_names().cloned().collect();
            let statuses: Vec<PodPhaseTag> = names
                .iter()
                .filter_map(|n| job.pod_statuses.iter().find(|(pn, _)| pn == n).map(|(_, p)| *p))
                .collect();
            if statuses.iter().any(|p| *p == PodPhaseTag::Failed) {
                job.phase = DeploymentJobPhase::DeployFailed;
            } else if !statuses.is_empty() && statuses.iter().all(|p| matches!(p, PodPhaseTag::Running | PodPhaseTag::Succeeded)) {
                job.phase = DeploymentJobPhase::DeploySuccess;
                job.running_at = Some(Utc::now());
            }
        }
        DeploymentJobPhase::DeleteInProgress => {
            if job.pod_statuses.iter().all(|(_, p)| *p == PodPhaseTag::NotFound) {
                job.not_found_streak += 1;
                if job.not_found_streak >= 2 {
                    job.phase = DeploymentJobPhase::DeleteSuccess;
                }
            } else {
                job.not_found_streak = 0;
                for (name, phase) in job.pod_statuses.clone() {
                    if phase != PodPhaseTag::NotFound {
                        let _ = executor.delete_pod(namespace, &name).await;
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

async fn refresh_pod_statuses(executor: &KubernetesExecutor, namespace: &str, job: &mut DeploymentJob, placement: &RobotPlacement) -> Result<()> {
    let mut names = vec![placement.discovery_server.pod_name.clone()];
    names.extend(job.all_module_pod_names().cloned());
    names.sort();
    names.dedup();

    let mut statuses = Vec::with_capacity(names.len());
    for name in names {
        let view = match executor.read_pod(namespace, &name).await {
            OpResult::Success(v) => v,
            OpResult::Rejected { message, .. } => return Err(Error::Rejected(namespace.to_string(), message)),
            OpResult::Failed(e) => return Err(Error::K8s(e)),
        };
        statuses.push((name, PodPhaseTag::from(&view.phase)));
    }
    job.pod_statuses = statuses;
    Ok(())
}

async fn refresh_service_statuses(executor: &KubernetesExecutor, namespace: &str, job: &mut DeploymentJob, placement: &RobotPlacement) -> Result<()> {
    let view = match executor.read_service(namespace, &placement.discovery_server.service_name).await {
        OpResult::Success(v) => v,
        OpResult::Rejected { message, .. } => return Err(Error::Rejected(namespace.to_string(), message)),
        OpResult::Failed(e) => return Err(Error::K8s(e)),
    };
    job.service_statuses = vec![ServiceStatusEntry {
        service_name: placement.discovery_server.service_name.clone(),
        found: view.found,
    }];
    Ok(())
}

/// One tick over every job in `deployment_name`: recomputes the scheduling
/// plan, advances each job's phase, aggregates the deployment-level status
/// and persists the result. Returns `Action::Done` once every job reached
/// a terminal phase.
#[allow(clippy::too_many_arguments)]
pub async fn tick(
    store: &Store,
    executor: &KubernetesExecutor,
    namespace: &str,
    metrics: &TickMetrics,
    deployment_name: &str,
    fleet: &Fleet,
    fleet_nodes: &[FleetNode],
    cluster_nodes: &[ClusterNode],
    device_params: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<Action> {
    let _measurer = metrics.count_and_measure("deployment_tick");

    let Some(mut deployment) = store.get_deployment(deployment_name).await else {
        return Ok(Action::Done);
    };
    if !deployment.active {
        return Ok(Action::Done);
    }

    let manifest: &DeploymentManifest = &deployment.manifest;
    let input = SchedulingInput {
        manifest,
        fleet,
        fleet_nodes,
        cluster_nodes,
        device_params,
    };
    let plan = schedule(&input)?;

    ensure_configmaps(executor, namespace, &mut deployment, &plan.configmaps).await?;

    for job in &mut deployment.jobs {
        let Some(placement) = plan.robots.iter().find(|r| r.robot_name == job.robot_name) else {
            continue;
        };
        let outcome = match job.phase {
            DeploymentJobPhase::Pending => start_job(executor, namespace, job, placement).await,
            DeploymentJobPhase::RequestForDelete => start_delete(executor, namespace, job).await,
            phase if !phase.is_terminal() => reconcile_job(executor, namespace, job, placement).await,
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            metrics.set_failure("deployment_tick", &e);
            return Err(e);
        }
    }

    deployment.recompute_status(random_slug);
    let all_terminal = deployment.jobs.iter().all(|j| j.phase.is_terminal());

    let snapshot = deployment.clone();
    store.update_deployment(deployment_name, |d| *d = snapshot).await;

    Ok(if all_terminal {
        Action::Done
    } else {
        Action::Requeue(interval::JOB_TRANSITION)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuberos_model::deployment::DeploymentJobPhase;

    #[test]
    fn request_delete_overrides_any_phase() {
        let mut job = DeploymentJob::new("robot-1");
        job.phase = DeploymentJobPhase::RosmoduleInProgress;
        request_delete(&mut job);
        assert_eq!(job.phase, DeploymentJobPhase::RequestForDelete);
    }
}
