//! Batch-job controller: the `BatchJobDeployment` workflow tick and the
//! per-`KuberosJob` lifecycle (spec §4.6). Grounded on
//! `main/tasks/batch_job_controller.py`'s polling loop, reworked into a
//! single idempotent tick per spec §5.

use std::collections::BTreeMap;

use chrono::Utc;

use k8s_openapi::api::core::v1::{Pod, Service};

use kuberos_k8s_util::{KubernetesExecutor, OpResult, PodFile};
use kuberos_model::batchjob::{BatchJobDeployment, BatchJobDeploymentStatus, BatchJobGroup, KuberosJob, KuberosJobStatus};
use kuberos_model::deployment::PodPhaseTag;
use kuberos_model::manifest::RosParamType;
use kuberos_scheduler::batch_scheduler::{create_jobs_for_group, expand_groups, materialize_group_configmaps, place_pending_jobs, NodeAllocability, VolumeConfig};
use kuberos_scheduler::pod_builder::{discovery_server_pod, discovery_server_service, module_pod, ModuleNodeTarget, ModulePodPlan, ParamAttachment};

use crate::error::{Error, Result};
use crate::metrics::TickMetrics;
use crate::store::Store;
use crate::taskqueue::{interval, Action};

async fn create_pod_or_fail(executor: &KubernetesExecutor, namespace: &str, pod: Pod) -> Result<()> {
    match executor.create_pod(namespace, pod).await {
        OpResult::Success(_) => Ok(()),
        OpResult::Rejected { message, .. } => Err(Error::Rejected(namespace.to_string(), message)),
        OpResult::Failed(e) => Err(Error::K8s(e)),
    }
}

async fn create_service_or_fail(executor: &KubernetesExecutor, namespace: &str, service: Service) -> Result<()> {
    match executor.create_service(namespace, service).await {
        OpResult::Success(_) => Ok(()),
        OpResult::Rejected { message, .. } => Err(Error::Rejected(namespace.to_string(), message)),
        OpResult::Failed(e) => Err(Error::K8s(e)),
    }
}

/// One workflow tick over a batch deployment: advances the group-level
/// state machine (`PENDING -> EXECUTING -> WAITING_FOR_FINISHING ->
/// CLEANING -> COMPLETED`) and every in-flight job's own lifecycle.
pub async fn tick(
    store: &Store,
    executor: &KubernetesExecutor,
    namespace: &str,
    metrics: &TickMetrics,
    name: &str,
    nodes_by_cluster: &BTreeMap<String, Vec<NodeAllocability>>,
    volume: &VolumeConfig,
) -> Result<Action> {
    let _measurer = metrics.count_and_measure("batch_tick");

    let Some(mut bjd) = store.get_batch_deployment(name).await else {
        return Ok(Action::Done);
    };

    let outcome = run_workflow_step(executor, namespace, &mut bjd, nodes_by_cluster, volume).await;
    if let Err(e) = &outcome {
        metrics.set_failure("batch_tick", e);
    }
    outcome?;

    for group in &mut bjd.groups {
        for job in &mut group.jobs {
            advance_job(executor, namespace, job, group).await?;
        }
    }

    let done = matches!(bjd.status, BatchJobDeploymentStatus::Completed | BatchJobDeploymentStatus::Failed);
    let snapshot = bjd.clone();
    store.update_batch_deployment(name, |d| *d = snapshot).await;

    Ok(if done { Action::Done } else { Action::Requeue(interval::BATCH_TICK) })
}

async fn run_workflow_step(
    executor: &KubernetesExecutor,
    namespace: &str,
    bjd: &mut BatchJobDeployment,
    nodes_by_cluster: &BTreeMap<String, Vec<NodeAllocability>>,
    volume: &VolumeConfig,
) -> Result<()> {
    match bjd.status {
        BatchJobDeploymentStatus::Pending => {
            let groups = expand_groups(&bjd.manifest, &bjd.exec_clusters)?;
            bjd.groups = groups;
            for group in &mut bjd.groups {
                materialize_group_configmaps(group)?;
                create_jobs_for_group(group, bjd.startup_timeout_secs, bjd.running_timeout_secs);
            }
            bjd.status = BatchJobDeploymentStatus::Executing;
            Ok(())
        }
        BatchJobDeploymentStatus::Executing => {
            if bjd.pending_job_count() > 0 {
                schedule_pending(executor, namespace, bjd, nodes_by_cluster, volume).await
            } else {
                bjd.status = BatchJobDeploymentStatus::WaitingForFinishing;
                bjd.scheduling_done_at = Some(Utc::now());
                Ok(())
            }
        }
        BatchJobDeploymentStatus::WaitingForFinishing => {
            let overdue = bjd
                .scheduling_done_at
                .map(|t| Utc::now().signed_duration_since(t).num_seconds() as u64 > bjd.startup_timeout_secs + bjd.running_timeout_secs)
                .unwrap_or(false);
            if bjd.in_flight_job_count() == 0 || overdue {
                bjd.status = BatchJobDeploymentStatus::Cleaning;
            }
            Ok(())
        }
        BatchJobDeploymentStatus::Cleaning => {
            cleanup(executor, namespace, bjd).await?;
            bjd.status = BatchJobDeploymentStatus::Completed;
            bjd.completed_at = Some(Utc::now());
            Ok(())
        }
        BatchJobDeploymentStatus::Stopped | BatchJobDeploymentStatus::Completed | BatchJobDeploymentStatus::Failed => Ok(()),
    }
}

/// For each group bound to a synced cluster, pops pending jobs onto the
/// allocatable nodes and records the placement on the job record. Actual
/// pod/service creation happens in the `Prepared -> Deploying` job-level
/// edge, once the job has had a tick to settle (spec §4.6).
async fn schedule_pending(
    executor: &KubernetesExecutor,
    namespace: &str,
    bjd: &mut BatchJobDeployment,
    nodes_by_cluster: &BTreeMap<String, Vec<NodeAllocability>>,
    volume: &VolumeConfig,
) -> Result<()> {
    let _ = executor.ensure_namespace(namespace).await;

    for group in &mut bjd.groups {
        let Some(nodes) = nodes_by_cluster.get(&group.exec_cluster) else {
            continue;
        };
        let job_spec = group
            .rendered_manifest
            .job_spec
            .as_ref()
            .ok_or_else(|| Error::NotFound("jobSpec".to_string()))?;
        let request = job_spec.resources.cpu_request_millis;
        let optimal = job_spec.resources.cpu_optimal_millis;
        let num_pro_node = job_spec.num_pro_node;

        let placements = place_pending_jobs(group, nodes, request, optimal, num_pro_node, volume);
        for placement in placements {
            let job = &mut group.jobs[placement.job_index];
            job.target_node = Some(placement.target_node);
            job.discovery_server_pod_name = placement.discovery_pod_name;
            job.discovery_server_service_name = placement.discovery_service_name;
            job.lifecycle_module_pod_name = placement.module_pod_names.first().cloned().unwrap_or_default();
            job.module_pod_names = placement.module_pod_names;
            job.volume = Some(placement.volume);
            job.status = KuberosJobStatus::Scheduled;
        }
    }
    Ok(())
}

async fn advance_job(executor: &KubernetesExecutor, namespace: &str, job: &mut KuberosJob, group: &BatchJobGroup) -> Result<()> {
    let now = Utc::now();
    match job.status {
        KuberosJobStatus::Pending | KuberosJobStatus::Completed => {}
        KuberosJobStatus::Scheduled => job.status = KuberosJobStatus::Preparing,
        // configmaps are materialised once at the group level; nothing
        // per-job to prepare beyond waiting a tick for consistency.
        KuberosJobStatus::Preparing => job.status = KuberosJobStatus::Prepared,
        KuberosJobStatus::Prepared => {
            deploy_job(executor, namespace, job, group).await?;
            job.status = KuberosJobStatus::Deploying;
            job.scheduled_at = Some(now);
        }
        KuberosJobStatus::Deploying => {
            refresh_job_pods(executor, namespace, job).await?;
            if job.startup_expired(now) {
                job.status = KuberosJobStatus::Finished;
                job.success_completed = Some(false);
            } else if !job.pod_statuses.is_empty() && job.pod_statuses.iter().all(|(_, p)| *p == PodPhaseTag::Running) {
                job.status = KuberosJobStatus::Running;
                job.running_at = Some(now);
            }
        }
        KuberosJobStatus::Running => {
            refresh_job_pods(executor, namespace, job).await?;
            let lifecycle_phase = job
                .pod_statuses
                .iter()
                .find(|(n, _)| n == &job.lifecycle_module_pod_name)
                .map(|(_, p)| *p);
            let any_failed = job.pod_statuses.iter().any(|(_, p)| *p == PodPhaseTag::Failed);
            if any_failed {
                job.status = KuberosJobStatus::Finished;
                job.success_completed = Some(false);
            } else if lifecycle_phase == Some(PodPhaseTag::Succeeded) {
                job.status = KuberosJobStatus::Finished;
                job.success_completed = Some(true);
            } else if job.running_expired(now) {
                job.status = KuberosJobStatus::Finished;
                job.success_completed = Some(false);
            }
        }
        KuberosJobStatus::Finished => {
            if group.rendered_manifest.job_spec.as_ref().map(|s| s.save_logs_in_volume).unwrap_or(false) {
                save_job_logs(executor, namespace, job).await?;
            }
            terminate_job(executor, namespace, job).await?;
            job.status = KuberosJobStatus::Terminating;
        }
        KuberosJobStatus::Terminating => {
            refresh_job_pods(executor, namespace, job).await?;
            if job.pod_statuses.iter().all(|(_, p)| *p == PodPhaseTag::NotFound) {
                job.status = KuberosJobStatus::Completed;
            }
        }
    }
    Ok(())
}

async fn deploy_job(executor: &KubernetesExecutor, namespace: &str, job: &mut KuberosJob, group: &BatchJobGroup) -> Result<()> {
    let target = job
        .target_node
        .clone()
        .ok_or_else(|| Error::NotFound(format!("job {} has no target node", job.slug)))?;

    let disc_pod = discovery_server_pod(&job.discovery_server_pod_name, &job.discovery_server_service_name, &target, None);
    let disc_svc = discovery_server_service(&job.discovery_server_service_name);
    create_pod_or_fail(executor, namespace, disc_pod).await?;
    create_service_or_fail(executor, namespace, disc_svc).await?;

    let module = group
        .rendered_manifest
        .ros_modules
        .iter()
        .find(|m| m.name == group.lifecycle_module.name)
        .ok_or_else(|| Error::NotFound(format!("lifecycle module {} missing from manifest", group.lifecycle_module.name)))?;

    let mut attachments = Vec::new();
    for req in &module.required_rosparams {
        let map_entry = group
            .rendered_manifest
            .ros_param_map_entry(&req.value_from)
            .ok_or_else(|| Error::NotFound(format!("rosParamMap entry {} not found", req.value_from)))?;
        let prefixed_name = group.configmap_name(&map_entry.name);
        match req.param_type {
            RosParamType::Yaml => {
                let mount_path = req.mount_path.clone().unwrap_or_else(|| format!("/config/{}", map_entry.name));
                attachments.push(ParamAttachment::YamlVolume {
                    configmap_name: prefixed_name,
                    mount_path,
                });
            }
            RosParamType::KeyValue => {
                for key in map_entry.data.keys() {
                    let env_name = format!(
                        "{}_{}",
                        map_entry.name.to_uppercase().replace('-', "_"),
                        key.to_uppercase().replace('-', "_")
                    );
                    attachments.push(ParamAttachment::KeyValueEnv {
                        configmap_name: prefixed_name.clone(),
                        key: key.clone(),
                        env_name,
                        launch_arg: None,
                    });
                }
            }
        }
    }

    let registry = group.rendered_manifest.registry_entry_for(module);
    let plan = ModulePodPlan {
        pod_name: job.lifecycle_module_pod_name.clone(),
        module,
        discovery_service_name: &job.discovery_server_service_name,
        target: ModuleNodeTarget::Hostname(&target),
        registry,
        attachments,
        device_launch_args: Vec::new(),
    };
    let pod = module_pod(&plan);
    create_pod_or_fail(executor, namespace, pod).await
}

async fn refresh_job_pods(executor: &KubernetesExecutor, namespace: &str, job: &mut KuberosJob) -> Result<()> {
    let mut names = vec![job.discovery_server_pod_name.clone()];
    names.extend(job.module_pod_names.clone());
    names.sort();
    names.dedup();

    let mut statuses = Vec::with_capacity(names.len());
    for name in names {
        if name.is_empty() {
            continue;
        }
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

/// Writes a snapshot of the job's ConfigMaps and a one-line status log
/// into the job's mounted volume before it is torn down, when
/// `saveLogsInVolume` is set (spec §4.6).
async fn save_job_logs(executor: &KubernetesExecutor, namespace: &str, job: &KuberosJob) -> Result<()> {
    let log_line = format!(
        "job={} status={:?} success={:?}\n",
        job.slug, job.status, job.success_completed
    );
    let files = [PodFile {
        dst_path: "/kuberos/job.log",
        content_lines: std::slice::from_ref(&log_line),
    }];
    match executor.write_file_into_pod(namespace, &job.lifecycle_module_pod_name, None, &files).await {
        OpResult::Success(_) => Ok(()),
        OpResult::Rejected { message, .. } => Err(Error::Rejected(namespace.to_string(), message)),
        OpResult::Failed(e) => Err(Error::K8s(e)),
    }
}

async fn terminate_job(executor: &KubernetesExecutor, namespace: &str, job: &KuberosJob) -> Result<()> {
    for name in &job.module_pod_names {
        let _ = executor.delete_pod(namespace, name).await;
    }
    if !job.discovery_server_pod_name.is_empty() {
        let _ = executor.delete_pod(namespace, &job.discovery_server_pod_name).await;
    }
    if !job.discovery_server_service_name.is_empty() {
        let _ = executor.delete_service(namespace, &job.discovery_server_service_name).await;
    }
    Ok(())
}

/// Deletes every group's ConfigMaps and force-terminates any job that
/// hasn't already reached `Completed` (spec §4.6 `CLEANING`).
async fn cleanup(executor: &KubernetesExecutor, namespace: &str, bjd: &mut BatchJobDeployment) -> Result<()> {
    for group in &mut bjd.groups {
        for name in &group.configmap_names {
            let _ = executor.delete_configmap(namespace, name).await;
        }
        for job in &mut group.jobs {
            if job.status != KuberosJobStatus::Completed {
                terminate_job(executor, namespace, job).await?;
                job.status = KuberosJobStatus::Completed;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_job_transitions_through_terminating() {
        let mut job = KuberosJob::new("abc1234567", 30, 600);
        job.status = KuberosJobStatus::Finished;
        job.success_completed = Some(true);
        assert!(!job.status.is_terminal());
        job.status = KuberosJobStatus::Completed;
        assert!(job.status.is_terminal());
    }
}
