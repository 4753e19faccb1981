//! Batch-job scheduler (spec §4.4): Cartesian parameter expansion,
//! per-group ConfigMap materialisation, and the per-tick placement
//! algorithm. Grounded on `main/tasks/batch_job_controller.py` and
//! `pykuberos/scheduler/job_scheduler.py`.

use std::collections::BTreeMap;

use kuberos_model::batchjob::{random_slug, BatchJobGroup, KuberosJob, VolumeBackend, VolumeSpec};
use kuberos_model::error::{ModelError, ReasonCode, Result};
use kuberos_model::manifest::{DeploymentManifest, JobSpec, RosParamMapEntry};

/// Reserved CPU headroom left for the kubelet and the discovery server
/// itself (spec §4.4 step 1/tie-break note).
pub const RESERVED_CPU_MILLIS: i64 = 300;

/// Cartesian-expands `jobSpec.varyingParameters` into one `BatchJobGroup`
/// per combination, each bound to the first exec cluster (spec §4.4
/// "Expansion").
pub fn expand_groups(manifest: &DeploymentManifest, exec_clusters: &[String]) -> Result<Vec<BatchJobGroup>> {
    let job_spec = manifest
        .job_spec
        .as_ref()
        .ok_or_else(|| ModelError::new(ReasonCode::InvalidDeploymentManifest, "manifest has no jobSpec".to_string()))?;
    let exec_cluster = exec_clusters
        .first()
        .ok_or_else(|| ModelError::new(ReasonCode::InvalidDeploymentManifest, "no exec clusters configured".to_string()))?
        .clone();

    let combinations = cartesian_product(job_spec);
    let mut groups = Vec::with_capacity(combinations.len());
    for (queue_number, combo) in combinations.into_iter().enumerate() {
        let rendered_manifest = substitute_varying_parameters(manifest, &combo)?;
        groups.push(BatchJobGroup {
            postfix: random_slug(),
            queue_number: queue_number as u32,
            exec_cluster: exec_cluster.clone(),
            configmap_names: Vec::new(),
            lifecycle_module: job_spec.lifecycle_module.clone(),
            repeat_count: job_spec.lifecycle_module.repeat_num,
            rendered_manifest,
            jobs: Vec::new(),
        });
    }
    Ok(groups)
}

/// One `(toRosParamMap, paramName) -> value` assignment for a single
/// Cartesian cell.
type ParamAssignment<'a> = Vec<(&'a str, &'a str, &'a serde_yaml::Value)>;

fn cartesian_product(job_spec: &JobSpec) -> Vec<ParamAssignment> {
    let mut combos: Vec<ParamAssignment> = vec![Vec::new()];
    for vp in &job_spec.varying_parameters {
        let mut next = Vec::with_capacity(combos.len() * vp.value_list.len());
        for combo in &combos {
            for value in &vp.value_list {
                let mut extended = combo.clone();
                extended.push((vp.to_ros_param_map.as_str(), vp.param_name.as_str(), value));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

fn substitute_varying_parameters(manifest: &DeploymentManifest, combo: &ParamAssignment) -> Result<DeploymentManifest> {
    let mut rendered = manifest.clone();
    for (map_name, param_name, value) in combo {
        let entry = rendered
            .ros_param_map
            .iter_mut()
            .find(|m| &m.name == map_name)
            .ok_or_else(|| {
                ModelError::new(
                    ReasonCode::InvalidDeploymentManifest,
                    format!("varying parameter targets unknown rosParamMap {map_name}"),
                )
            })?;
        entry.data.insert(param_name.to_string(), (*value).clone());
    }
    Ok(rendered)
}

/// Materialises every ros-param-map of the group's rendered manifest into
/// ConfigMap data keyed by `<postfix>-<mapName>` (spec §4.4 "Per-group
/// config maps"). Populates `group.configmap_names` as a side effect.
pub fn materialize_group_configmaps(group: &mut BatchJobGroup) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
    let mut rendered = BTreeMap::new();
    for entry in &group.rendered_manifest.ros_param_map {
        let data = render_entry(entry)?;
        let name = group.configmap_name(&entry.name);
        rendered.insert(name.clone(), data);
        group.configmap_names.push(name);
    }
    Ok(rendered)
}

fn render_entry(entry: &RosParamMapEntry) -> Result<BTreeMap<String, String>> {
    entry
        .to_configmap_data()
        .map_err(|e| ModelError::new(ReasonCode::InvalidDeploymentManifest, e.to_string()))
}

/// Creates `repeat_count` `KuberosJob`s for a group, each with its own
/// random slug (spec §4.4 "Job creation").
pub fn create_jobs_for_group(group: &mut BatchJobGroup, startup_timeout_secs: u64, running_timeout_secs: u64) {
    for _ in 0..group.repeat_count {
        group.jobs.push(KuberosJob::new(random_slug(), startup_timeout_secs, running_timeout_secs));
    }
}

/// One node's allocability snapshot for a single scheduling tick (spec
/// §4.4 step 1).
#[derive(Debug, Clone)]
pub struct NodeAllocability {
    pub hostname: String,
    pub cpu_allocatable_millis: i64,
    pub cpu_allocated_millis: i64,
    pub num_pods_on_node: u32,
}

impl NodeAllocability {
    pub fn cpu_available_millis(&self) -> i64 {
        self.cpu_allocatable_millis - self.cpu_allocated_millis
    }

    pub fn is_allocatable(&self, request_millis: i64, num_pro_node: u32) -> bool {
        let enough_for_request = self.cpu_available_millis() >= request_millis;
        let leaves_headroom = self.cpu_allocatable_millis >= request_millis + RESERVED_CPU_MILLIS;
        let under_pod_cap = num_pro_node == 0 || self.num_pods_on_node < num_pro_node;
        enough_for_request && leaves_headroom && under_pod_cap
    }

    /// Optimal CPU if the node has enough headroom for it, else the
    /// requested value (spec §4.4 step 2).
    pub fn pick_cpu_millis(&self, request_millis: i64, optimal_millis: i64) -> i64 {
        if self.cpu_available_millis() - RESERVED_CPU_MILLIS >= optimal_millis {
            optimal_millis
        } else {
            request_millis
        }
    }
}

/// The per-job placement produced once a job is popped and assigned a
/// node (spec §4.4 step 3).
pub struct JobPlacement {
    pub job_index: usize,
    pub target_node: String,
    pub cpu_millis: i64,
    pub discovery_pod_name: String,
    pub discovery_service_name: String,
    pub module_pod_names: Vec<String>,
    pub volume: VolumeSpec,
}

pub struct VolumeConfig {
    pub backend: VolumeBackend,
    pub base_path: String,
    pub group_data_in_storage: bool,
}

/// Runs one scheduling tick for a single already-synced group (spec §4.4
/// "Placement"): computes `N` = allocatable-node count, pops up to `N`
/// pending jobs in insertion order, and assigns each one a node + volume
/// subpath + module pod names.
pub fn place_pending_jobs(
    group: &BatchJobGroup,
    nodes: &[NodeAllocability],
    request_millis: i64,
    optimal_millis: i64,
    num_pro_node: u32,
    volume: &VolumeConfig,
) -> Vec<JobPlacement> {
    let allocatable: Vec<&NodeAllocability> = nodes.iter().filter(|n| n.is_allocatable(request_millis, num_pro_node)).collect();

    let pending_indices: Vec<usize> = group
        .jobs
        .iter()
        .enumerate()
        .filter(|(_, j)| j.status == kuberos_model::batchjob::KuberosJobStatus::Pending)
        .map(|(i, _)| i)
        .collect();

    let n = allocatable.len();
    let mut placements = Vec::with_capacity(n.min(pending_indices.len()));
    for (slot, job_index) in pending_indices.into_iter().take(n).enumerate() {
        let node = allocatable[slot];
        let job = &group.jobs[job_index];
        let cpu_millis = node.pick_cpu_millis(request_millis, optimal_millis);

        let sub_path = if volume.group_data_in_storage {
            format!("{}/queue_{}/job_{}", volume.base_path, group.queue_number, job.slug)
        } else {
            format!("{}/job_{}", volume.base_path, job.slug)
        };

        let module_pod_names = vec![format!("{}-{}-{}", group.postfix, group.lifecycle_module.name, job.slug)];

        placements.push(JobPlacement {
            job_index,
            target_node: node.hostname.clone(),
            cpu_millis,
            discovery_pod_name: format!("{}-disc-{}", group.postfix, job.slug),
            discovery_service_name: format!("{}-disc-svc-{}", group.postfix, job.slug),
            module_pod_names,
            volume: VolumeSpec {
                backend: volume.backend.clone(),
                sub_path,
            },
        });
    }
    placements
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuberos_model::manifest::{DeploymentMetadata, JobSpec, LifecycleModule, VaryingParameter};

    fn base_manifest() -> DeploymentManifest {
        DeploymentManifest {
            metadata: DeploymentMetadata {
                name: "sweep".into(),
                subname: None,
                target_fleet: "f".into(),
                target_robots: Vec::new(),
                exec_clusters: Vec::new(),
                use_robot_resource: false,
            },
            ros_modules: Vec::new(),
            ros_param_map: vec![RosParamMapEntry {
                name: "nav".into(),
                param_type: kuberos_model::manifest::RosParamType::KeyValue,
                data: Default::default(),
                path: None,
            }],
            static_file_map: Vec::new(),
            container_registry: Vec::new(),
            job_spec: Some(JobSpec {
                varying_parameters: vec![
                    VaryingParameter {
                        to_ros_param_map: "nav".into(),
                        param_name: "speed".into(),
                        value_list: vec![serde_yaml::Value::from(1), serde_yaml::Value::from(2)],
                    },
                    VaryingParameter {
                        to_ros_param_map: "nav".into(),
                        param_name: "map".into(),
                        value_list: vec![
                            serde_yaml::Value::from("a"),
                            serde_yaml::Value::from("b"),
                            serde_yaml::Value::from("c"),
                        ],
                    },
                ],
                lifecycle_module: LifecycleModule { name: "runner".into(), repeat_num: 10 },
                resources: Default::default(),
                num_pro_node: 0,
                startup_timeout_secs: 30,
                running_timeout_secs: 600,
                group_data_in_storage: false,
                save_logs_in_volume: false,
                volume_base_path: Some("/data".into()),
            }),
        }
    }

    #[test]
    fn expands_full_cartesian_product() {
        let manifest = base_manifest();
        let groups = expand_groups(&manifest, &["cluster-a".to_string()]).unwrap();
        assert_eq!(groups.len(), 6);
        assert_eq!(groups[0].repeat_count, 10);
    }

    #[test]
    fn is_allocatable_respects_reserved_headroom_and_pod_cap() {
        let node = NodeAllocability {
            hostname: "n1".into(),
            cpu_allocatable_millis: 1000,
            cpu_allocated_millis: 400,
            num_pods_on_node: 3,
        };
        assert!(node.is_allocatable(300, 0));
        assert!(!node.is_allocatable(700, 0));
        assert!(!node.is_allocatable(300, 3));
    }

    #[test]
    fn place_pending_jobs_caps_at_allocatable_node_count() {
        let mut group = BatchJobGroup {
            postfix: "abcdefghij".into(),
            queue_number: 0,
            exec_cluster: "cluster-a".into(),
            configmap_names: Vec::new(),
            lifecycle_module: LifecycleModule { name: "runner".into(), repeat_num: 2 },
            repeat_count: 2,
            rendered_manifest: base_manifest(),
            jobs: Vec::new(),
        };
        create_jobs_for_group(&mut group, 30, 600);

        let nodes = vec![NodeAllocability {
            hostname: "n1".into(),
            cpu_allocatable_millis: 2000,
            cpu_allocated_millis: 0,
            num_pods_on_node: 0,
        }];
        let volume = VolumeConfig {
            backend: VolumeBackend::HostPath("/data".into()),
            base_path: "/data".into(),
            group_data_in_storage: false,
        };
        let placements = place_pending_jobs(&group, &nodes, 500, 800, 0, &volume);
        assert_eq!(placements.len(), 1);
    }
}
