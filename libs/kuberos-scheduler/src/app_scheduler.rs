//! Application scheduler (spec §4.3), grounded on
//! `pykuberos/scheduler/scheduler_base.py`'s `RobotEntity` and
//! `pykuberos/scheduler/job_scheduler.py`'s parameter-attaching walk.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, Service};

use kuberos_model::cluster::ClusterNode;
use kuberos_model::error::{ModelError, ReasonCode, Result};
use kuberos_model::fleet::{Fleet, FleetNode};
use kuberos_model::manifest::{
    parse_launch_param_ref, DeploymentManifest, LaunchParamRef, ModulePreference, RosModuleManifest,
    RosParamType,
};

use crate::pod_builder::{discovery_server_pod, discovery_server_service, module_pod, resolve_device_param, ModuleNodeTarget, ModulePodPlan, ParamAttachment};

/// A robot and the onboard node backing it (spec §4.3 step 2). Mirrors
/// `RobotEntity`'s single-primary-node assumption: one onboard computer
/// per robot.
pub struct RobotEntity<'a> {
    pub robot_name: String,
    pub primary_node: &'a ClusterNode,
    pub onboard_modules: Vec<&'a RosModuleManifest>,
    pub edge_modules: Vec<&'a RosModuleManifest>,
    pub cloud_modules: Vec<&'a RosModuleManifest>,
}

impl<'a> RobotEntity<'a> {
    /// Peripheral device parameters keyed by lower-case hyphenated device
    /// name, as taken from `peripheral_device_params` (the node's device
    /// name list in `kuberos-model` carries names only; the parameter
    /// schema behind each device is supplied separately by the cluster
    /// synchroniser).
    fn bind_modules(&mut self, manifest: &'a DeploymentManifest) -> Result<()> {
        for module in &manifest.ros_modules {
            for req in &module.required_devices {
                if !self.primary_node.peripheral_devices.iter().any(|d| d == req) {
                    return Err(ModelError::new(
                        ReasonCode::ValidationFailed,
                        format!(
                            "required peripheral device {req} is not available on node {}",
                            self.primary_node.hostname
                        ),
                    ));
                }
            }
            match module.preference {
                ModulePreference::Onboard => self.onboard_modules.push(module),
                ModulePreference::Edge => self.edge_modules.push(module),
                ModulePreference::Cloud => self.cloud_modules.push(module),
            }
        }
        Ok(())
    }
}

pub struct DiscoveryServerPlacement {
    pub pod: Pod,
    pub service: Service,
    pub service_name: String,
    pub pod_name: String,
}

pub struct RobotPlacement {
    pub robot_name: String,
    pub discovery_server: DiscoveryServerPlacement,
    pub onboard_pods: Vec<Pod>,
    pub edge_pods: Vec<Pod>,
}

pub struct ApplicationPlacementPlan {
    pub robots: Vec<RobotPlacement>,
    pub configmaps: BTreeMap<String, BTreeMap<String, String>>,
}

/// Resolved parameter-to-ConfigMap bindings passed in by the caller. The
/// manifest only names the ros-param-map entry (`valueFrom`); this table
/// supplies each module's per-device parameter values (spec §4.3 step 6),
/// since device parameter schemas live outside the deployment manifest.
pub struct SchedulingInput<'a> {
    pub manifest: &'a DeploymentManifest,
    pub fleet: &'a Fleet,
    pub fleet_nodes: &'a [FleetNode],
    pub cluster_nodes: &'a [ClusterNode],
    pub device_params: &'a BTreeMap<String, BTreeMap<String, String>>,
}

/// Runs the full application-scheduler algorithm (spec §4.3 steps 1-7).
pub fn schedule(input: &SchedulingInput) -> Result<ApplicationPlacementPlan> {
    let target_names = target_robot_names(input)?;

    let mut configmaps = BTreeMap::new();
    for entry in &input.manifest.ros_param_map {
        let data = entry
            .to_configmap_data()
            .map_err(|e| ModelError::new(ReasonCode::InvalidDeploymentManifest, e.to_string()))?;
        configmaps.insert(entry.name.clone(), data);
    }

    let mut robots = Vec::new();
    for name in &target_names {
        let node = input
            .cluster_nodes
            .iter()
            .find(|n| n.hostname == *name || n.robot_name() == Some(name.as_str()))
            .ok_or_else(|| ModelError::new(ReasonCode::FleetResourceCheckFailed, format!("robot {name} has no backing node")))?;

        let mut entity = RobotEntity {
            robot_name: name.clone(),
            primary_node: node,
            onboard_modules: Vec::new(),
            edge_modules: Vec::new(),
            cloud_modules: Vec::new(),
        };
        entity.bind_modules(input.manifest)?;

        robots.push(place_robot(&entity, input)?);
    }

    Ok(ApplicationPlacementPlan { robots, configmaps })
}

/// Step 1: validate named robots are present, else take the whole fleet.
fn target_robot_names(input: &SchedulingInput) -> Result<Vec<String>> {
    if !input.fleet.healthy || input.fleet_nodes.is_empty() {
        return Err(ModelError::new(
            ReasonCode::FleetResourceCheckFailed,
            "fleet is not deployable".to_string(),
        ));
    }
    let requested = input.manifest.target_robot_names();
    if requested.is_empty() {
        return Ok(input.fleet_nodes.iter().map(|n| n.hostname.clone()).collect());
    }
    for r in requested {
        if !input.fleet_nodes.iter().any(|n| &n.hostname == r) {
            return Err(ModelError::new(
                ReasonCode::FleetResourceCheckFailed,
                format!("robot {r} is not present in fleet {}", input.fleet.name),
            ));
        }
    }
    Ok(requested.to_vec())
}

fn discovery_server_name(robot_name: &str) -> String {
    format!("{robot_name}-primary-discovery-server")
}

fn place_robot(entity: &RobotEntity, input: &SchedulingInput) -> Result<RobotPlacement> {
    let service_name = discovery_server_name(&entity.robot_name);
    let pod_name = service_name.clone();
    let registry = input.manifest.default_registry_entry();

    let pod = discovery_server_pod(&pod_name, &service_name, &entity.primary_node.hostname, registry);
    let service = discovery_server_service(&service_name);

    let mut onboard_pods = Vec::new();
    for module in &entity.onboard_modules {
        onboard_pods.push(place_module(
            entity,
            module,
            &service_name,
            ModuleNodeTarget::Hostname(&entity.primary_node.hostname),
            input,
        )?);
    }

    let mut edge_pods = Vec::new();
    for module in entity.edge_modules.iter().chain(entity.cloud_modules.iter()) {
        let group = match module.preference {
            ModulePreference::Edge => "edge",
            ModulePreference::Cloud => "cloud",
            ModulePreference::Onboard => "edge",
        };
        edge_pods.push(place_module(entity, module, &service_name, ModuleNodeTarget::ResourceGroup(group), input)?);
    }

    Ok(RobotPlacement {
        robot_name: entity.robot_name.clone(),
        discovery_server: DiscoveryServerPlacement {
            pod,
            service,
            service_name,
            pod_name,
        },
        onboard_pods,
        edge_pods,
    })
}

fn place_module(
    entity: &RobotEntity,
    module: &RosModuleManifest,
    discovery_service_name: &str,
    target: ModuleNodeTarget,
    input: &SchedulingInput,
) -> Result<Pod> {
    let registry = input.manifest.registry_entry_for(module);
    let mut attachments = Vec::new();
    let mut device_launch_args = Vec::new();

    for req in &module.required_rosparams {
        let map_entry = input.manifest.ros_param_map_entry(&req.value_from).ok_or_else(|| {
            ModelError::new(
                ReasonCode::InvalidDeploymentManifest,
                format!("rosParamMap entry {} referenced by module {} not found", req.value_from, module.name),
            )
        })?;
        match req.param_type {
            RosParamType::Yaml => {
                let mount_path = req.mount_path.clone().unwrap_or_else(|| format!("/config/{}", map_entry.name));
                attachments.push(ParamAttachment::YamlVolume {
                    configmap_name: map_entry.name.clone(),
                    mount_path,
                });
            }
            RosParamType::KeyValue => {
                for key in map_entry.data.keys() {
                    let launch_arg = module.launch_parameters.iter().find_map(|(launch_key, raw_ref)| {
                        let parsed = parse_launch_param_ref(raw_ref).ok()?;
                        match parsed {
                            LaunchParamRef::RosParam { namespace, key: ref_key } if namespace == map_entry.name && &ref_key == key => {
                                Some(launch_key.clone())
                            }
                            _ => None,
                        }
                    });
                    let env_name = format!(
                        "{}_{}",
                        map_entry.name.to_uppercase().replace('-', "_"),
                        key.to_uppercase().replace('-', "_")
                    );
                    attachments.push(ParamAttachment::KeyValueEnv {
                        configmap_name: map_entry.name.clone(),
                        key: key.clone(),
                        env_name,
                        launch_arg,
                    });
                }
            }
        }
    }

    for (launch_key, raw_ref) in &module.launch_parameters {
        if let Ok(LaunchParamRef::Device { namespace, key }) = parse_launch_param_ref(raw_ref) {
            if let Some(value) = resolve_device_param(&namespace, &key, input.device_params) {
                device_launch_args.push(format!("{launch_key}:={value}"));
            }
        }
    }

    let pod_name = format!("{}-{}", entity.robot_name, module.name);
    let plan = ModulePodPlan {
        pod_name,
        module,
        discovery_service_name,
        target,
        registry,
        attachments,
        device_launch_args,
    };
    Ok(module_pod(&plan))
}
