//! Pod/Service manifest construction shared by the application and batch-job
//! schedulers (spec §4.3 steps 4-7), grounded on
//! `pykuberos/scheduler/rosmodule.py`'s `RosModule`/`DiscoveryServer`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, Container, ContainerPort, EnvVar, EnvVarSource, LocalObjectReference,
    Pod, PodSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use kuberos_model::manifest::{ContainerRegistryEntry, RosModuleManifest};

pub const DISCOVERY_SERVER_PORT: i32 = 11811;
const DEFAULT_ROS_DISTRO: &str = "humble";

/// Upper-cases and underscores a service name, matching
/// `convert_string_to_linux_convention` so modules can address the
/// discovery server through the Kubernetes-injected env vars.
fn to_env_prefix(svc_name: &str) -> String {
    svc_name.replace('-', "_").to_uppercase()
}

pub fn discovery_server_pod(pod_name: &str, service_name: &str, target_hostname: &str, registry: Option<&ContainerRegistryEntry>) -> Pod {
    let mut labels = BTreeMap::new();
    labels.insert("kuberos-role".to_string(), "discovery-server".to_string());
    labels.insert("kuberos-service".to_string(), service_name.to_string());

    let mut node_selector = BTreeMap::new();
    node_selector.insert("device.kuberos.io/hostname".to_string(), target_hostname.to_string());

    let pull_secret = registry.map(|r| r.image_pull_secret.clone());
    let pull_policy = registry.map(|r| r.image_pull_policy.clone());

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_selector: Some(node_selector),
            containers: vec![Container {
                name: "dds-discovery-server".to_string(),
                image: registry.map(|_| "kuberos/dds-discovery-server:latest".to_string()),
                image_pull_policy: pull_policy,
                command: Some(vec!["/bin/bash".to_string()]),
                args: Some(vec![
                    "-c".to_string(),
                    format!(
                        "source /opt/ros/{DEFAULT_ROS_DISTRO}/setup.bash; fastdds discovery --server-id 0 --port {DISCOVERY_SERVER_PORT} -b"
                    ),
                ]),
                ports: Some(vec![ContainerPort {
                    container_port: DISCOVERY_SERVER_PORT,
                    protocol: Some("UDP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            image_pull_secrets: pull_secret.map(|name| vec![LocalObjectReference { name: Some(name) }]),
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn discovery_server_service(service_name: &str) -> Service {
    let mut selector = BTreeMap::new();
    selector.insert("kuberos-service".to_string(), service_name.to_string());
    selector.insert("kuberos-role".to_string(), "discovery-server".to_string());

    Service {
        metadata: ObjectMeta {
            name: Some(service_name.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                port: DISCOVERY_SERVER_PORT,
                target_port: Some(IntOrString::Int(DISCOVERY_SERVER_PORT)),
                protocol: Some("UDP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleNodeTarget<'a> {
    Hostname(&'a str),
    ResourceGroup(&'a str),
}

/// One ConfigMap attachment resolved for a module (spec §4.3 step 6).
pub enum ParamAttachment {
    /// ros-param of type `yaml`: mount the ConfigMap as a read-only volume.
    YamlVolume { configmap_name: String, mount_path: String },
    /// ros-param of type `key-value`: expose one key via `configMapKeyRef`,
    /// optionally also appended to the module's launch args.
    KeyValueEnv {
        configmap_name: String,
        key: String,
        env_name: String,
        launch_arg: Option<String>,
    },
}

pub struct ModulePodPlan<'a> {
    pub pod_name: String,
    pub module: &'a RosModuleManifest,
    pub discovery_service_name: &'a str,
    pub target: ModuleNodeTarget<'a>,
    pub registry: Option<&'a ContainerRegistryEntry>,
    pub attachments: Vec<ParamAttachment>,
    /// Resolved `--arg:=value` device-parameter strings, from UPPERCASE
    /// namespaces matched against the node's peripheral devices.
    pub device_launch_args: Vec<String>,
}

/// Builds one module pod, assembling the shell-args entrypoint exactly the
/// way the original scheduler does: source ROS, source the workspace,
/// export `ROS_DISCOVERY_SERVER`, then the module entrypoint + launch args.
pub fn module_pod(plan: &ModulePodPlan) -> Pod {
    let svc_prefix = to_env_prefix(plan.discovery_service_name);
    let svc_env_host = format!("{svc_prefix}_SERVICE_HOST");
    let svc_env_port = format!("{svc_prefix}_SERVICE_PORT");

    let mut volumes = Vec::new();
    let mut volume_mounts = Vec::new();
    let mut env = Vec::new();
    let mut launch_args: Vec<String> = Vec::new();

    for attach in &plan.attachments {
        match attach {
            ParamAttachment::YamlVolume { configmap_name, mount_path } => {
                let volume_name = format!("{configmap_name}-volume").replace('.', "-");
                volumes.push(Volume {
                    name: volume_name.clone(),
                    config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
                        name: configmap_name.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
                volume_mounts.push(VolumeMount {
                    name: volume_name,
                    mount_path: mount_path.clone(),
                    read_only: Some(true),
                    ..Default::default()
                });
            }
            ParamAttachment::KeyValueEnv {
                configmap_name,
                key,
                env_name,
                launch_arg,
            } => {
                env.push(EnvVar {
                    name: env_name.clone(),
                    value_from: Some(EnvVarSource {
                        config_map_key_ref: Some(ConfigMapKeySelector {
                            name: configmap_name.clone(),
                            key: key.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
                if let Some(arg) = launch_arg {
                    launch_args.push(format!("{arg}:=$({env_name})"));
                }
            }
        }
    }
    launch_args.extend(plan.device_launch_args.iter().cloned());

    let entrypoint_line = plan
        .module
        .entrypoint
        .first()
        .cloned()
        .unwrap_or_default();
    let full_entrypoint = if launch_args.is_empty() {
        entrypoint_line
    } else {
        format!("{entrypoint_line} {}", launch_args.join(" "))
    };

    let script = [
        format!("source /opt/ros/{DEFAULT_ROS_DISTRO}/setup.bash"),
        format!("source {}setup.bash", plan.module.source_ws),
        format!("export ROS_DISCOVERY_SERVER=${{{svc_env_host}}}:${{{svc_env_port}}}"),
        full_entrypoint,
    ]
    .join(";");

    let (node_sel_key, node_sel_value) = match plan.target {
        ModuleNodeTarget::Hostname(h) => ("device.kuberos.io/hostname", h.to_string()),
        ModuleNodeTarget::ResourceGroup(g) => ("kuberos.io/role", g.to_string()),
    };
    let mut node_selector = BTreeMap::new();
    node_selector.insert(node_sel_key.to_string(), node_sel_value);

    let pull_secret = plan.registry.map(|r| r.image_pull_secret.clone());
    let pull_policy = plan.registry.map(|r| r.image_pull_policy.clone());

    Pod {
        metadata: ObjectMeta {
            name: Some(plan.pod_name.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_selector: Some(node_selector),
            containers: vec![Container {
                name: plan.module.name.clone(),
                image: Some(plan.module.container_image.clone()),
                image_pull_policy: pull_policy,
                command: Some(vec!["/bin/bash".to_string()]),
                args: Some(vec!["-c".to_string(), script]),
                env: if env.is_empty() { None } else { Some(env) },
                volume_mounts: if volume_mounts.is_empty() { None } else { Some(volume_mounts) },
                ..Default::default()
            }],
            volumes: if volumes.is_empty() { None } else { Some(volumes) },
            image_pull_secrets: pull_secret.map(|name| vec![LocalObjectReference { name: Some(name) }]),
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Resolves an UPPERCASE device-namespace launch parameter against a node's
/// peripheral-device parameter table (spec §4.3 step 6): device/key names
/// are lower-cased with hyphens in place of underscores before lookup.
pub fn resolve_device_param(
    device_name: &str,
    param_key: &str,
    peripheral_device_params: &BTreeMap<String, BTreeMap<String, String>>,
) -> Option<String> {
    let dev_key = device_name.to_lowercase().replace('_', "-");
    let val_key = param_key.to_lowercase().replace('_', "-");
    peripheral_device_params.get(&dev_key).and_then(|m| m.get(&val_key)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_prefix_matches_kubernetes_service_injection_convention() {
        assert_eq!(to_env_prefix("robot-1-primary-discovery-server"), "ROBOT_1_PRIMARY_DISCOVERY_SERVER");
    }

    #[test]
    fn resolves_device_param_case_insensitively() {
        let mut devices = BTreeMap::new();
        let mut arm = BTreeMap::new();
        arm.insert("robot-ip".to_string(), "10.0.0.5".to_string());
        devices.insert("sim-arm".to_string(), arm);
        assert_eq!(
            resolve_device_param("SIM_ARM", "ROBOT_IP", &devices),
            Some("10.0.0.5".to_string())
        );
    }
}
