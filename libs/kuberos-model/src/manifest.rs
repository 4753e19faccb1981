//! Deployment manifest model (spec §4.1).
//!
//! Parses and exposes typed views over a deployment manifest: modules,
//! parameter maps, container-registry references, and (for batch mode) the
//! job spec. Mirrors `pykuberos/scheduler/manifest.py` + `rosmodule.py` +
//! `rosparameter.py`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ReasonCode, Result};

pub const WORKSPACE_PATH_DEFAULT: &str = "/workspace/install/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModulePreference {
    Onboard,
    Edge,
    Cloud,
}

impl Default for ModulePreference {
    fn default() -> Self {
        ModulePreference::Onboard
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentMetadata {
    pub name: String,
    #[serde(default)]
    pub subname: Option<String>,
    pub target_fleet: String,
    #[serde(default)]
    pub target_robots: Vec<String>,
    #[serde(default)]
    pub exec_clusters: Vec<String>,
    #[serde(default)]
    pub use_robot_resource: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRegistryEntry {
    pub name: String,
    pub image_pull_secret: String,
    #[serde(default = "default_pull_policy")]
    pub image_pull_policy: String,
}

fn default_pull_policy() -> String {
    "Always".to_string()
}

/// CPU accepted as either a bare core count or a `"<N>m"` millicore string;
/// normalisation to millicores is mandatory (spec §4.1).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_request_millis: i64,
    pub cpu_optimal_millis: i64,
    #[serde(default)]
    pub memory_request_mi: i64,
}

pub fn parse_cpu_to_millis(raw: &str) -> Result<i64> {
    if let Some(stripped) = raw.strip_suffix('m') {
        stripped.parse().map_err(|_| {
            ModelError::new(
                ReasonCode::InvalidDeploymentManifest,
                format!("invalid millicore CPU value: {raw}"),
            )
        })
    } else {
        raw.parse::<f64>()
            .map(|cores| (cores * 1000.0).round() as i64)
            .map_err(|_| {
                ModelError::new(
                    ReasonCode::InvalidDeploymentManifest,
                    format!("invalid CPU value: {raw}"),
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RosParamType {
    Yaml,
    KeyValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredRosParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: RosParamType,
    pub value_from: String,
    #[serde(default)]
    pub mount_path: Option<String>,
}

/// A `RosParamMap` entry (spec §4.1): either inline key/value `data`, or a
/// `path` to a YAML file (type `yaml`). Booleans in key-value form are
/// serialised as `"True"`/`"False"` strings to satisfy ConfigMap's
/// string-only value constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosParamMapEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: RosParamType,
    #[serde(default)]
    pub data: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub path: Option<String>,
}

impl RosParamMapEntry {
    /// Renders this entry's `data` into a ConfigMap-compatible string map.
    pub fn to_configmap_data(&self) -> Result<BTreeMap<String, String>> {
        match self.param_type {
            RosParamType::Yaml => {
                let yaml_text = if let Some(path) = &self.path {
                    std::fs::read_to_string(path).map_err(|e| {
                        ModelError::new(
                            ReasonCode::InvalidDeploymentManifest,
                            format!("could not read rosParamMap path {path}: {e}"),
                        )
                    })?
                } else {
                    serde_yaml::to_string(&self.data).map_err(|e| {
                        ModelError::new(ReasonCode::InvalidDeploymentManifest, e.to_string())
                    })?
                };
                let mut out = BTreeMap::new();
                out.insert(format!("{}.yaml", self.name), yaml_text);
                Ok(out)
            }
            RosParamType::KeyValue => {
                let mut out = BTreeMap::new();
                for (k, v) in &self.data {
                    out.insert(k.clone(), yaml_value_to_configmap_string(v));
                }
                Ok(out)
            }
        }
    }
}

fn yaml_value_to_configmap_string(v: &serde_yaml::Value) -> String {
    match v {
        serde_yaml::Value::Bool(true) => "True".to_string(),
        serde_yaml::Value::Bool(false) => "False".to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

/// A launch parameter value is a dotted `namespace.key` reference. The
/// namespace's case selects the resolution path (spec §4.1):
/// UPPERCASE ⇒ device parameter, lowercase ⇒ ros-param.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchParamRef {
    Device { namespace: String, key: String },
    RosParam { namespace: String, key: String },
}

pub fn parse_launch_param_ref(raw: &str) -> Result<LaunchParamRef> {
    let (namespace, key) = raw.split_once('.').ok_or_else(|| {
        ModelError::new(
            ReasonCode::InvalidDeploymentManifest,
            format!("launch parameter reference missing namespace.key: {raw}"),
        )
    })?;
    if namespace.chars().all(|c| !c.is_alphabetic() || c.is_uppercase()) {
        Ok(LaunchParamRef::Device {
            namespace: namespace.to_string(),
            key: key.to_string(),
        })
    } else {
        Ok(LaunchParamRef::RosParam {
            namespace: namespace.to_string(),
            key: key.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosModuleManifest {
    pub name: String,
    pub container_image: String,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default = "default_source_ws")]
    pub source_ws: String,
    #[serde(default)]
    pub preference: ModulePreference,
    #[serde(default)]
    pub required_devices: Vec<String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub required_rosparams: Vec<RequiredRosParam>,
    /// `namespace.key` strings, resolved via [`parse_launch_param_ref`].
    #[serde(default)]
    pub launch_parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub container_registry: Option<String>,
    #[serde(default)]
    pub cpu_arch: Option<String>,
    #[serde(default)]
    pub container_runtime: Option<String>,
}

fn default_source_ws() -> String {
    WORKSPACE_PATH_DEFAULT.to_string()
}

impl RosModuleManifest {
    pub fn registry_entry_name(&self) -> &str {
        self.container_registry.as_deref().unwrap_or("default")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaryingParameter {
    pub to_ros_param_map: String,
    pub param_name: String,
    pub value_list: Vec<serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleModule {
    pub name: String,
    #[serde(default = "default_repeat")]
    pub repeat_num: u32,
}

fn default_repeat() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub varying_parameters: Vec<VaryingParameter>,
    pub lifecycle_module: LifecycleModule,
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Per-node pod cap; `0` means unlimited.
    #[serde(default)]
    pub num_pro_node: u32,
    pub startup_timeout_secs: u64,
    pub running_timeout_secs: u64,
    #[serde(default)]
    pub group_data_in_storage: bool,
    #[serde(default)]
    pub save_logs_in_volume: bool,
    #[serde(default)]
    pub volume_base_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub metadata: DeploymentMetadata,
    pub ros_modules: Vec<RosModuleManifest>,
    #[serde(default)]
    pub ros_param_map: Vec<RosParamMapEntry>,
    #[serde(default)]
    pub static_file_map: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub container_registry: Vec<ContainerRegistryEntry>,
    #[serde(default)]
    pub job_spec: Option<JobSpec>,
}

impl DeploymentManifest {
    pub fn parse_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| ModelError::new(ReasonCode::InvalidDeploymentManifest, e.to_string()))
    }

    /// Empty ⇒ all robots in fleet (spec §4.1).
    pub fn target_robot_names(&self) -> &[String] {
        &self.metadata.target_robots
    }

    pub fn default_registry_entry(&self) -> Option<&ContainerRegistryEntry> {
        self.container_registry.iter().find(|r| r.name == "default")
    }

    pub fn registry_entry_for(&self, module: &RosModuleManifest) -> Option<&ContainerRegistryEntry> {
        let name = module.registry_entry_name();
        self.container_registry
            .iter()
            .find(|r| r.name == name)
            .or_else(|| self.default_registry_entry())
    }

    pub fn ros_param_map_entry(&self, name: &str) -> Option<&RosParamMapEntry> {
        self.ros_param_map.iter().find(|m| m.name == name)
    }

    pub fn is_batch(&self) -> bool {
        self.job_spec.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_millicore_strings() {
        assert_eq!(parse_cpu_to_millis("500m").unwrap(), 500);
        assert_eq!(parse_cpu_to_millis("1.5").unwrap(), 1500);
        assert_eq!(parse_cpu_to_millis("2").unwrap(), 2000);
    }

    #[test]
    fn launch_param_ref_selects_by_case() {
        assert_eq!(
            parse_launch_param_ref("SIM_ARM.ROBOT_IP").unwrap(),
            LaunchParamRef::Device {
                namespace: "SIM_ARM".into(),
                key: "ROBOT_IP".into()
            }
        );
        assert_eq!(
            parse_launch_param_ref("nav.slam").unwrap(),
            LaunchParamRef::RosParam {
                namespace: "nav".into(),
                key: "slam".into()
            }
        );
    }

    #[test]
    fn key_value_booleans_serialise_as_capitalised_strings() {
        let mut data = BTreeMap::new();
        data.insert("use_sim".to_string(), serde_yaml::Value::Bool(true));
        data.insert("use_rviz".to_string(), serde_yaml::Value::Bool(false));
        let entry = RosParamMapEntry {
            name: "nav".into(),
            param_type: RosParamType::KeyValue,
            data,
            path: None,
        };
        let rendered = entry.to_configmap_data().unwrap();
        assert_eq!(rendered.get("use_sim").unwrap(), "True");
        assert_eq!(rendered.get("use_rviz").unwrap(), "False");
    }
}
