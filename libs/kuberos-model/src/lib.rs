//! Data model for fleets, clusters, deployments and batch jobs (spec §3).
//!
//! Everything in this crate is a plain value type plus pure derivation
//! logic (status aggregation, manifest parsing, docker-config rendering).
//! Kubernetes I/O lives in `kuberos-k8s-util`; scheduling and reconcile
//! loops live in `kuberos-scheduler` / `kuberos-controller`.

pub mod batchjob;
pub mod cluster;
pub mod deployment;
pub mod error;
pub mod fleet;
pub mod manifest;
pub mod registry_credential;

pub use batchjob::{
    BatchJobDeployment, BatchJobDeploymentStatus, BatchJobGroup, KuberosJob, KuberosJobStatus,
    VolumeBackend, VolumeSpec,
};
pub use cluster::{Cluster, ClusterAvailability, ClusterNode, NodeCondition, NodeRole, ResourceSnapshot};
pub use deployment::{
    Deployment, DeploymentEvent, DeploymentEventStatus, DeploymentEventType, DeploymentJob,
    DeploymentJobPhase, DeploymentStatus, ObservedPodStatus, PodPhaseTag, ServiceStatusEntry,
};
pub use error::{ModelError, ReasonCode, Result};
pub use fleet::{Fleet, FleetNode, FleetNodeStatus, FleetStatus};
pub use manifest::{
    ContainerRegistryEntry, DeploymentManifest, DeploymentMetadata, JobSpec, LaunchParamRef,
    LifecycleModule, ModulePreference, RequiredRosParam, ResourceRequirements, RosModuleManifest,
    RosParamMapEntry, RosParamType, VaryingParameter,
};
pub use registry_credential::RegistryCredential;
