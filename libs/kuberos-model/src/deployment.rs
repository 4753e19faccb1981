//! Deployment, DeploymentEvent and DeploymentJob entities (spec §3, §4.5).
//!
//! `DeploymentJobPhase` carries the 17 explicit phase values spec §4.5
//! calls for. The spec names 12 states directly (`pending` through
//! `job_completed`) and says a deployment's `status` also ranges over
//! `updating`; we resolve that open question (per design note §9, "decide
//! and record") by giving `update`/`scale` sub-machines their own
//! in-progress/success/failed legs that reuse the same pod/service
//! observed-status reconcile loop as `rosmodule_in_progress` (see
//! DESIGN.md).

use chrono::{DateTime, Utc};
use kuberos_k8s_util::PodObservedStatus;
use serde::{Deserialize, Serialize};

use crate::manifest::DeploymentManifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentJobPhase {
    Pending,
    DiscServerInProgress,
    DiscServerSuccess,
    DiscServerFailed,
    RosmoduleInProgress,
    DeploySuccess,
    DeployFailed,
    UpdateInProgress,
    UpdateSuccess,
    UpdateFailed,
    ScaleInProgress,
    ScaleSuccess,
    RequestForDelete,
    DeleteInProgress,
    DeleteSuccess,
    DeleteFailed,
    JobCompleted,
}

impl DeploymentJobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentJobPhase::DeploySuccess
                | DeploymentJobPhase::DeployFailed
                | DeploymentJobPhase::DeleteSuccess
                | DeploymentJobPhase::DeleteFailed
                | DeploymentJobPhase::JobCompleted
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DeploymentJobPhase::DiscServerFailed
                | DeploymentJobPhase::DeployFailed
                | DeploymentJobPhase::UpdateFailed
                | DeploymentJobPhase::DeleteFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedPodStatus {
    pub pod_name: String,
    #[serde(skip, default = "default_pending_phase")]
    pub phase: PodPhaseTag,
}

fn default_pending_phase() -> PodPhaseTag {
    PodPhaseTag::Pending
}

/// Serialisable mirror of [`kuberos_k8s_util::PodObservedStatus`] — the
/// executor type isn't `Serialize`, so jobs persist this tag instead
/// (design note §9: dynamic status blobs become tagged sums).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhaseTag {
    Pending,
    Running,
    Succeeded,
    Failed,
    Terminating,
    NotFound,
    Unknown,
}

impl From<&PodObservedStatus> for PodPhaseTag {
    fn from(p: &PodObservedStatus) -> Self {
        match p {
            PodObservedStatus::Pending => PodPhaseTag::Pending,
            PodObservedStatus::Running => PodPhaseTag::Running,
            PodObservedStatus::Succeeded => PodPhaseTag::Succeeded,
            PodObservedStatus::Failed => PodPhaseTag::Failed,
            PodObservedStatus::Terminating => PodPhaseTag::Terminating,
            PodObservedStatus::NotFound => PodPhaseTag::NotFound,
            PodObservedStatus::Unknown => PodPhaseTag::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusEntry {
    pub service_name: String,
    pub found: bool,
}

/// One per-robot job inside a Deployment (spec §3). Each job corresponds to
/// exactly one robot; phase transitions are monotonic along the documented
/// edges in §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentJob {
    pub robot_name: String,
    pub phase: DeploymentJobPhase,
    pub pod_statuses: Vec<(String, PodPhaseTag)>,
    pub service_statuses: Vec<ServiceStatusEntry>,
    pub discovery_server_pod_name: String,
    pub discovery_server_service_name: String,
    pub onboard_module_pod_names: Vec<String>,
    pub edge_module_pod_names: Vec<String>,
    pub cloud_module_pod_names: Vec<String>,
    pub running_at: Option<DateTime<Utc>>,
    /// Count of consecutive reconciles that observed every referenced pod
    /// `NotFound` while `phase == DeleteInProgress`. Spec §8 invariant (5)
    /// requires two successive all-`NotFound` observations before a
    /// deployment is considered deleted, so a single flaky read right after
    /// deletion can't finalize it early.
    pub not_found_streak: u32,
}

impl DeploymentJob {
    pub fn new(robot_name: impl Into<String>) -> Self {
        DeploymentJob {
            robot_name: robot_name.into(),
            phase: DeploymentJobPhase::Pending,
            pod_statuses: Vec::new(),
            service_statuses: Vec::new(),
            discovery_server_pod_name: String::new(),
            discovery_server_service_name: String::new(),
            onboard_module_pod_names: Vec::new(),
            edge_module_pod_names: Vec::new(),
            cloud_module_pod_names: Vec::new(),
            running_at: None,
            not_found_streak: 0,
        }
    }

    pub fn all_module_pod_names(&self) -> impl Iterator<Item = &String> {
        self.onboard_module_pod_names
            .iter()
            .chain(self.edge_module_pod_names.iter())
            .chain(self.cloud_module_pod_names.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Deploying,
    Running,
    Updating,
    Deleting,
    Deleted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentEventType {
    Deploy,
    Update,
    Delete,
    Scale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentEventStatus {
    Created,
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DeploymentEvent {
    pub event_type: DeploymentEventType,
    pub status: DeploymentEventStatus,
    pub deployment_name: String,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub name: String,
    pub fleet: String,
    pub status: DeploymentStatus,
    pub manifest: DeploymentManifest,
    pub config_maps: Vec<String>,
    pub configmaps_created: bool,
    pub running_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub jobs: Vec<DeploymentJob>,
    pub events: Vec<DeploymentEvent>,
}

impl Deployment {
    /// Aggregates per-job phases into the deployment-level status
    /// (spec §4.5): all `deploy_success` ⇒ running; all `delete_success`
    /// ⇒ deleted (and active=false, name mangled); any failure ⇒ failed.
    pub fn recompute_status(&mut self, rng_suffix: impl FnOnce() -> String) {
        if self.jobs.is_empty() {
            return;
        }
        if self.jobs.iter().any(|j| j.phase.is_failure()) {
            self.status = DeploymentStatus::Failed;
            self.active = true;
            return;
        }
        if self
            .jobs
            .iter()
            .all(|j| j.phase == DeploymentJobPhase::DeleteSuccess)
        {
            self.status = DeploymentStatus::Deleted;
            self.active = false;
            self.name = format!("{}-deleted-{}", self.name, rng_suffix());
            return;
        }
        if self
            .jobs
            .iter()
            .all(|j| j.phase == DeploymentJobPhase::DeploySuccess)
        {
            self.status = DeploymentStatus::Running;
            if self.running_at.is_none() {
                self.running_at = Some(Utc::now());
            }
        }
    }

    pub fn config_maps_union(&self) -> Vec<String> {
        let mut set: Vec<String> = self
            .manifest
            .ros_param_map
            .iter()
            .map(|m| m.name.clone())
            .collect();
        set.sort();
        set.dedup();
        set
    }
}
