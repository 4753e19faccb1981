//! BatchJobDeployment, BatchJobGroup and KuberosJob entities (spec §3, §4.4,
//! §4.6), grounded on `main/models/batchjobs.py` and
//! `pykuberos/scheduler/job_scheduler.py`.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::deployment::PodPhaseTag;
use crate::manifest::{DeploymentManifest, LifecycleModule};

/// Random 10-letter lowercase slug/postfix, per spec §4.4.
pub fn random_slug() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .filter(|c| c.is_ascii_lowercase())
        .take(10)
        .map(char::from)
        .chain(std::iter::repeat('a'))
        .take(10)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobDeploymentStatus {
    Pending,
    Executing,
    WaitingForFinishing,
    Stopped,
    Finished,
    Cleaning,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct BatchJobDeployment {
    pub name: String,
    pub subname: Option<String>,
    pub status: BatchJobDeploymentStatus,
    pub manifest: DeploymentManifest,
    pub exec_clusters: Vec<String>,
    pub startup_timeout_secs: u64,
    pub running_timeout_secs: u64,
    pub scheduling_done_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub groups: Vec<BatchJobGroup>,
}

impl BatchJobDeployment {
    pub fn active(&self) -> bool {
        !matches!(
            self.status,
            BatchJobDeploymentStatus::Completed | BatchJobDeploymentStatus::Failed
        )
    }

    pub fn all_jobs(&self) -> impl Iterator<Item = &KuberosJob> {
        self.groups.iter().flat_map(|g| g.jobs.iter())
    }

    pub fn all_jobs_mut(&mut self) -> impl Iterator<Item = &mut KuberosJob> {
        self.groups.iter_mut().flat_map(|g| g.jobs.iter_mut())
    }

    pub fn pending_job_count(&self) -> usize {
        self.all_jobs()
            .filter(|j| j.status == KuberosJobStatus::Pending)
            .count()
    }

    pub fn in_flight_job_count(&self) -> usize {
        self.all_jobs().filter(|j| !j.status.is_terminal()).count()
    }

    /// Marks completed iff every child job reaches `COMPLETED`
    /// (spec §8 testable property for B).
    pub fn is_fully_completed(&self) -> bool {
        self.all_jobs().all(|j| j.status == KuberosJobStatus::Completed)
    }
}

/// One Cartesian cell of a parameter sweep, bound to a single exec cluster
/// (spec §3, §4.4). ConfigMap names are prefixed with `postfix` so groups
/// stay disjoint in one Kubernetes namespace.
#[derive(Debug, Clone)]
pub struct BatchJobGroup {
    pub postfix: String,
    pub queue_number: u32,
    pub exec_cluster: String,
    pub configmap_names: Vec<String>,
    pub lifecycle_module: LifecycleModule,
    pub repeat_count: u32,
    pub rendered_manifest: DeploymentManifest,
    pub jobs: Vec<KuberosJob>,
}

impl BatchJobGroup {
    pub fn configmap_name(&self, base: &str) -> String {
        format!("{}-{}", self.postfix, base)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KuberosJobStatus {
    Pending,
    Scheduled,
    Preparing,
    Prepared,
    Deploying,
    Running,
    Finished,
    Terminating,
    Completed,
}

impl KuberosJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, KuberosJobStatus::Completed)
    }
}

#[derive(Debug, Clone)]
pub struct VolumeSpec {
    /// `Local(host_path)` or `Nfs { server, path }`; `sub_path` follows
    /// spec §4.4 step 3(c): `<base>/queue_<n>/job_<slug>` when
    /// `groupDataInStorage` is set, else `<base>/job_<slug>`.
    pub backend: VolumeBackend,
    pub sub_path: String,
}

#[derive(Debug, Clone)]
pub enum VolumeBackend {
    HostPath(String),
    Nfs { server: String, path: String },
}

/// One execution instance inside a group (spec §3, §4.6). Outcome is
/// determined solely by the designated lifecycle module pod reaching
/// `Succeeded`.
#[derive(Debug, Clone)]
pub struct KuberosJob {
    pub slug: String,
    pub status: KuberosJobStatus,
    pub exec_cluster: String,
    pub target_node: Option<String>,
    pub discovery_server_pod_name: String,
    pub discovery_server_service_name: String,
    pub configmap_names: Vec<String>,
    pub volume: Option<VolumeSpec>,
    pub module_pod_names: Vec<String>,
    pub lifecycle_module_pod_name: String,
    pub pod_statuses: Vec<(String, PodPhaseTag)>,
    pub service_statuses: Vec<(String, bool)>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub running_at: Option<DateTime<Utc>>,
    pub startup_timeout_secs: u64,
    pub running_timeout_secs: u64,
    pub success_completed: Option<bool>,
}

impl KuberosJob {
    pub fn new(slug: impl Into<String>, startup_timeout_secs: u64, running_timeout_secs: u64) -> Self {
        KuberosJob {
            slug: slug.into(),
            status: KuberosJobStatus::Pending,
            exec_cluster: String::new(),
            target_node: None,
            discovery_server_pod_name: String::new(),
            discovery_server_service_name: String::new(),
            configmap_names: Vec::new(),
            volume: None,
            module_pod_names: Vec::new(),
            lifecycle_module_pod_name: String::new(),
            pod_statuses: Vec::new(),
            service_statuses: Vec::new(),
            scheduled_at: None,
            running_at: None,
            startup_timeout_secs,
            running_timeout_secs,
            success_completed: None,
        }
    }

    pub fn startup_expired(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_at {
            Some(at) => {
                matches!(
                    self.status,
                    KuberosJobStatus::Scheduled | KuberosJobStatus::Preparing | KuberosJobStatus::Prepared | KuberosJobStatus::Deploying
                ) && (now - at).num_seconds() as u64 >= self.startup_timeout_secs
            }
            None => false,
        }
    }

    pub fn running_expired(&self, now: DateTime<Utc>) -> bool {
        match self.running_at {
            Some(at) => {
                self.status == KuberosJobStatus::Running
                    && (now - at).num_seconds() as u64 >= self.running_timeout_secs
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_slug_is_ten_lowercase_chars() {
        let s = random_slug();
        assert_eq!(s.len(), 10);
        assert!(s.chars().all(|c| c.is_ascii_lowercase()));
    }
}
