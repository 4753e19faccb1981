//! Cluster and ClusterNode entities (spec §3), grounded on
//! `pykuberos/scheduler/node.py` and `main/models/clusters.py`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    ControlPlane,
    Onboard,
    Edge,
    Cloud,
    Unassigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCondition {
    Ready,
    NotReady,
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceSnapshot {
    pub cpu_allocatable_millis: i64,
    pub cpu_allocated_millis: i64,
    pub memory_allocatable_mi: i64,
    pub memory_allocated_mi: i64,
    pub num_pods: u32,
}

/// One node known to a cluster. Registered nodes must have
/// `role != Unassigned`; onboard nodes carry robot-name/robot-id labels
/// (spec §3 invariants).
#[derive(Debug, Clone)]
pub struct ClusterNode {
    pub hostname: String,
    pub role: NodeRole,
    pub labels: BTreeMap<String, String>,
    pub condition: NodeCondition,
    pub is_alive: bool,
    pub is_label_synced: bool,
    pub registered: bool,
    pub peripheral_devices: Vec<String>,
    pub resource_group: Option<String>,
    pub shared: bool,
    pub resources: ResourceSnapshot,
}

impl ClusterNode {
    pub fn robot_name(&self) -> Option<&str> {
        self.labels.get("robot.kuberos.io/name").map(|s| s.as_str())
    }

    pub fn is_valid_registered(&self) -> bool {
        !self.registered || self.role != NodeRole::Unassigned
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterAvailability {
    Available,
    Unavailable,
}

/// One registered cluster (spec §3). Deletion must be rejected while any
/// fleet references it — enforced by the caller, not this type.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    pub endpoint_url: String,
    pub service_token: String,
    pub ca_certificate_pem: Vec<u8>,
    pub distribution: String,
    pub version: String,
    pub availability: ClusterAvailability,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub consecutive_sync_failures: u32,
}

impl Cluster {
    /// Repeated sync failures flip the cluster to unavailable (spec §5).
    pub const MAX_CONSECUTIVE_SYNC_FAILURES: u32 = 3;

    pub fn record_sync_success(&mut self, at: DateTime<Utc>) {
        self.last_sync_at = Some(at);
        self.consecutive_sync_failures = 0;
        self.availability = ClusterAvailability::Available;
    }

    pub fn record_sync_failure(&mut self, at: DateTime<Utc>) {
        self.last_error_at = Some(at);
        self.consecutive_sync_failures += 1;
        if self.consecutive_sync_failures >= Self::MAX_CONSECUTIVE_SYNC_FAILURES {
            self.availability = ClusterAvailability::Unavailable;
        }
    }
}
