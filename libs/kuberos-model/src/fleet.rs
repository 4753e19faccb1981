//! Fleet and FleetNode entities (spec §3), grounded on
//! `pykuberos/scheduler/fleet.py` and `main/models/fleets.py`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetStatus {
    Pending,
    Idle,
    PartiallyUsed,
    FullyUsed,
    InProgress,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetNodeStatus {
    Deployable,
    Active,
    Deploying,
    Releasing,
    Offline,
    Error,
    Unknown,
    Deactivated,
}

#[derive(Debug, Clone)]
pub struct FleetNode {
    pub hostname: String,
    pub fleet: String,
    /// Weak reference: the backing cluster node outlives the fleet node
    /// (spec §3 ownership notes).
    pub cluster_node_hostname: String,
    pub status: FleetNodeStatus,
}

#[derive(Debug, Clone)]
pub struct Fleet {
    pub name: String,
    pub main_cluster: String,
    pub healthy: bool,
    pub status: FleetStatus,
}

impl Fleet {
    /// Fleet status is derived deterministically from counts of
    /// deployable/in-use FleetNodes (spec §3 invariant).
    pub fn derive_status(healthy: bool, nodes: &[FleetNode]) -> FleetStatus {
        if !healthy {
            return FleetStatus::Error;
        }
        if nodes.is_empty() {
            return FleetStatus::Pending;
        }
        let deployable = nodes
            .iter()
            .filter(|n| n.status == FleetNodeStatus::Deployable)
            .count();
        let in_use = nodes
            .iter()
            .filter(|n| matches!(n.status, FleetNodeStatus::Active | FleetNodeStatus::Deploying))
            .count();
        let erroring = nodes
            .iter()
            .any(|n| matches!(n.status, FleetNodeStatus::Error));

        if erroring {
            FleetStatus::Error
        } else if in_use > 0 && deployable > 0 {
            FleetStatus::PartiallyUsed
        } else if in_use > 0 && deployable == 0 {
            FleetStatus::FullyUsed
        } else if deployable == nodes.len() {
            FleetStatus::Idle
        } else {
            FleetStatus::InProgress
        }
    }

    /// A fleet is deployable for a deployment request iff it is healthy,
    /// not empty, and (if robots are named) all of them are present
    /// (spec §4.3 step 1 — `FleetResourceCheckFailed` otherwise).
    pub fn is_deployable(&self, nodes: &[FleetNode], required_robots: &[String]) -> bool {
        if !self.healthy || nodes.is_empty() {
            return false;
        }
        required_robots
            .iter()
            .all(|r| nodes.iter().any(|n| n.hostname == *r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(status: FleetNodeStatus) -> FleetNode {
        FleetNode {
            hostname: "robot-1".into(),
            fleet: "f".into(),
            cluster_node_hostname: "robot-1".into(),
            status,
        }
    }

    #[test]
    fn idle_when_all_deployable() {
        let nodes = vec![node(FleetNodeStatus::Deployable), node(FleetNodeStatus::Deployable)];
        assert_eq!(Fleet::derive_status(true, &nodes), FleetStatus::Idle);
    }

    #[test]
    fn partially_used_when_mixed() {
        let nodes = vec![node(FleetNodeStatus::Deployable), node(FleetNodeStatus::Active)];
        assert_eq!(Fleet::derive_status(true, &nodes), FleetStatus::PartiallyUsed);
    }

    #[test]
    fn fully_used_when_none_deployable() {
        let nodes = vec![node(FleetNodeStatus::Active), node(FleetNodeStatus::Active)];
        assert_eq!(Fleet::derive_status(true, &nodes), FleetStatus::FullyUsed);
    }

    #[test]
    fn unhealthy_is_error_regardless_of_nodes() {
        let nodes = vec![node(FleetNodeStatus::Deployable)];
        assert_eq!(Fleet::derive_status(false, &nodes), FleetStatus::Error);
    }
}
