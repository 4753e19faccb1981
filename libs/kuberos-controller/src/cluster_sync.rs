//! Periodic per-cluster inventory refresh: lists nodes, turns the raw
//! `NodeView`s into [`ClusterNode`]s and feeds `record_sync_success` /
//! `record_sync_failure` (spec §4.2, §5 "cluster sync error state gates
//! further writes"). Grounded on `pykuberos/scheduler/node.py`'s node
//! registration checks.

use std::collections::BTreeMap;

use chrono::Utc;
use prometheus_client::registry::Registry;
use tracing::warn;

use kuberos_k8s_util::{client, KubernetesExecutor, OpResult};
use kuberos_model::cluster::{Cluster, ClusterNode, NodeCondition, NodeRole, ResourceSnapshot};

use kuberos_scheduler::batch_scheduler::NodeAllocability;

use crate::error::{Error, Result};
use crate::metrics::TickMetrics;
use crate::store::Store;
use crate::taskqueue::{interval, Action};

const ROBOT_NAME_LABEL: &str = "robot.kuberos.io/name";
const ROLE_LABEL: &str = "kuberos.io/role";
const RESOURCE_GROUP_LABEL: &str = "kuberos.io/resource-group";
const SHARED_LABEL: &str = "kuberos.io/shared";

fn role_from_labels(labels: &BTreeMap<String, String>) -> NodeRole {
    match labels.get(ROLE_LABEL).map(String::as_str) {
        Some("onboard") => NodeRole::Onboard,
        Some("edge") => NodeRole::Edge,
        Some("cloud") => NodeRole::Cloud,
        Some("control-plane") => NodeRole::ControlPlane,
        _ => NodeRole::Unassigned,
    }
}

/// Builds a fresh `KubernetesExecutor` bound to this cluster's stored
/// credentials. Unlike the teacher's single in-cluster client, every call
/// here targets a different remote cluster (spec's "remote fleet
/// orchestrator" framing), so nothing is cached across ticks.
pub async fn build_executor(cluster: &Cluster, metrics_registry: &mut Registry) -> Result<KubernetesExecutor> {
    let config = client::config_from_cluster_credentials(&cluster.endpoint_url, &cluster.service_token, &cluster.ca_certificate_pem, "default")
        .await
        .map_err(Error::K8s)?;
    let kube_client = client::new_client_with_metrics(config, metrics_registry)
        .await
        .map_err(|e| Error::K8s(kuberos_k8s_util::Error::from_kube(e)))?;
    Ok(KubernetesExecutor::new(kube_client))
}

/// Refreshes one cluster's node inventory and records sync success/failure
/// on the `Cluster` record. Returns the freshly observed nodes so the
/// caller can persist them via [`Store::put_cluster_nodes`].
pub async fn sync_nodes(executor: &KubernetesExecutor, cluster: &mut Cluster) -> Result<Vec<ClusterNode>> {
    let now = Utc::now();
    let views = match executor.list_nodes(true).await {
        OpResult::Success(v) => v,
        OpResult::Rejected { message, .. } => {
            cluster.record_sync_failure(now);
            return Err(Error::Rejected(cluster.name.clone(), message));
        }
        OpResult::Failed(e) => {
            cluster.record_sync_failure(now);
            return Err(Error::K8s(e));
        }
    };

    let nodes = views
        .into_iter()
        .map(|view| {
            let registered = view.labels.contains_key(ROLE_LABEL);
            ClusterNode {
                hostname: view.hostname,
                role: role_from_labels(&view.labels),
                condition: if view.ready { NodeCondition::Ready } else { NodeCondition::NotReady },
                is_alive: view.ready,
                is_label_synced: registered,
                registered,
                peripheral_devices: Vec::new(),
                resource_group: view.labels.get(RESOURCE_GROUP_LABEL).cloned(),
                shared: view.labels.get(SHARED_LABEL).map(|v| v == "true").unwrap_or(false),
                resources: ResourceSnapshot {
                    num_pods: view.pods.as_ref().map(|p| p.len() as u32).unwrap_or(0),
                    cpu_allocatable_millis: view.allocatable_cpu_millis,
                    cpu_allocated_millis: view
                        .pods
                        .as_ref()
                        .map(|p| p.iter().map(|s| s.cpu_request_millis).sum())
                        .unwrap_or(0),
                    ..Default::default()
                },
                labels: view.labels,
            }
        })
        .collect::<Vec<_>>();

    cluster.record_sync_success(now);
    Ok(nodes)
}

/// One background tick: syncs a single cluster and requeues itself at the
/// terminal-state poll interval — node inventory is ambient state, not
/// something any deployment blocks waiting on (spec §5).
pub async fn tick(store: &Store, executor: &KubernetesExecutor, metrics: &TickMetrics, cluster_name: &str) -> Result<Action> {
    let _measurer = metrics.count_and_measure("cluster_sync");

    let Some(mut cluster) = store.get_cluster(cluster_name).await else {
        return Ok(Action::Done);
    };

    match sync_nodes(executor, &mut cluster).await {
        Ok(nodes) => {
            store.put_cluster(cluster.clone()).await;
            store.put_cluster_nodes(cluster_name, nodes).await;
        }
        Err(e) => {
            metrics.set_failure("cluster_sync", &e);
            store.put_cluster(cluster).await;
        }
    }

    report_node_usage(executor, cluster_name).await;

    Ok(Action::Requeue(interval::TERMINAL_POLL))
}

/// Logs live CPU usage per node (spec §4.2 `nodeMetrics()`) alongside the
/// inventory sync. Usage is diagnostic only — the batch scheduler places
/// work against `Node.status.allocatable` and summed pod requests, not
/// against live usage, so a missing `metrics.k8s.io` endpoint (common on
/// clusters without the metrics-server add-on) never blocks scheduling.
async fn report_node_usage(executor: &KubernetesExecutor, cluster_name: &str) {
    match executor.node_metrics().await {
        OpResult::Success(views) => {
            for v in views {
                tracing::debug!(cluster = cluster_name, node = %v.hostname, cpu_usage_millis = v.cpu_usage_millis, "node metrics");
            }
        }
        OpResult::Rejected { message, .. } => {
            warn!(cluster = cluster_name, message, "metrics API rejected nodeMetrics request");
        }
        OpResult::Failed(e) => {
            warn!(cluster = cluster_name, error = %e, "nodeMetrics unavailable");
        }
    }
}

/// Reduces a cluster's node snapshot into the allocability table the batch
/// scheduler's placement step consumes (spec §4.4 step 1).
pub fn allocability_snapshot(nodes: &[ClusterNode]) -> Vec<NodeAllocability> {
    nodes
        .iter()
        .filter(|n| n.is_alive)
        .map(|n| NodeAllocability {
            hostname: n.hostname.clone(),
            cpu_allocatable_millis: n.resources.cpu_allocatable_millis,
            cpu_allocated_millis: n.resources.cpu_allocated_millis,
            num_pods_on_node: n.resources.num_pods,
        })
        .collect()
}
