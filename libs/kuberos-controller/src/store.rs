//! In-memory record store.
//!
//! Persistence of the fleet/cluster/deployment catalog is explicitly out
//! of scope (spec §1 "out of scope" list) — it's an external collaborator
//! this crate assumes exists. What lives here is a minimal stand-in good
//! enough to drive the reconcile loops and the test crate: one `RwLock`
//! per collection, matching the "per-record row update inside a
//! transaction" serialisation spec §5 calls for with a single lock
//! acquisition per write.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use kuberos_model::batchjob::BatchJobDeployment;
use kuberos_model::cluster::{Cluster, ClusterNode};
use kuberos_model::deployment::Deployment;
use kuberos_model::fleet::Fleet;

#[derive(Clone, Default)]
pub struct Store {
    clusters: Arc<RwLock<BTreeMap<String, Cluster>>>,
    cluster_nodes: Arc<RwLock<BTreeMap<String, Vec<ClusterNode>>>>,
    fleets: Arc<RwLock<BTreeMap<String, Fleet>>>,
    deployments: Arc<RwLock<BTreeMap<String, Deployment>>>,
    batch_deployments: Arc<RwLock<BTreeMap<String, BatchJobDeployment>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_cluster(&self, cluster: Cluster) {
        self.clusters.write().await.insert(cluster.name.clone(), cluster);
    }

    pub async fn get_cluster(&self, name: &str) -> Option<Cluster> {
        self.clusters.read().await.get(name).cloned()
    }

    pub async fn cluster_names(&self) -> Vec<String> {
        self.clusters.read().await.keys().cloned().collect()
    }

    /// Replaces the inventory snapshot for one cluster, taken by the
    /// periodic cluster synchroniser (spec §4.2/§5).
    pub async fn put_cluster_nodes(&self, cluster: &str, nodes: Vec<ClusterNode>) {
        self.cluster_nodes.write().await.insert(cluster.to_string(), nodes);
    }

    pub async fn get_cluster_nodes(&self, cluster: &str) -> Vec<ClusterNode> {
        self.cluster_nodes.read().await.get(cluster).cloned().unwrap_or_default()
    }

    pub async fn put_fleet(&self, fleet: Fleet) {
        self.fleets.write().await.insert(fleet.name.clone(), fleet);
    }

    pub async fn get_fleet(&self, name: &str) -> Option<Fleet> {
        self.fleets.read().await.get(name).cloned()
    }

    /// Applies `f` to the deployment under a single write-lock hold, so a
    /// multi-field phase+status update commits atomically (spec §5).
    pub async fn update_deployment<F>(&self, name: &str, f: F)
    where
        F: FnOnce(&mut Deployment),
    {
        if let Some(dep) = self.deployments.write().await.get_mut(name) {
            f(dep);
        }
    }

    pub async fn put_deployment(&self, deployment: Deployment) {
        self.deployments.write().await.insert(deployment.name.clone(), deployment);
    }

    pub async fn get_deployment(&self, name: &str) -> Option<Deployment> {
        self.deployments.read().await.get(name).cloned()
    }

    pub async fn deployment_names(&self) -> Vec<String> {
        self.deployments.read().await.keys().cloned().collect()
    }

    pub async fn put_batch_deployment(&self, bjd: BatchJobDeployment) {
        self.batch_deployments.write().await.insert(bjd.name.clone(), bjd);
    }

    pub async fn update_batch_deployment<F>(&self, name: &str, f: F)
    where
        F: FnOnce(&mut BatchJobDeployment),
    {
        if let Some(bjd) = self.batch_deployments.write().await.get_mut(name) {
            f(bjd);
        }
    }

    pub async fn get_batch_deployment(&self, name: &str) -> Option<BatchJobDeployment> {
        self.batch_deployments.read().await.get(name).cloned()
    }

    pub async fn batch_deployment_names(&self) -> Vec<String> {
        self.batch_deployments.read().await.keys().cloned().collect()
    }
}
