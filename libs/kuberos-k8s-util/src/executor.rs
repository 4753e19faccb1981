//! Thin typed wrapper over the Kubernetes API (spec §4.2).
//!
//! Every operation returns a tagged [`OpResult`] instead of a bare
//! `Result<T, Error>` so callers (the schedulers and controllers) can
//! distinguish "the cluster rejected this as invalid" from "the cluster is
//! unreachable" from "it worked" without inspecting error strings — this
//! mirrors `kuberos_executer.py`'s `ExecutionResponse` tagging
//! (pending/success/rejected/failed).

use crate::error::{Error, ReasonCode};

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Secret, Service};
use kube::api::{Api, AttachParams, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::instrument;

/// Outcome of one executor call.
#[derive(Debug)]
pub enum OpResult<T> {
    Success(T),
    /// Request was well-formed but the cluster refused it (e.g. already exists
    /// with conflicting spec). Not a transport failure.
    Rejected { reason: ReasonCode, message: String },
    Failed(Error),
}

impl<T> OpResult<T> {
    pub fn success(v: T) -> Self {
        OpResult::Success(v)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OpResult::Success(_))
    }
}

fn from_kube_result<T>(r: Result<T, kube::Error>) -> OpResult<T> {
    match r {
        Ok(v) => OpResult::Success(v),
        Err(e) => OpResult::Failed(Error::from_kube(e)),
    }
}

/// A normalised pod phase, replacing the source's dynamically-typed status
/// JSON blob with a closed sum type (design note §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodObservedStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Synthetic phase: `deletionTimestamp` is set but the pod still exists.
    Terminating,
    /// Synthetic phase: a `GET` for this pod returned 404.
    NotFound,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ContainerStatusView {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
    pub state_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PodView {
    pub phase: PodObservedStatus,
    pub containers: Vec<ContainerStatusView>,
    pub pod_ip: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub conditions: Vec<String>,
}

impl PodView {
    fn not_found() -> Self {
        PodView {
            phase: PodObservedStatus::NotFound,
            containers: Vec::new(),
            pod_ip: None,
            reason: None,
            message: None,
            conditions: Vec::new(),
        }
    }

    fn from_pod(pod: &Pod) -> Self {
        if pod.metadata.deletion_timestamp.is_some() {
            return PodView {
                phase: PodObservedStatus::Terminating,
                containers: Vec::new(),
                pod_ip: None,
                reason: None,
                message: None,
                conditions: Vec::new(),
            };
        }
        let status = pod.status.clone().unwrap_or_default();
        let phase = match status.phase.as_deref() {
            Some("Pending") => PodObservedStatus::Pending,
            Some("Running") => PodObservedStatus::Running,
            Some("Succeeded") => PodObservedStatus::Succeeded,
            Some("Failed") => PodObservedStatus::Failed,
            _ => PodObservedStatus::Unknown,
        };
        let containers = status
            .container_statuses
            .unwrap_or_default()
            .into_iter()
            .map(|c| {
                let state_reason = c.state.as_ref().and_then(|s| {
                    s.waiting
                        .as_ref()
                        .and_then(|w| w.reason.clone())
                        .or_else(|| s.terminated.as_ref().and_then(|t| t.reason.clone()))
                });
                ContainerStatusView {
                    name: c.name,
                    ready: c.ready,
                    restart_count: c.restart_count,
                    state_reason,
                }
            })
            .collect();
        let conditions = status
            .conditions
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.type_)
            .collect();
        PodView {
            phase,
            containers,
            pod_ip: status.pod_ip,
            reason: status.reason,
            message: status.message,
            conditions,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceView {
    pub found: bool,
    pub cluster_ip: Option<String>,
    pub ports: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct NodeView {
    pub hostname: String,
    pub labels: BTreeMap<String, String>,
    pub conditions: Vec<(String, String)>,
    pub ready: bool,
    pub pods: Option<Vec<PodSummary>>,
    /// From `Node.status.allocatable["cpu"]` — the capacity the scheduler's
    /// allocability check (spec §4.4 step 1) measures against, distinct
    /// from live usage reported by the metrics aggregation endpoint.
    pub allocatable_cpu_millis: i64,
}

#[derive(Debug, Clone)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub cpu_request_millis: i64,
}

/// One write-into-pod file to be materialised via `writeFileIntoPod`.
pub struct PodFile<'a> {
    pub dst_path: &'a str,
    pub content_lines: &'a [String],
}

/// One node's live CPU usage as reported by the metrics aggregation
/// endpoint (`metrics.k8s.io`), per `nodeMetrics()` in spec §4.2.
#[derive(Debug, Clone)]
pub struct NodeMetricsView {
    pub hostname: String,
    pub cpu_usage_millis: i64,
}

/// One pod's live CPU usage, summed across containers, per `podMetrics()`
/// in spec §4.2.
#[derive(Debug, Clone)]
pub struct PodMetricsView {
    pub name: String,
    pub namespace: String,
    pub cpu_usage_millis: i64,
}

fn sum_usage_cpu_millis(containers: &[serde_json::Value]) -> i64 {
    containers
        .iter()
        .filter_map(|c| c.get("usage")?.get("cpu")?.as_str())
        .map(parse_cpu_millis)
        .sum()
}

/// Kubernetes executor for a single target cluster, bound to one `kube::Client`.
pub struct KubernetesExecutor {
    client: Client,
}

impl KubernetesExecutor {
    pub fn new(client: Client) -> Self {
        KubernetesExecutor { client }
    }

    #[instrument(skip(self))]
    pub async fn ensure_namespace(&self, ns: &str) -> OpResult<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(ns).await {
            Ok(existing) => OpResult::Success(existing),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let manifest = Namespace {
                    metadata: ObjectMeta {
                        name: Some(ns.to_owned()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                from_kube_result(api.create(&PostParams::default(), &manifest).await)
            }
            Err(e) => OpResult::Failed(Error::from_kube(e)),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_nodes(&self, with_pod_listings: bool) -> OpResult<Vec<NodeView>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = match api.list(&ListParams::default()).await {
            Ok(l) => l,
            Err(e) => return OpResult::Failed(Error::from_kube(e)),
        };

        let pod_api: Api<Pod> = Api::all(self.client.clone());
        let mut views = Vec::with_capacity(nodes.items.len());
        for node in nodes.items {
            let hostname = node.name_any();
            let labels = node.metadata.labels.clone().unwrap_or_default();
            let status = node.status.unwrap_or_default();
            let conditions: Vec<(String, String)> = status
                .conditions
                .unwrap_or_default()
                .into_iter()
                .map(|c| (c.type_, c.status))
                .collect();
            let ready = conditions
                .iter()
                .any(|(t, s)| t == "Ready" && s == "True");
            let allocatable_cpu_millis = status
                .allocatable
                .as_ref()
                .and_then(|a| a.get("cpu"))
                .map(|q| parse_cpu_millis(&q.0))
                .unwrap_or(0);

            let pods = if with_pod_listings {
                let field_selector = format!("spec.nodeName={hostname}");
                match pod_api
                    .list(&ListParams::default().fields(&field_selector))
                    .await
                {
                    Ok(list) => Some(
                        list.items
                            .into_iter()
                            .map(|p| {
                                let cpu_request_millis = p
                                    .spec
                                    .as_ref()
                                    .map(|s| {
                                        s.containers
                                            .iter()
                                            .filter_map(|c| {
                                                c.resources.as_ref().and_then(|r| {
                                                    r.requests
                                                        .as_ref()
                                                        .and_then(|m| m.get("cpu"))
                                                        .map(|q| parse_cpu_millis(&q.0))
                                                })
                                            })
                                            .sum()
                                    })
                                    .unwrap_or(0);
                                PodSummary {
                                    name: p.name_any(),
                                    namespace: p.namespace().unwrap_or_default(),
                                    cpu_request_millis,
                                }
                            })
                            .collect(),
                    ),
                    Err(_) => None,
                }
            } else {
                None
            };

            views.push(NodeView {
                hostname,
                labels,
                conditions,
                ready,
                pods,
                allocatable_cpu_millis,
            });
        }
        OpResult::Success(views)
    }

    #[instrument(skip(self, labels))]
    pub async fn patch_node_labels(
        &self,
        host: &str,
        labels: BTreeMap<String, String>,
    ) -> OpResult<BTreeMap<String, String>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "labels": labels } });
        match api
            .patch(host, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(node) => OpResult::Success(node.metadata.labels.unwrap_or_default()),
            Err(e) => OpResult::Failed(Error::from_kube(e)),
        }
    }

    /// `nodeMetrics()` (spec §4.2): live CPU usage per node from the metrics
    /// aggregation endpoint. `k8s-openapi` carries no types for the
    /// `metrics.k8s.io` aggregated API, so this goes through kube's
    /// `DynamicObject` the way any non-builtin API group does.
    #[instrument(skip(self))]
    pub async fn node_metrics(&self) -> OpResult<Vec<NodeMetricsView>> {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "NodeMetrics"));
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let list = match api.list(&ListParams::default()).await {
            Ok(l) => l,
            Err(e) => return OpResult::Failed(Error::from_kube(e)),
        };
        let views = list
            .items
            .into_iter()
            .map(|obj| {
                let hostname = obj.name_any();
                let cpu_usage_millis = obj
                    .data
                    .get("usage")
                    .and_then(|u| u.get("cpu"))
                    .and_then(|c| c.as_str())
                    .map(parse_cpu_millis)
                    .unwrap_or(0);
                NodeMetricsView { hostname, cpu_usage_millis }
            })
            .collect();
        OpResult::Success(views)
    }

    /// `podMetrics()` (spec §4.2): per-pod CPU usage summed across
    /// containers, scoped to one namespace.
    #[instrument(skip(self))]
    pub async fn pod_metrics(&self, namespace: &str) -> OpResult<Vec<PodMetricsView>> {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics"));
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let list = match api.list(&ListParams::default()).await {
            Ok(l) => l,
            Err(e) => return OpResult::Failed(Error::from_kube(e)),
        };
        let views = list
            .items
            .into_iter()
            .map(|obj| {
                let name = obj.name_any();
                let namespace = obj.namespace().unwrap_or_default();
                let containers = obj.data.get("containers").and_then(|c| c.as_array()).cloned().unwrap_or_default();
                let cpu_usage_millis = sum_usage_cpu_millis(&containers);
                PodMetricsView { name, namespace, cpu_usage_millis }
            })
            .collect();
        OpResult::Success(views)
    }

    #[instrument(skip(self, pod))]
    pub async fn create_pod(&self, namespace: &str, pod: Pod) -> OpResult<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), &pod).await {
            Ok(p) => OpResult::Success(p),
            Err(e) => {
                let err = Error::from_kube(e);
                if err.is_transport_failure() {
                    return OpResult::Failed(err);
                }
                OpResult::Rejected {
                    reason: ReasonCode::FailedToCreatePod,
                    message: err.to_string(),
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn read_pod(&self, namespace: &str, name: &str) -> OpResult<PodView> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(pod) => OpResult::Success(PodView::from_pod(&pod)),
            Err(kube::Error::Api(e)) if e.code == 404 => OpResult::Success(PodView::not_found()),
            Err(e) => OpResult::Failed(Error::from_kube(e)),
        }
    }

    /// Grace period fixed at 3s per spec §4.2.
    #[instrument(skip(self))]
    pub async fn delete_pod(&self, namespace: &str, name: &str) -> OpResult<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let dp = DeleteParams {
            grace_period_seconds: Some(3),
            ..Default::default()
        };
        match api.delete(name, &dp).await {
            Ok(_) => OpResult::Success(()),
            Err(kube::Error::Api(e)) if e.code == 404 => OpResult::Success(()),
            Err(e) => OpResult::Failed(Error::from_kube(e)),
        }
    }

    #[instrument(skip(self, service))]
    pub async fn create_service(&self, namespace: &str, service: Service) -> OpResult<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        from_kube_result(api.create(&PostParams::default(), &service).await)
    }

    #[instrument(skip(self))]
    pub async fn read_service(&self, namespace: &str, name: &str) -> OpResult<ServiceView> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(svc) => {
                let spec = svc.spec.unwrap_or_default();
                OpResult::Success(ServiceView {
                    found: true,
                    cluster_ip: spec.cluster_ip,
                    ports: spec
                        .ports
                        .unwrap_or_default()
                        .into_iter()
                        .map(|p| p.port)
                        .collect(),
                })
            }
            Err(kube::Error::Api(e)) if e.code == 404 => OpResult::Success(ServiceView {
                found: false,
                cluster_ip: None,
                ports: Vec::new(),
            }),
            Err(e) => OpResult::Failed(Error::from_kube(e)),
        }
    }

    #[instrument(skip(self))]
    pub async fn delete_service(&self, namespace: &str, name: &str) -> OpResult<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => OpResult::Success(()),
            Err(kube::Error::Api(e)) if e.code == 404 => OpResult::Success(()),
            Err(e) => OpResult::Failed(Error::from_kube(e)),
        }
    }

    #[instrument(skip(self, data))]
    pub async fn create_configmap(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> OpResult<ConfigMap> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        match api.create(&PostParams::default(), &cm).await {
            Ok(c) => OpResult::Success(c),
            Err(e) => {
                let err = Error::from_kube(e);
                if err.is_transport_failure() {
                    return OpResult::Failed(err);
                }
                OpResult::Rejected {
                    reason: ReasonCode::FailedToCreateConfigMap,
                    message: err.to_string(),
                }
            }
        }
    }

    /// Delete treats not-found as success (spec §4.2).
    #[instrument(skip(self))]
    pub async fn delete_configmap(&self, namespace: &str, name: &str) -> OpResult<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => OpResult::Success(()),
            Err(kube::Error::Api(e)) if e.code == 404 => OpResult::Success(()),
            Err(e) => {
                let err = Error::from_kube(e);
                if err.is_transport_failure() {
                    return OpResult::Failed(err);
                }
                OpResult::Rejected {
                    reason: ReasonCode::FailedToDeleteConfigMap,
                    message: err.to_string(),
                }
            }
        }
    }

    /// `update` semantics are delete+create under the hood (spec §4.2).
    #[instrument(skip(self, encoded_docker_config_json))]
    pub async fn create_docker_config_secret(
        &self,
        namespace: &str,
        name: &str,
        encoded_docker_config_json: &str,
    ) -> OpResult<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        // delete any stale secret of the same name first so repeated calls are idempotent updates.
        let _ = api.delete(name, &DeleteParams::default()).await;

        let mut data = BTreeMap::new();
        data.insert(
            ".dockerconfigjson".to_string(),
            k8s_openapi::ByteString(encoded_docker_config_json.as_bytes().to_vec()),
        );
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            type_: Some("kubernetes.io/dockerconfigjson".to_string()),
            data: Some(data),
            ..Default::default()
        };
        from_kube_result(api.create(&PostParams::default(), &secret).await)
    }

    #[instrument(skip(self, files))]
    pub async fn write_file_into_pod(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        files: &[PodFile<'_>],
    ) -> OpResult<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        for file in files {
            let mut script = format!("cat << 'EOF' > {}\n", file.dst_path);
            for line in file.content_lines {
                script.push_str(line);
                script.push('\n');
            }
            script.push_str("EOF\n");

            let mut ap = AttachParams::default().stdin(false).stdout(true).stderr(true);
            if let Some(c) = container {
                ap = ap.container(c);
            }
            let attached = api
                .exec(pod, vec!["/bin/sh", "-c", &script], &ap)
                .await;
            match attached {
                Ok(mut process) => {
                    if let Some(status) = process.take_status() {
                        let _ = status.await;
                    }
                }
                Err(e) => return OpResult::Failed(Error::from_kube(e)),
            }
        }
        OpResult::Success(())
    }
}

/// Normalises the manifest's CPU field, which accepts either a bare core
/// count ("1.5") or a millicore string ("500m"), to a millicore integer.
pub fn parse_cpu_millis(raw: &str) -> i64 {
    if let Some(stripped) = raw.strip_suffix('m') {
        stripped.parse().unwrap_or(0)
    } else {
        raw.parse::<f64>().map(|c| (c * 1000.0).round() as i64).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_millicore_string() {
        assert_eq!(parse_cpu_millis("500m"), 500);
    }

    #[test]
    fn parses_core_count() {
        assert_eq!(parse_cpu_millis("1.5"), 1500);
        assert_eq!(parse_cpu_millis("2"), 2000);
    }
}
