use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::{crate_authors, crate_description, crate_version, Parser};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tokio::sync::Mutex;

use kuberos_controller::{batchjob_controller, cluster_sync, deployment_controller, taskqueue, telemetry, Action, Metrics, Store, TaskQueue};
use kuberos_k8s_util::KubernetesExecutor;
use kuberos_scheduler::batch_scheduler::{NodeAllocability, VolumeConfig};
use kuberos_model::batchjob::VolumeBackend;

#[derive(Clone)]
struct AppState {
    metrics: Metrics,
}

#[get("/metrics")]
async fn metrics(state: Data<AppState>, _req: HttpRequest) -> impl Responder {
    let mut buf = String::new();
    match encode(&mut buf, &state.metrics.registry) {
        Ok(()) => HttpResponse::Ok()
            .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
            .body(buf),
        Err(e) => {
            tracing::error!("failed to encode metrics: {e:?}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[derive(Parser, Debug)]
#[command(
    name = "kuberos-server",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Listen on given port
    #[arg(short, long, default_value_t = 8080, env)]
    port: u32,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,kube=debug,kuberos_controller=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// This optional argument specifies the URL to which traces will be sent using
    /// OpenTelemetry. If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,

    /// Kubernetes namespace the executor targets on every managed cluster.
    #[arg(long, default_value = "kuberos", env)]
    namespace: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(&args.log_filter, args.log_format, args.tracing_url.as_deref(), args.sample_ratio).await?;

    let app_metrics = Metrics::default();
    let store = Store::new();

    let worker = run_workers(store, app_metrics.clone(), args.namespace.clone());

    let state = AppState { metrics: app_metrics.clone() };
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(metrics)
    })
    .bind(format!("0.0.0.0:{}", args.port))?
    .shutdown_timeout(5);

    // Both runtimes implement graceful shutdown, so poll until both are done.
    tokio::join!(worker, server.run()).1?;
    Ok(())
}

/// Background worker loop: every known cluster/deployment/batch-job record
/// has at most one scheduled tick in the queue at a time. A tick either
/// requeues itself at the countdown its handler asks for, or drops out
/// once the record reaches a terminal state (spec §5).
async fn run_workers(store: Store, metrics: Metrics, namespace: String) {
    let mut queue = TaskQueue::new();
    let executors: Arc<Mutex<HashMap<String, Arc<KubernetesExecutor>>>> = Arc::new(Mutex::new(HashMap::new()));
    let client_registry: Arc<Mutex<Registry>> = Arc::new(Mutex::new(Registry::with_prefix("kuberos_clients")));

    seed(&store, &mut queue).await;

    loop {
        let Some(key) = queue.next_due().await else {
            tokio::time::sleep(taskqueue::interval::TERMINAL_POLL).await;
            seed(&store, &mut queue).await;
            continue;
        };

        let Some((kind, name)) = key.split_once(':') else {
            continue;
        };

        let action = match kind {
            "cluster" => tick_cluster(name, &store, &metrics, &executors, &client_registry).await,
            "deployment" => tick_deployment(name, &store, &metrics, &executors, &client_registry, &namespace).await,
            "batch" => tick_batch(name, &store, &metrics, &executors, &client_registry, &namespace).await,
            _ => Action::Done,
        };

        if let Action::Requeue(delay) = action {
            queue.schedule(key, delay);
        }
    }
}

/// Schedules an immediate first tick for every record the store knows
/// about that doesn't already have one in flight.
async fn seed(store: &Store, queue: &mut TaskQueue) {
    for name in store.cluster_names().await {
        queue.schedule(format!("cluster:{name}"), Duration::ZERO);
    }
    for name in store.deployment_names().await {
        queue.schedule(format!("deployment:{name}"), Duration::ZERO);
    }
    for name in store.batch_deployment_names().await {
        queue.schedule(format!("batch:{name}"), Duration::ZERO);
    }
}

async fn executor_for(
    cluster_name: &str,
    store: &Store,
    executors: &Arc<Mutex<HashMap<String, Arc<KubernetesExecutor>>>>,
    client_registry: &Arc<Mutex<Registry>>,
) -> Option<Arc<KubernetesExecutor>> {
    if let Some(existing) = executors.lock().await.get(cluster_name) {
        return Some(existing.clone());
    }
    let cluster = store.get_cluster(cluster_name).await?;
    let mut registry = client_registry.lock().await;
    match cluster_sync::build_executor(&cluster, &mut registry).await {
        Ok(exec) => {
            let exec = Arc::new(exec);
            executors.lock().await.insert(cluster_name.to_string(), exec.clone());
            Some(exec)
        }
        Err(e) => {
            tracing::warn!(cluster = cluster_name, error = %e, "could not build executor for cluster");
            None
        }
    }
}

async fn tick_cluster(
    name: &str,
    store: &Store,
    metrics: &Metrics,
    executors: &Arc<Mutex<HashMap<String, Arc<KubernetesExecutor>>>>,
    client_registry: &Arc<Mutex<Registry>>,
) -> Action {
    let Some(executor) = executor_for(name, store, executors, client_registry).await else {
        return Action::Requeue(taskqueue::interval::TERMINAL_POLL);
    };
    match cluster_sync::tick(store, executor.as_ref(), &metrics.ticks, name).await {
        Ok(action) => action,
        Err(e) => {
            tracing::warn!(cluster = name, error = %e, "cluster sync tick failed");
            Action::Requeue(taskqueue::interval::TERMINAL_POLL)
        }
    }
}

async fn tick_deployment(
    name: &str,
    store: &Store,
    metrics: &Metrics,
    executors: &Arc<Mutex<HashMap<String, Arc<KubernetesExecutor>>>>,
    client_registry: &Arc<Mutex<Registry>>,
    namespace: &str,
) -> Action {
    let Some(deployment) = store.get_deployment(name).await else {
        return Action::Done;
    };
    let Some(fleet) = store.get_fleet(&deployment.fleet).await else {
        return Action::Done;
    };
    let Some(executor) = executor_for(&fleet.main_cluster, store, executors, client_registry).await else {
        return Action::Requeue(taskqueue::interval::TERMINAL_POLL);
    };
    let cluster_nodes = store.get_cluster_nodes(&fleet.main_cluster).await;

    // Fleet-node membership is carried by the fleet/cluster synchroniser,
    // which this process-local store doesn't model yet; treat every
    // cluster node as a fleet node one-to-one for the demo wiring.
    let fleet_nodes: Vec<kuberos_model::fleet::FleetNode> = cluster_nodes
        .iter()
        .map(|n| kuberos_model::fleet::FleetNode {
            hostname: n.hostname.clone(),
            fleet: fleet.name.clone(),
            cluster_node_hostname: n.hostname.clone(),
            status: kuberos_model::fleet::FleetNodeStatus::Deployable,
        })
        .collect();
    let device_params = std::collections::BTreeMap::new();

    match deployment_controller::tick(store, executor.as_ref(), namespace, &metrics.ticks, name, &fleet, &fleet_nodes, &cluster_nodes, &device_params).await {
        Ok(action) => action,
        Err(e) => {
            tracing::warn!(deployment = name, error = %e, "deployment tick failed");
            Action::Requeue(taskqueue::interval::TERMINAL_POLL)
        }
    }
}

async fn tick_batch(
    name: &str,
    store: &Store,
    metrics: &Metrics,
    executors: &Arc<Mutex<HashMap<String, Arc<KubernetesExecutor>>>>,
    client_registry: &Arc<Mutex<Registry>>,
    namespace: &str,
) -> Action {
    let Some(bjd) = store.get_batch_deployment(name).await else {
        return Action::Done;
    };
    let Some(exec_cluster) = bjd.exec_clusters.first().cloned() else {
        return Action::Done;
    };
    let Some(executor) = executor_for(&exec_cluster, store, executors, client_registry).await else {
        return Action::Requeue(taskqueue::interval::TERMINAL_POLL);
    };

    let mut nodes_by_cluster: HashMap<String, Vec<NodeAllocability>> = HashMap::new();
    for cluster in &bjd.exec_clusters {
        let nodes = store.get_cluster_nodes(cluster).await;
        nodes_by_cluster.insert(cluster.clone(), cluster_sync::allocability_snapshot(&nodes));
    }
    let nodes_by_cluster: std::collections::BTreeMap<_, _> = nodes_by_cluster.into_iter().collect();

    let volume = VolumeConfig {
        backend: VolumeBackend::HostPath("/data/kuberos".to_string()),
        base_path: "/data/kuberos".to_string(),
        group_data_in_storage: false,
    };

    match batchjob_controller::tick(store, executor.as_ref(), namespace, &metrics.ticks, name, &nodes_by_cluster, &volume).await {
        Ok(action) => action,
        Err(e) => {
            tracing::warn!(batch_deployment = name, error = %e, "batch deployment tick failed");
            Action::Requeue(taskqueue::interval::TERMINAL_POLL)
        }
    }
}
