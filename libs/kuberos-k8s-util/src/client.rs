use crate::metrics::MetricsLayer;

use hyper_util::rt::TokioExecutor;
use kube::Result;
use kube::{client::ConfigExt, Client, Config};
use prometheus_client::registry::Registry;
use tower::ServiceBuilder;

/// Builds a `kube::Client` for one registered cluster, instrumented with the
/// same request-duration/status-code metrics the executor reports through
/// `/metrics`. One of these is built per `Cluster` record the first time the
/// cluster synchroniser needs to talk to it, then cached by the caller.
pub async fn new_client_with_metrics(config: Config, registry: &mut Registry) -> Result<Client> {
    let metrics_layer = MetricsLayer::new(registry);
    let https = config.rustls_https_connector()?;
    let service = ServiceBuilder::new()
        .layer(metrics_layer)
        .layer(config.base_uri_layer())
        .option_layer(config.auth_layer()?)
        .service(hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(https));

    Ok(Client::new(service, config.default_namespace))
}

/// Builds a `kube::Config` from the cluster record's stored credentials
/// (endpoint URL, bearer service-account token, PEM CA certificate) rather
/// than from the ambient kubeconfig / in-cluster service account the teacher
/// operator relies on — this process talks to many remote clusters, never
/// to "the" cluster it runs inside.
pub async fn config_from_cluster_credentials(
    endpoint: &str,
    service_token: &str,
    ca_cert_pem: &[u8],
    default_namespace: &str,
) -> Result<Config, crate::Error> {
    use kube::config::{AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext};

    let cluster_name = "kuberos-target".to_string();
    let auth_name = "kuberos-sa".to_string();
    let context_name = "kuberos-ctx".to_string();

    let kubeconfig = Kubeconfig {
        clusters: vec![NamedCluster {
            name: cluster_name.clone(),
            cluster: Some(Cluster {
                server: Some(endpoint.to_string()),
                certificate_authority_data: Some(base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    ca_cert_pem,
                )),
                ..Default::default()
            }),
        }],
        auth_infos: vec![NamedAuthInfo {
            name: auth_name.clone(),
            auth_info: Some(AuthInfo {
                token: Some(service_token.to_string().into()),
                ..Default::default()
            }),
        }],
        contexts: vec![NamedContext {
            name: context_name.clone(),
            context: Some(Context {
                cluster: cluster_name,
                user: auth_name,
                namespace: Some(default_namespace.to_string()),
                ..Default::default()
            }),
        }],
        current_context: Some(context_name),
        ..Default::default()
    };

    let options = kube::config::KubeConfigOptions::default();
    Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| crate::Error::ClusterNotReachable(e.to_string()))
}
