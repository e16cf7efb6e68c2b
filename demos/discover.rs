//! Discovery example printing the services and instances visible to this pod.
//!
//! # Running in Kubernetes
//!
//! The example expects to run inside a Kubernetes cluster (or with a
//! kubeconfig) with permission to get and list `Service` and `Endpoints`
//! resources.
//!
//! # Environment Variables
//!
//! - `KUBERNETES_DISCOVERY_*`: discovery configuration (see `DiscoveryConfig::from_env`)
//! - `DISCOVERY_CONFIG_FILE`: JSON configuration file, used instead of the variables above
//! - `SERVICE_ID`: only print instances of this service (default: all listed services)

use std::env;
use std::fs::File;

use kube_service_discovery::{DiscoveryConfig, KubernetesDiscoveryClient};
use tracing::{Level, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    // Read configuration from a file or the environment
    let config = match env::var("DISCOVERY_CONFIG_FILE") {
        Ok(path) => DiscoveryConfig::from_reader(File::open(path)?)?,
        Err(_) => DiscoveryConfig::from_env()?,
    };
    let service_id = env::var("SERVICE_ID").ok();

    info!("Service name: {}", config.service_name);
    if let Some(ref ns) = config.namespace {
        info!("Namespace: {ns}");
    }

    if let Some(ref filter) = config.filter {
        info!("Filter: {filter}");
    }

    let Some(client) = KubernetesDiscoveryClient::try_default(config).await? else {
        warn!("Discovery is disabled, nothing to do");
        return Ok(());
    };

    info!("Using {}", client.description());

    let services = match service_id {
        Some(id) => vec![id],
        None => client.get_services().await?,
    };

    info!("Found {} services\n", services.len());

    for service in &services {
        let instances = client.get_instances(service).await?;
        info!("{service}: {} instances", instances.len());

        for instance in &instances {
            info!(
                "  {} (id: {}, namespace: {})",
                instance.uri(),
                instance.instance_id().unwrap_or("-"),
                instance.namespace().unwrap_or("-")
            );

            for (key, value) in instance.metadata() {
                info!("    {key} = {value}");
            }
        }
    }

    Ok(())
}
