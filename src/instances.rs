//! Translation of Kubernetes `Endpoints` into [`ServiceInstance`]s.

use k8s_openapi::api::core::v1::{EndpointPort, Endpoints, Service};

use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::instance::ServiceInstance;
use crate::metadata::{ServiceMetadataSource, port_metadata, service_metadata};
use crate::secure::{PortSecurityInput, SecurePortResolver};

/// Converts the subsets of an `Endpoints` object into service instances.
///
/// Every address of every subset becomes one instance, in subset then address
/// order. The instance port is the subset's primary port (see
/// [`select_primary_port`]) and its metadata combines the service's labels and
/// annotations with the subset's named ports.
///
/// `service` is the `Service` the endpoints belong to. It is only needed when
/// there is at least one subset.
///
/// # Errors
///
/// - [`Error::ServiceMissing`] if there are subsets but `service` is `None`
/// - [`Error::PrimaryPortNotFound`] if a subset has no usable primary port
/// - [`Error::InvalidPort`] if the chosen port is not a valid port number
///
/// No instances are returned if any subset fails.
pub fn instances_from_endpoints<R>(
    service_id: &str,
    endpoints: &Endpoints,
    service: Option<&Service>,
    config: &DiscoveryConfig,
    resolver: &R,
) -> Result<Vec<ServiceInstance>>
where
    R: SecurePortResolver + ?Sized,
{
    let subsets = endpoints.subsets.as_deref().unwrap_or_default();
    if subsets.is_empty() {
        tracing::debug!("no endpoint subsets for service {service_id}");
        return Ok(Vec::new());
    }

    let Some(service) = service else {
        return Err(Error::ServiceMissing {
            service_id: service_id.to_string(),
        });
    };

    let source = ServiceMetadataSource::from_service(service);
    let base_metadata = service_metadata(&source, &config.metadata);
    let namespace = endpoints.metadata.namespace.as_ref();
    let mut instances = Vec::new();

    for subset in subsets {
        let addresses = subset.addresses.as_deref().unwrap_or_default();
        if addresses.is_empty() {
            continue;
        }

        let ports = subset.ports.as_deref().unwrap_or_default();
        let primary = select_primary_port(service_id, ports, config.primary_port())?;
        let port = u16::try_from(primary.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::InvalidPort {
                service_id: service_id.to_string(),
                port: primary.port,
            })?;

        tracing::debug!(
            "using port {port} ({}) of service {service_id}",
            primary.name.as_deref().unwrap_or("unnamed")
        );

        let mut metadata = base_metadata.clone();
        metadata.extend(port_metadata(ports, &config.metadata));

        let secure = resolver.resolve(&PortSecurityInput {
            port,
            service_name: source.name,
            labels: source.labels,
            annotations: source.annotations,
        });

        for address in addresses {
            let instance_id = address.target_ref.as_ref().and_then(|r| r.uid.clone());
            let instance = ServiceInstance::new(
                instance_id,
                service_id,
                address.ip.clone(),
                port,
                secure,
                metadata.clone(),
            )
            .with_namespace(namespace.cloned());

            instances.push(instance);
        }
    }

    Ok(instances)
}

/// Picks the port that discovered instances are reported with.
///
/// - A subset with a single port uses that port.
/// - Otherwise, if `primary_port_name` is given, the port with that name
///   (ignoring ASCII case) is used.
/// - Otherwise some port of the subset is used. This is currently the first
///   listed one, but callers must not rely on which port is chosen.
///
/// # Errors
///
/// Returns [`Error::PrimaryPortNotFound`] if no port qualifies, including when
/// the subset has no ports at all.
pub fn select_primary_port<'a>(
    service_id: &str,
    ports: &'a [EndpointPort],
    primary_port_name: Option<&str>,
) -> Result<&'a EndpointPort> {
    if let [port] = ports {
        return Ok(port);
    }

    let found = match primary_port_name {
        Some(name) => ports.iter().find(|p| {
            p.name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        }),
        None => ports.first(),
    };

    found.ok_or_else(|| Error::PrimaryPortNotFound {
        service_id: service_id.to_string(),
        primary_port_name: primary_port_name.map(String::from),
    })
}
