//! Building instance metadata from a service's labels, annotations and ports.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EndpointPort, Service};

use crate::config::MetadataConfig;

/// The parts of a Kubernetes `Service` that feed instance metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServiceMetadataSource<'a> {
    /// Name of the service.
    pub name: &'a str,
    /// Labels of the service, if any.
    pub labels: Option<&'a BTreeMap<String, String>>,
    /// Annotations of the service, if any.
    pub annotations: Option<&'a BTreeMap<String, String>>,
}

impl<'a> ServiceMetadataSource<'a> {
    /// Borrows the metadata of a Kubernetes `Service`.
    #[must_use]
    pub fn from_service(service: &'a Service) -> Self {
        Self {
            name: service.metadata.name.as_deref().unwrap_or_default(),
            labels: service.metadata.labels.as_ref(),
            annotations: service.metadata.annotations.as_ref(),
        }
    }
}

/// Builds the complete metadata for one endpoint subset.
///
/// Labels are applied first, then annotations, then ports; a later entry
/// replaces an earlier one with the same key.
#[must_use]
pub fn build_metadata(
    service: &ServiceMetadataSource<'_>,
    ports: &[EndpointPort],
    options: &MetadataConfig,
) -> BTreeMap<String, String> {
    let mut metadata = service_metadata(service, options);
    metadata.extend(port_metadata(ports, options));
    metadata
}

/// Builds the service-level part of the metadata: labels and annotations.
#[must_use]
pub fn service_metadata(
    service: &ServiceMetadataSource<'_>,
    options: &MetadataConfig,
) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    if options.add_labels {
        let labels = with_prefixed_keys(service.labels, options.labels_prefix.as_deref());
        tracing::debug!("adding label metadata: {labels:?}");
        metadata.extend(labels);
    }

    if options.add_annotations {
        let annotations =
            with_prefixed_keys(service.annotations, options.annotations_prefix.as_deref());
        tracing::debug!("adding annotation metadata: {annotations:?}");
        metadata.extend(annotations);
    }

    metadata
}

/// Builds the port part of the metadata for one subset.
///
/// Only named ports are included; unnamed ports are skipped.
#[must_use]
pub fn port_metadata(ports: &[EndpointPort], options: &MetadataConfig) -> BTreeMap<String, String> {
    if !options.add_ports {
        return BTreeMap::new();
    }

    let metadata: BTreeMap<String, String> = ports
        .iter()
        .filter_map(|p| {
            let name = p.name.as_deref().filter(|n| !n.is_empty())?;
            Some((format!("{}{name}", options.ports_prefix), p.port.to_string()))
        })
        .collect();

    tracing::debug!("adding port metadata: {metadata:?}");
    metadata
}

/// Copies `entries`, prefixing every key. An absent or blank prefix leaves keys unchanged.
fn with_prefixed_keys(
    entries: Option<&BTreeMap<String, String>>,
    prefix: Option<&str>,
) -> BTreeMap<String, String> {
    let Some(entries) = entries else {
        return BTreeMap::new();
    };

    let prefix = prefix.filter(|p| !p.trim().is_empty()).unwrap_or_default();
    entries
        .iter()
        .map(|(k, v)| (format!("{prefix}{k}"), v.clone()))
        .collect()
}
