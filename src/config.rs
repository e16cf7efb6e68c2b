//! Discovery configuration.
//!
//! A [`DiscoveryConfig`] is built once at startup, from code, a JSON document
//! or the process environment, and then handed to the discovery client by
//! value. Nothing here is global.
//!
//! # Environment variables
//!
//! [`DiscoveryConfig::from_env`] reads the following variables; unset
//! variables keep their defaults:
//!
//! - `KUBERNETES_DISCOVERY_ENABLED`: `true` or `false` (default: `true`)
//! - `KUBERNETES_DISCOVERY_SERVICE_NAME`: name of the local service (default: `unknown`)
//! - `KUBERNETES_DISCOVERY_NAMESPACE`: namespace to query (default: the client's namespace)
//! - `KUBERNETES_DISCOVERY_ALL_NAMESPACES`: query every namespace (default: `false`)
//! - `KUBERNETES_DISCOVERY_FILTER`: service filter expression
//! - `KUBERNETES_DISCOVERY_KNOWN_SECURE_PORTS`: comma-separated ports (default: `443,8443`)
//! - `KUBERNETES_DISCOVERY_SERVICE_LABELS`: comma-separated `key=value` pairs
//! - `KUBERNETES_DISCOVERY_PRIMARY_PORT_NAME`: name of the primary port
//! - `KUBERNETES_DISCOVERY_METADATA_ADD_LABELS`, `..._LABELS_PREFIX`
//! - `KUBERNETES_DISCOVERY_METADATA_ADD_ANNOTATIONS`, `..._ANNOTATIONS_PREFIX`
//! - `KUBERNETES_DISCOVERY_METADATA_ADD_PORTS`, `..._PORTS_PREFIX` (default prefix: `port.`)

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::error::{Error, Result};

const ENV_PREFIX: &str = "KUBERNETES_DISCOVERY_";

/// Configuration for Kubernetes service discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscoveryConfig {
    /// Whether discovery is enabled at all.
    pub enabled: bool,

    /// The service name of the local instance.
    pub service_name: String,

    /// The Kubernetes namespace to query.
    /// If `None`, uses the current namespace from the kube client.
    pub namespace: Option<String>,

    /// Look up endpoints and services across every namespace.
    pub all_namespaces: bool,

    /// Expression selecting services *after* they were listed from the API server.
    pub filter: Option<String>,

    /// Port numbers that are considered secure and use HTTPS.
    pub known_secure_ports: BTreeSet<u16>,

    /// Only services carrying all of these labels are listed from the API server.
    pub service_labels: BTreeMap<String, String>,

    /// Name of the port used as the primary port when a subset exposes several.
    pub primary_port_name: Option<String>,

    /// Which service attributes end up in instance metadata.
    pub metadata: MetadataConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "unknown".to_string(),
            namespace: None,
            all_namespaces: false,
            filter: None,
            known_secure_ports: BTreeSet::from([443, 8443]),
            service_labels: BTreeMap::new(),
            primary_port_name: None,
            metadata: MetadataConfig::default(),
        }
    }
}

/// Controls how labels, annotations and ports become instance metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetadataConfig {
    /// Copy the service's labels into instance metadata.
    pub add_labels: bool,

    /// Prefix for label keys.
    pub labels_prefix: Option<String>,

    /// Copy the service's annotations into instance metadata.
    pub add_annotations: bool,

    /// Prefix for annotation keys.
    pub annotations_prefix: Option<String>,

    /// Add every named endpoint port to instance metadata.
    pub add_ports: bool,

    /// Prefix for port keys.
    pub ports_prefix: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            add_labels: true,
            labels_prefix: None,
            add_annotations: true,
            annotations_prefix: None,
            add_ports: true,
            ports_prefix: "port.".to_string(),
        }
    }
}

impl DiscoveryConfig {
    /// Creates a configuration with defaults for the given local service name.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Sets an explicit namespace for lookups.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Looks up endpoints and services in every namespace.
    #[must_use]
    pub fn all_namespaces(mut self, all_namespaces: bool) -> Self {
        self.all_namespaces = all_namespaces;
        self
    }

    /// Sets the post-fetch service filter expression.
    #[must_use]
    pub fn filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = Some(expression.into());
        self
    }

    /// Adds a label that listed services must carry.
    #[must_use]
    pub fn service_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.service_labels.insert(key.into(), value.into());
        self
    }

    /// Sets the name of the primary port.
    #[must_use]
    pub fn primary_port_name(mut self, name: impl Into<String>) -> Self {
        self.primary_port_name = Some(name.into());
        self
    }

    /// Replaces the set of ports considered secure.
    #[must_use]
    pub fn known_secure_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.known_secure_ports = ports.into_iter().collect();
        self
    }

    /// Replaces the metadata options.
    #[must_use]
    pub fn metadata(mut self, metadata: MetadataConfig) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the configured primary port name, ignoring blank values.
    #[must_use]
    pub fn primary_port(&self) -> Option<&str> {
        self.primary_port_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }

    /// Returns the configured filter expression, ignoring blank values.
    #[must_use]
    pub fn filter_expression(&self) -> Option<&str> {
        self.filter.as_deref().filter(|expr| !expr.trim().is_empty())
    }

    /// Renders `service_labels` as a Kubernetes equality label selector.
    ///
    /// Returns `None` when no labels are configured.
    #[must_use]
    pub fn label_selector(&self) -> Option<String> {
        catalog::label_selector(&self.service_labels)
    }

    /// Parses a configuration from a JSON document.
    ///
    /// Keys are camelCase; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is not valid JSON or has the wrong shape.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid JSON: {e}")))
    }

    /// Reads a JSON configuration from a reader, such as an opened file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if reading fails or the document is invalid.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        serde_json::from_reader(reader).map_err(|e| Error::config(format!("invalid JSON: {e}")))
    }

    /// Builds a configuration from the process environment.
    ///
    /// See the [module documentation](self) for the recognized variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable holds an unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Builds a configuration from `(name, value)` pairs shaped like environment variables.
    ///
    /// Variables without the `KUBERNETES_DISCOVERY_` prefix are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable holds an unparseable value.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };

            let value = value.into();
            match name {
                "ENABLED" => config.enabled = parse_bool(name, &value)?,
                "SERVICE_NAME" => config.service_name = value,
                "NAMESPACE" => config.namespace = Some(value),
                "ALL_NAMESPACES" => config.all_namespaces = parse_bool(name, &value)?,
                "FILTER" => config.filter = Some(value),
                "KNOWN_SECURE_PORTS" => config.known_secure_ports = parse_ports(&value)?,
                "SERVICE_LABELS" => config.service_labels = parse_labels(&value)?,
                "PRIMARY_PORT_NAME" => config.primary_port_name = Some(value),
                "METADATA_ADD_LABELS" => config.metadata.add_labels = parse_bool(name, &value)?,
                "METADATA_LABELS_PREFIX" => config.metadata.labels_prefix = Some(value),
                "METADATA_ADD_ANNOTATIONS" => {
                    config.metadata.add_annotations = parse_bool(name, &value)?;
                }
                "METADATA_ANNOTATIONS_PREFIX" => config.metadata.annotations_prefix = Some(value),
                "METADATA_ADD_PORTS" => config.metadata.add_ports = parse_bool(name, &value)?,
                "METADATA_PORTS_PREFIX" => config.metadata.ports_prefix = value,
                _ => tracing::debug!("ignoring unknown discovery variable {ENV_PREFIX}{name}"),
            }
        }

        Ok(config)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("true") => Ok(true),
        v if v.eq_ignore_ascii_case("false") => Ok(false),
        v => Err(Error::config(format!(
            "{ENV_PREFIX}{name} must be true or false, got {v:?}"
        ))),
    }
}

fn parse_ports(value: &str) -> Result<BTreeSet<u16>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u16>()
                .map_err(|_| Error::config(format!("invalid secure port {p:?}")))
        })
        .collect()
}

fn parse_labels(value: &str) -> Result<BTreeMap<String, String>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| Error::config(format!("invalid service label {pair:?}")))
        })
        .collect()
}
