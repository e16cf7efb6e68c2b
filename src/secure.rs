//! Deciding whether a discovered endpoint speaks HTTPS.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::DiscoveryConfig;

/// Label or annotation key marking a whole service as secure.
pub const SECURED_MARKER: &str = "secured";

/// Everything a [`SecurePortResolver`] may look at.
#[derive(Clone, Copy, Debug)]
pub struct PortSecurityInput<'a> {
    /// The chosen endpoint port.
    pub port: u16,
    /// Name of the Kubernetes service.
    pub service_name: &'a str,
    /// Labels of the Kubernetes service.
    pub labels: Option<&'a BTreeMap<String, String>>,
    /// Annotations of the Kubernetes service.
    pub annotations: Option<&'a BTreeMap<String, String>>,
}

/// Decides whether a service port should be marked secure.
///
/// Implementations must be pure: the discovery client calls them concurrently
/// without any synchronization.
pub trait SecurePortResolver: Send + Sync {
    /// Returns `true` if the endpoint should be treated as secure.
    fn resolve(&self, input: &PortSecurityInput<'_>) -> bool;
}

/// The default policy, evaluated in order:
///
/// 1. the port is one of the configured known secure ports;
/// 2. the service has a `secured: "true"` label or annotation (case-insensitive);
/// 3. otherwise the endpoint is not secure.
#[derive(Clone, Debug)]
pub struct DefaultSecurePortResolver {
    known_secure_ports: BTreeSet<u16>,
}

impl DefaultSecurePortResolver {
    /// Creates a resolver that treats the given ports as secure.
    #[must_use]
    pub fn new(known_secure_ports: BTreeSet<u16>) -> Self {
        Self { known_secure_ports }
    }

    /// Creates a resolver from the discovery configuration.
    #[must_use]
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.known_secure_ports.clone())
    }
}

impl SecurePortResolver for DefaultSecurePortResolver {
    fn resolve(&self, input: &PortSecurityInput<'_>) -> bool {
        if self.known_secure_ports.contains(&input.port) {
            tracing::debug!(
                "considering service {} secure: port {} is a known secure port",
                input.service_name,
                input.port
            );
            return true;
        }

        if is_marked_secured(input.labels) {
            tracing::debug!(
                "considering service {} secure: it has a '{SECURED_MARKER}' label",
                input.service_name
            );
            return true;
        }

        if is_marked_secured(input.annotations) {
            tracing::debug!(
                "considering service {} secure: it has a '{SECURED_MARKER}' annotation",
                input.service_name
            );
            return true;
        }

        false
    }
}

fn is_marked_secured(entries: Option<&BTreeMap<String, String>>) -> bool {
    entries
        .and_then(|e| e.get(SECURED_MARKER))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}
