//! The discovered service instance.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// One network endpoint of a discovered service.
///
/// Built once per endpoint address and never modified afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInstance {
    instance_id: Option<String>,
    service_id: String,
    namespace: Option<String>,
    host: String,
    port: u16,
    secure: bool,
    metadata: BTreeMap<String, String>,
}

impl ServiceInstance {
    pub(crate) fn new(
        instance_id: Option<String>,
        service_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        secure: bool,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            instance_id,
            service_id: service_id.into(),
            namespace: None,
            host: host.into(),
            port,
            secure,
            metadata,
        }
    }

    pub(crate) fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// UID of the pod (or other object) backing this endpoint, if known.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// The service this instance belongs to.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Namespace of the `Endpoints` object this instance was read from.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// IP address of the endpoint.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The subset's primary port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the endpoint should be reached over HTTPS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Labels, annotations and ports propagated from the service.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// `https` for secure instances, `http` otherwise.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }

    /// The instance address as `scheme://host:port`.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("{}://{self}", self.scheme())
    }
}

/// Formats as `host:port`, bracketing IPv6 hosts.
impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => write!(f, "[{ip}]:{}", self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}
