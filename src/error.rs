//! Error types for discovery operations.

use thiserror::Error;

use crate::filter::FilterError;

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the discovery client.
///
/// A missing `Endpoints` object, or one without subsets, is not an error: it
/// yields an empty instance list.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The Kubernetes API call failed. Propagated unchanged, never retried.
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A subset exposes several ports and none of them is the primary port.
    ///
    /// `primary_port_name` is `None` when the subset carries no ports at all.
    #[error(
        "no primary port {} among the ports of service {service_id}",
        .primary_port_name.as_deref().unwrap_or("<any>")
    )]
    PrimaryPortNotFound {
        /// The service whose endpoints were being translated.
        service_id: String,
        /// The configured primary port name, if any.
        primary_port_name: Option<String>,
    },

    /// Endpoints exist but the `Service` object they belong to does not.
    #[error("endpoints found for service {service_id} but the service itself is missing")]
    ServiceMissing {
        /// The service that could not be fetched.
        service_id: String,
    },

    /// An endpoint port lies outside the valid TCP/UDP range.
    #[error("service {service_id} has an invalid endpoint port {port}")]
    InvalidPort {
        /// The service whose endpoints were being translated.
        service_id: String,
        /// The raw port value reported by the API server.
        port: i32,
    },

    /// The configured service filter expression is malformed.
    #[error("invalid service filter: {0}")]
    Filter(#[from] FilterError),

    /// The discovery configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Creates a configuration error with the given message.
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
