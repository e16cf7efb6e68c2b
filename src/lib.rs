#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Kubernetes service discovery built on `Service` and `Endpoints` objects.
//!
//! This crate answers two questions about a Kubernetes cluster: which
//! services exist, and where the instances of a given service can be reached.
//! Each endpoint address becomes a [`ServiceInstance`] carrying the service's
//! labels, annotations and named ports as metadata, and a flag telling whether
//! it should be reached over HTTPS.
//!
//! # Features
//!
//! - **Instance discovery**: one instance per endpoint address, with primary-port
//!   selection when a subset exposes several ports
//! - **Metadata propagation**: labels, annotations and named ports, with configurable key prefixes
//! - **Secure endpoint detection**: well-known HTTPS ports or a `secured` label/annotation
//! - **Two-stage service filtering**: a label selector applied by the API server, then a
//!   [filter expression](filter) applied to the listed services
//!
//! # Usage
//!
//! ```ignore
//! use kube_service_discovery::{DiscoveryConfig, KubernetesDiscoveryClient};
//!
//! let config = DiscoveryConfig::new("my-app")
//!     .primary_port_name("http")
//!     .filter("metadata.labels['team'] == 'core'");
//!
//! let Some(client) = KubernetesDiscoveryClient::try_default(config).await? else {
//!     return Ok(()); // discovery disabled
//! };
//!
//! for name in client.get_services().await? {
//!     for instance in client.get_instances(&name).await? {
//!         println!("{name}: {}", instance.uri());
//!     }
//! }
//! ```

pub mod catalog;
mod client;
pub mod config;
mod error;
pub mod filter;
mod instance;
pub mod instances;
pub mod metadata;
pub mod secure;

pub use catalog::{KubeCatalog, ServiceCatalog, StaticCatalog};
pub use client::KubernetesDiscoveryClient;
pub use config::{DiscoveryConfig, MetadataConfig};
pub use error::{Error, Result};
pub use filter::{FilterError, ServiceFilter};
pub use instance::ServiceInstance;
pub use secure::{DefaultSecurePortResolver, SecurePortResolver};
