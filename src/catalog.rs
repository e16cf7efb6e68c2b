//! Access to `Service` and `Endpoints` objects.
//!
//! [`ServiceCatalog`] is the seam between discovery and the Kubernetes API.
//! [`KubeCatalog`] implements it with a [`kube::Client`]; [`StaticCatalog`]
//! serves a fixed set of objects from memory.

use std::collections::BTreeMap;
use std::future::Future;

use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ListParams;
use kube::{Api, Client};

use crate::error::Result;

/// Fetches the Kubernetes objects discovery is built from.
///
/// Implementations perform plain lookups: no caching, retries or watches.
/// Failures are returned as-is and propagated to the discovery caller.
pub trait ServiceCatalog: Send + Sync {
    /// Fetches the `Endpoints` object with the given name.
    ///
    /// `namespace` of `None` means the catalog's default namespace.
    fn fetch_endpoints(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> impl Future<Output = Result<Option<Endpoints>>> + Send;

    /// Fetches the `Service` object with the given name.
    ///
    /// `namespace` of `None` means the catalog's default namespace.
    fn fetch_service(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> impl Future<Output = Result<Option<Service>>> + Send;

    /// Lists services carrying all of the given labels.
    fn list_services(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<Vec<Service>>> + Send;

    /// Finds `Endpoints` objects with the given name in every namespace.
    fn find_endpoints(&self, name: &str) -> impl Future<Output = Result<Vec<Endpoints>>> + Send;
}

/// Renders labels as an equality-based label selector such as `app=shop,tier=web`.
pub(crate) fn label_selector(labels: &BTreeMap<String, String>) -> Option<String> {
    if labels.is_empty() {
        return None;
    }

    let selector = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");

    Some(selector)
}

/// A [`ServiceCatalog`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCatalog {
    client: Client,
    namespace: String,
    all_namespaces: bool,
}

impl KubeCatalog {
    /// Creates a catalog.
    ///
    /// If `namespace` is `None`, uses the current namespace from the kube client.
    /// With `all_namespaces`, services are listed cluster-wide.
    #[must_use]
    pub fn new(client: Client, namespace: Option<String>, all_namespaces: bool) -> Self {
        let namespace = namespace.unwrap_or_else(|| client.default_namespace().to_string());
        Self {
            client,
            namespace,
            all_namespaces,
        }
    }

    /// The namespace used when a lookup does not name one.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace.unwrap_or(&self.namespace))
    }
}

impl ServiceCatalog for KubeCatalog {
    async fn fetch_endpoints(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<Endpoints>> {
        let api: Api<Endpoints> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn fetch_service(&self, name: &str, namespace: Option<&str>) -> Result<Option<Service>> {
        let api: Api<Service> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_services(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Service>> {
        let api: Api<Service> = if self.all_namespaces {
            Api::all(self.client.clone())
        } else {
            self.namespaced(None)
        };

        let mut params = ListParams::default();
        if let Some(selector) = label_selector(labels) {
            params = params.labels(&selector);
        }

        Ok(api.list(&params).await?.items)
    }

    async fn find_endpoints(&self, name: &str) -> Result<Vec<Endpoints>> {
        let api: Api<Endpoints> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("metadata.name={name}"));
        Ok(api.list(&params).await?.items)
    }
}

/// A [`ServiceCatalog`] serving a fixed set of objects from memory.
///
/// Objects without a namespace belong to the catalog's default namespace.
/// Listing returns services in insertion order.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    namespace: String,
    all_namespaces: bool,
    endpoints: Vec<Endpoints>,
    services: Vec<Service>,
}

impl StaticCatalog {
    /// Creates an empty catalog with the given default namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Lists services from every namespace instead of only the default one.
    #[must_use]
    pub fn all_namespaces(mut self, all_namespaces: bool) -> Self {
        self.all_namespaces = all_namespaces;
        self
    }

    /// Adds an `Endpoints` object.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints.push(endpoints);
        self
    }

    /// Adds a `Service` object.
    #[must_use]
    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    fn in_namespace(&self, meta: &ObjectMeta, namespace: Option<&str>) -> bool {
        let wanted = namespace.unwrap_or(&self.namespace);
        meta.namespace.as_deref().unwrap_or(&self.namespace) == wanted
    }

    fn is_named(&self, meta: &ObjectMeta, name: &str, namespace: Option<&str>) -> bool {
        meta.name.as_deref() == Some(name) && self.in_namespace(meta, namespace)
    }
}

impl ServiceCatalog for StaticCatalog {
    async fn fetch_endpoints(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<Endpoints>> {
        Ok(self
            .endpoints
            .iter()
            .find(|e| self.is_named(&e.metadata, name, namespace))
            .cloned())
    }

    async fn fetch_service(&self, name: &str, namespace: Option<&str>) -> Result<Option<Service>> {
        Ok(self
            .services
            .iter()
            .find(|s| self.is_named(&s.metadata, name, namespace))
            .cloned())
    }

    async fn list_services(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Service>> {
        Ok(self
            .services
            .iter()
            .filter(|s| self.all_namespaces || self.in_namespace(&s.metadata, None))
            .filter(|s| {
                labels.iter().all(|(k, v)| {
                    s.metadata
                        .labels
                        .as_ref()
                        .and_then(|l| l.get(k))
                        .is_some_and(|actual| actual == v)
                })
            })
            .cloned()
            .collect())
    }

    async fn find_endpoints(&self, name: &str) -> Result<Vec<Endpoints>> {
        Ok(self
            .endpoints
            .iter()
            .filter(|e| e.metadata.name.as_deref() == Some(name))
            .cloned()
            .collect())
    }
}
