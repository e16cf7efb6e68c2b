//! The discovery-facing client.

use futures::future::try_join_all;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::Client;

use crate::catalog::{KubeCatalog, ServiceCatalog};
use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::filter::ServiceFilter;
use crate::instance::ServiceInstance;
use crate::instances::instances_from_endpoints;
use crate::secure::{DefaultSecurePortResolver, SecurePortResolver};

/// Discovers service instances and service names from Kubernetes.
///
/// The client keeps no state besides its configuration, so it can be shared
/// freely between tasks. Every call goes to the catalog; nothing is cached.
pub struct KubernetesDiscoveryClient<C, R = DefaultSecurePortResolver> {
    catalog: C,
    config: DiscoveryConfig,
    resolver: R,
}

impl KubernetesDiscoveryClient<KubeCatalog> {
    /// Creates a client talking to the cluster from the ambient Kubernetes configuration.
    ///
    /// Returns `None` if discovery is disabled in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kube`](crate::Error::Kube) if no Kubernetes client
    /// configuration (in-cluster or kubeconfig) can be loaded.
    pub async fn try_default(config: DiscoveryConfig) -> Result<Option<Self>> {
        if !config.enabled {
            tracing::info!("Kubernetes discovery is disabled");
            return Ok(None);
        }

        let client = Client::try_default().await?;
        let catalog = KubeCatalog::new(client, config.namespace.clone(), config.all_namespaces);

        tracing::info!(
            "Kubernetes discovery for {} using namespace {}{}",
            config.service_name,
            catalog.namespace(),
            if config.all_namespaces { " (all namespaces)" } else { "" }
        );

        Ok(Some(Self::new(catalog, config)))
    }
}

impl<C: ServiceCatalog> KubernetesDiscoveryClient<C> {
    /// Creates a client using the default secure-port policy.
    #[must_use]
    pub fn new(catalog: C, config: DiscoveryConfig) -> Self {
        let resolver = DefaultSecurePortResolver::from_config(&config);
        Self::with_resolver(catalog, config, resolver)
    }
}

impl<C, R> KubernetesDiscoveryClient<C, R>
where
    C: ServiceCatalog,
    R: SecurePortResolver,
{
    /// Creates a client with a custom secure-port policy.
    #[must_use]
    pub fn with_resolver(catalog: C, config: DiscoveryConfig, resolver: R) -> Self {
        Self {
            catalog,
            config,
            resolver,
        }
    }

    /// A human-readable description of this client.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn description(&self) -> &'static str {
        "Kubernetes Discovery Client"
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// The catalog this client reads from.
    #[must_use]
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Returns every instance of the service, one per endpoint address.
    ///
    /// A service without endpoints has no instances; this is not an error.
    ///
    /// # Errors
    ///
    /// Fails if a catalog lookup fails or the endpoints cannot be translated
    /// (see [`instances_from_endpoints`]). No partial results are returned.
    pub async fn get_instances(&self, service_id: &str) -> Result<Vec<ServiceInstance>> {
        if self.config.all_namespaces {
            return self.get_instances_in_all_namespaces(service_id).await;
        }

        let namespace = self.config.namespace.as_deref();
        let Some(endpoints) = self.catalog.fetch_endpoints(service_id, namespace).await? else {
            tracing::debug!("no endpoints for service {service_id}");
            return Ok(Vec::new());
        };

        if !has_subsets(&endpoints) {
            tracing::debug!("no endpoint subsets for service {service_id}");
            return Ok(Vec::new());
        }

        let service = self.catalog.fetch_service(service_id, namespace).await?;
        let instances = instances_from_endpoints(
            service_id,
            &endpoints,
            service.as_ref(),
            &self.config,
            &self.resolver,
        )?;

        tracing::debug!("Kubernetes discovery: {} instances for {service_id}", instances.len());
        Ok(instances)
    }

    async fn get_instances_in_all_namespaces(
        &self,
        service_id: &str,
    ) -> Result<Vec<ServiceInstance>> {
        let found: Vec<Endpoints> = self
            .catalog
            .find_endpoints(service_id)
            .await?
            .into_iter()
            .filter(has_subsets)
            .collect();

        let services = try_join_all(found.iter().map(|endpoints| {
            self.catalog
                .fetch_service(service_id, endpoints.metadata.namespace.as_deref())
        }))
        .await?;

        let mut instances = Vec::new();
        for (endpoints, service) in found.iter().zip(&services) {
            instances.extend(instances_from_endpoints(
                service_id,
                endpoints,
                service.as_ref(),
                &self.config,
                &self.resolver,
            )?);
        }

        tracing::debug!(
            "Kubernetes discovery: {} instances for {service_id} across {} namespaces",
            instances.len(),
            found.len()
        );
        Ok(instances)
    }

    /// Returns the names of all services matching the configured labels and filter.
    ///
    /// Names keep the order in which the catalog listed the services;
    /// duplicates are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Filter`](crate::Error::Filter) if the configured
    /// filter expression is malformed, or the catalog's error if listing fails.
    pub async fn get_services(&self) -> Result<Vec<String>> {
        let Some(expression) = self.config.filter_expression() else {
            return self.get_services_with(|_| true).await;
        };

        let filter = ServiceFilter::new(expression)?;
        self.get_services_with(|service| filter.matches(service)).await
    }

    /// Returns the names of services matching the configured labels and `predicate`.
    ///
    /// The configured filter expression is not applied.
    ///
    /// # Errors
    ///
    /// Returns the catalog's error if listing fails.
    pub async fn get_services_with<F>(&self, predicate: F) -> Result<Vec<String>>
    where
        F: Fn(&Service) -> bool,
    {
        let services = self.catalog.list_services(&self.config.service_labels).await?;
        let total = services.len();

        let names: Vec<String> = services
            .into_iter()
            .filter(|s| predicate(s))
            .filter_map(|s| s.metadata.name)
            .collect();

        tracing::debug!("Kubernetes discovery: {} of {total} services selected", names.len());
        Ok(names)
    }
}

fn has_subsets(endpoints: &Endpoints) -> bool {
    endpoints.subsets.as_ref().is_some_and(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use k8s_openapi::api::core::v1::{
        EndpointAddress, EndpointPort, EndpointSubset, ObjectReference,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;
    use crate::Error;
    use crate::catalog::StaticCatalog;

    // Helper to create an endpoints object with one subset
    fn make_endpoints(
        namespace: &str,
        ips: &[(&str, Option<&str>)],
        ports: &[(&str, i32)],
    ) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some("endpoint".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(
                    ips.iter()
                        .map(|(ip, uid)| EndpointAddress {
                            ip: (*ip).to_string(),
                            target_ref: uid.map(|uid| ObjectReference {
                                uid: Some(uid.to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ports: Some(
                    ports
                        .iter()
                        .map(|(name, port)| EndpointPort {
                            name: Some((*name).to_string()),
                            port: *port,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }]),
        }
    }

    fn make_service(name: &str, namespace: &str, labels: &[(&str, &str)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Counts service lookups and optionally fails every call.
    struct CountingCatalog {
        inner: StaticCatalog,
        service_fetches: AtomicUsize,
        fail: bool,
    }

    impl CountingCatalog {
        fn new(inner: StaticCatalog) -> Self {
            Self {
                inner,
                service_fetches: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(StaticCatalog::new("test"))
            }
        }

        fn check(&self) -> Result<()> {
            if self.fail {
                return Err(Error::Kube(kube::Error::Service("connection refused".into())));
            }
            Ok(())
        }
    }

    impl ServiceCatalog for CountingCatalog {
        async fn fetch_endpoints(
            &self,
            name: &str,
            namespace: Option<&str>,
        ) -> Result<Option<Endpoints>> {
            self.check()?;
            self.inner.fetch_endpoints(name, namespace).await
        }

        async fn fetch_service(
            &self,
            name: &str,
            namespace: Option<&str>,
        ) -> Result<Option<Service>> {
            self.check()?;
            self.service_fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_service(name, namespace).await
        }

        async fn list_services(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Service>> {
            self.check()?;
            self.inner.list_services(labels).await
        }

        async fn find_endpoints(&self, name: &str) -> Result<Vec<Endpoints>> {
            self.check()?;
            self.inner.find_endpoints(name).await
        }
    }

    #[test]
    fn description() {
        let client =
            KubernetesDiscoveryClient::new(StaticCatalog::new("test"), DiscoveryConfig::default());
        assert_eq!(client.description(), "Kubernetes Discovery Client");
    }

    fn assert_send_sync<T: Send + Sync>() {}

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn clients_are_shareable_between_tasks() {
        assert_send_sync::<KubernetesDiscoveryClient<KubeCatalog>>();
        assert_send_sync::<KubernetesDiscoveryClient<StaticCatalog>>();

        let client =
            KubernetesDiscoveryClient::new(StaticCatalog::new("test"), DiscoveryConfig::default());
        assert_send(&client.get_instances("endpoint"));
        assert_send(&client.get_services());
    }

    #[tokio::test]
    async fn missing_endpoints_yield_no_instances() {
        let client =
            KubernetesDiscoveryClient::new(StaticCatalog::new("test"), DiscoveryConfig::default());

        let instances = client.get_instances("endpoint").await.unwrap();
        assert!(instances.is_empty());
    }

    #[tokio::test]
    async fn empty_subsets_skip_service_lookup() {
        let endpoints = Endpoints {
            metadata: ObjectMeta {
                name: Some("endpoint".to_string()),
                ..Default::default()
            },
            subsets: Some(Vec::new()),
        };
        let catalog = CountingCatalog::new(StaticCatalog::new("test").with_endpoints(endpoints));
        let client = KubernetesDiscoveryClient::new(catalog, DiscoveryConfig::default());

        let instances = client.get_instances("endpoint").await.unwrap();

        assert!(instances.is_empty());
        assert_eq!(client.catalog().service_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn single_address() {
        let catalog = StaticCatalog::new("test")
            .with_endpoints(make_endpoints("test", &[("ip1", Some("uid1"))], &[("http", 80)]))
            .with_service(make_service("endpoint", "test", &[("l", "v")]));
        let client = KubernetesDiscoveryClient::new(catalog, DiscoveryConfig::default());

        let instances = client.get_instances("endpoint").await.unwrap();

        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].host(), "ip1");
        assert_eq!(instances[0].port(), 80);
        assert_eq!(instances[0].instance_id(), Some("uid1"));
        assert!(!instances[0].is_secure());
        assert_eq!(instances[0].metadata()["l"], "v");
    }

    #[tokio::test]
    async fn configured_namespace_is_used() {
        let catalog = StaticCatalog::new("test")
            .with_endpoints(make_endpoints("test2", &[("ip2", None)], &[("http", 80)]))
            .with_service(make_service("endpoint", "test2", &[]));

        let client = KubernetesDiscoveryClient::new(catalog.clone(), DiscoveryConfig::default());
        assert!(client.get_instances("endpoint").await.unwrap().is_empty());

        let config = DiscoveryConfig::default().namespace("test2");
        let client = KubernetesDiscoveryClient::new(catalog, config);
        let instances = client.get_instances("endpoint").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].namespace(), Some("test2"));
    }

    #[tokio::test]
    async fn endpoints_without_service_are_an_error() {
        let catalog = StaticCatalog::new("test")
            .with_endpoints(make_endpoints("test", &[("ip1", None)], &[("http", 80)]));
        let client = KubernetesDiscoveryClient::new(catalog, DiscoveryConfig::default());

        let err = client.get_instances("endpoint").await.unwrap_err();
        assert!(matches!(err, Error::ServiceMissing { .. }));
    }

    #[tokio::test]
    async fn endpoints_from_multiple_namespaces() {
        let catalog = StaticCatalog::new("test")
            .with_endpoints(make_endpoints("test", &[("ip1", Some("uid1"))], &[("http", 80)]))
            .with_endpoints(make_endpoints("test2", &[("ip2", Some("uid2"))], &[("http", 80)]))
            .with_service(make_service("endpoint", "test", &[("l", "v")]))
            .with_service(make_service("endpoint", "test2", &[("l", "v")]));
        let config = DiscoveryConfig::default().all_namespaces(true);
        let client = KubernetesDiscoveryClient::new(catalog, config);

        let instances = client.get_instances("endpoint").await.unwrap();

        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].host(), "ip1");
        assert_eq!(instances[0].instance_id(), Some("uid1"));
        assert_eq!(instances[0].namespace(), Some("test"));
        assert_eq!(instances[1].host(), "ip2");
        assert_eq!(instances[1].instance_id(), Some("uid2"));
        assert_eq!(instances[1].namespace(), Some("test2"));
        assert!(instances.iter().all(|i| !i.is_secure()));
    }

    #[tokio::test]
    async fn primary_port_not_found_fails_the_call() {
        let catalog = StaticCatalog::new("test")
            .with_endpoints(make_endpoints(
                "test",
                &[("ip1", None)],
                &[("mgmt", 9000), ("admin", 9001)],
            ))
            .with_service(make_service("endpoint", "test", &[]));
        let config = DiscoveryConfig::default().primary_port_name("http");
        let client = KubernetesDiscoveryClient::new(catalog, config);

        let err = client.get_instances("endpoint").await.unwrap_err();
        assert!(matches!(err, Error::PrimaryPortNotFound { .. }));
    }

    #[tokio::test]
    async fn custom_resolver_is_used() {
        struct AlwaysSecure;

        impl SecurePortResolver for AlwaysSecure {
            fn resolve(&self, _input: &crate::secure::PortSecurityInput<'_>) -> bool {
                true
            }
        }

        let catalog = StaticCatalog::new("test")
            .with_endpoints(make_endpoints("test", &[("ip1", None)], &[("http", 80)]))
            .with_service(make_service("endpoint", "test", &[]));
        let config = DiscoveryConfig::default();
        let client = KubernetesDiscoveryClient::with_resolver(catalog, config, AlwaysSecure);

        let instances = client.get_instances("endpoint").await.unwrap();
        assert!(instances[0].is_secure());
    }

    #[tokio::test]
    async fn upstream_errors_propagate() {
        let client =
            KubernetesDiscoveryClient::new(CountingCatalog::failing(), DiscoveryConfig::default());

        assert!(matches!(client.get_instances("endpoint").await, Err(Error::Kube(_))));
        assert!(matches!(client.get_services().await, Err(Error::Kube(_))));
    }

    #[tokio::test]
    async fn get_services_without_filter_keeps_order_and_duplicates() {
        let catalog = StaticCatalog::new("test")
            .with_service(make_service("s2", "test", &[]))
            .with_service(make_service("s1", "test", &[]))
            .with_service(make_service("s2", "test", &[]));
        let client = KubernetesDiscoveryClient::new(catalog, DiscoveryConfig::default());

        assert_eq!(client.get_services().await.unwrap(), ["s2", "s1", "s2"]);
    }

    #[tokio::test]
    async fn get_services_with_filter_expression() {
        let catalog = StaticCatalog::new("test")
            .with_service(make_service("s1", "test", &[("label", "value")]))
            .with_service(make_service("s2", "test", &[("label", "other")]))
            .with_service(make_service("s3", "test", &[]))
            .with_service(make_service("s4", "test", &[("label", "value"), ("label2", "value2")]));
        let config = DiscoveryConfig::default().filter("metadata.labels['label'] == 'value'");
        let client = KubernetesDiscoveryClient::new(catalog, config);

        assert_eq!(client.get_services().await.unwrap(), ["s1", "s4"]);
    }

    #[tokio::test]
    async fn get_services_applies_label_selector_before_filter() {
        let catalog = StaticCatalog::new("test")
            .with_service(make_service("s1", "test", &[("label", "value")]))
            .with_service(make_service("s2", "test", &[("label", "value"), ("label2", "value2")]))
            .with_service(make_service("s3", "test", &[]));
        let config = DiscoveryConfig::default()
            .service_label("label", "value")
            .filter("name != 's1'");
        let client = KubernetesDiscoveryClient::new(catalog, config);

        assert_eq!(client.get_services().await.unwrap(), ["s2"]);
    }

    #[tokio::test]
    async fn malformed_filter_surfaces_on_first_call() {
        let catalog = StaticCatalog::new("test").with_service(make_service("s1", "test", &[]));
        let config = DiscoveryConfig::default().filter("labels[oops");
        let client = KubernetesDiscoveryClient::new(catalog, config);

        let err = client.get_services().await.unwrap_err();
        assert!(matches!(err, Error::Filter(_)));
    }

    #[tokio::test]
    async fn get_services_with_predicate() {
        let catalog = StaticCatalog::new("test")
            .with_service(make_service("s1", "test", &[]))
            .with_service(make_service("s2", "test", &[]));
        let client = KubernetesDiscoveryClient::new(catalog, DiscoveryConfig::default());

        let names = client
            .get_services_with(|s| s.metadata.name.as_deref() == Some("s2"))
            .await
            .unwrap();
        assert_eq!(names, ["s2"]);
    }
}
