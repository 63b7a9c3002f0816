//! Kubernetes watcher for `Service` and `Deployment` resources.
//!
//! # How It Works
//!
//! 1. Watches `Service` and `apps/v1` `Deployment` resources in one namespace
//! 2. Converts every object into the discovery model as it arrives
//! 3. Compares against the last converted state to decide between `Add`,
//!    `Update` and no event at all
//! 4. After a re-list, removes objects that were not listed again
//! 5. Every resync period, re-delivers all known objects as `Update`
//!
//! # Example
//!
//! ```ignore
//! use apidocs_k8s::{DiscoveryConfig, KubeWatcher, ResourceWatcher};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = DiscoveryConfig::default().namespace("docs");
//! let watcher = KubeWatcher::try_default(&config).await?;
//! watcher.run(CancellationToken::new()).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
use k8s_openapi::api::core::v1::Service as K8sService;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event as WatchEvent};
use kube::{Api, Client, Resource, ResourceExt};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{DeploymentHandler, Handlers, ResourceWatcher, ServiceHandler};
use crate::config::DiscoveryConfig;
use crate::conversion::{convert_deployment, convert_service, key_func};
use crate::error::Result;
use crate::model::{Deployment, Event};

const MIN_RESYNC_PERIOD: Duration = Duration::from_secs(1);

/// Watches a namespace through the Kubernetes API.
pub struct KubeWatcher {
    client: Client,
    namespace: String,
    domain_suffix: String,
    resync_period: Duration,
    handlers: Handlers,
}

impl KubeWatcher {
    /// Creates a watcher using an existing client.
    ///
    /// Uses the client's default namespace unless the configuration names one.
    #[must_use]
    pub fn new(client: Client, config: &DiscoveryConfig) -> Self {
        let namespace = config
            .namespace
            .clone()
            .unwrap_or_else(|| client.default_namespace().to_string());

        Self {
            client,
            namespace,
            domain_suffix: config.domain_suffix.clone(),
            resync_period: config.resync_period.max(MIN_RESYNC_PERIOD),
            handlers: Handlers::new(),
        }
    }

    /// Creates a watcher from the in-cluster or kubeconfig client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no Kubernetes client configuration can be found.
    pub async fn try_default(config: &DiscoveryConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, config))
    }

    /// The namespace being watched.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl ResourceWatcher for KubeWatcher {
    fn append_service_handler(&self, handler: ServiceHandler) {
        self.handlers.append_service(handler);
    }

    fn append_deployment_handler(&self, handler: DeploymentHandler) {
        self.handlers.append_deployment(handler);
    }

    async fn run(&self, stop: CancellationToken) -> Result<()> {
        let services: Api<K8sService> = Api::namespaced(self.client.clone(), &self.namespace);
        let deployments: Api<K8sDeployment> =
            Api::namespaced(self.client.clone(), &self.namespace);

        let service_stream = watcher::watcher(services, WatcherConfig::default()).default_backoff();
        let deployment_stream =
            watcher::watcher(deployments, WatcherConfig::default()).default_backoff();
        tokio::pin!(service_stream);
        tokio::pin!(deployment_stream);

        let mut known_services = Tracker::default();
        let mut known_deployments = Tracker::default();

        let mut resync = time::interval_at(Instant::now() + self.resync_period, self.resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "starting Kubernetes watch in namespace {} (resync every {:?})",
            self.namespace,
            self.resync_period
        );

        loop {
            tokio::select! {
                biased;

                () = stop.cancelled() => {
                    tracing::info!("stopping Kubernetes watch in namespace {}", self.namespace);
                    return Ok(());
                }

                event = service_stream.next() => match event {
                    Some(Ok(event)) => {
                        let changes = process_event(&event, &mut known_services, |svc| {
                            convert_service(svc, &self.domain_suffix)
                        });
                        for (service, event) in changes {
                            self.handlers.notify_service(&service, event).await;
                        }
                    }
                    Some(Err(e)) => tracing::warn!("service watch error: {e}"),
                    None => {
                        tracing::warn!("service watch stream ended");
                        return Ok(());
                    }
                },

                event = deployment_stream.next() => match event {
                    Some(Ok(event)) => {
                        let changes =
                            process_event(&event, &mut known_deployments, convert_logged);
                        for (deployment, event) in changes {
                            self.handlers.notify_deployment(&deployment, event).await;
                        }
                    }
                    Some(Err(e)) => tracing::warn!("deployment watch error: {e}"),
                    None => {
                        tracing::warn!("deployment watch stream ended");
                        return Ok(());
                    }
                },

                _ = resync.tick() => {
                    tracing::debug!(
                        "resyncing {} services and {} deployments",
                        known_services.len(),
                        known_deployments.len()
                    );
                    for (service, event) in known_services.resync() {
                        self.handlers.notify_service(&service, event).await;
                    }
                    for (deployment, event) in known_deployments.resync() {
                        self.handlers.notify_deployment(&deployment, event).await;
                    }
                }
            }
        }
    }
}

/// Converts a deployment, logging probe ports that could not be resolved.
fn convert_logged(dpl: &K8sDeployment) -> Deployment {
    let (deployment, errs) = convert_deployment(dpl);
    if let Some(errs) = errs {
        tracing::warn!("deployment {}: {errs}", deployment.name);
    }
    deployment
}

fn object_key<K: Resource>(obj: &K) -> String {
    key_func(&obj.name_any(), &obj.namespace().unwrap_or_default())
}

/// Last converted state of every object seen on a watch.
#[derive(Debug)]
struct Tracker<T> {
    known: HashMap<String, T>,
    // keys listed since the current re-list started
    relisting: Option<HashSet<String>>,
}

impl<T> Default for Tracker<T> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisting: None,
        }
    }
}

impl<T: Clone + PartialEq> Tracker<T> {
    fn len(&self) -> usize {
        self.known.len()
    }

    fn begin_relist(&mut self) {
        self.relisting = Some(HashSet::new());
    }

    fn apply(&mut self, key: String, item: T) -> Option<(T, Event)> {
        if let Some(seen) = self.relisting.as_mut() {
            seen.insert(key.clone());
        }

        match self.known.insert(key, item.clone()) {
            None => Some((item, Event::Add)),
            Some(prev) if prev != item => Some((item, Event::Update)),
            Some(_) => None,
        }
    }

    fn delete(&mut self, key: &str) -> Option<(T, Event)> {
        self.known.remove(key).map(|prev| (prev, Event::Delete))
    }

    fn finish_relist(&mut self) -> Vec<(T, Event)> {
        let Some(seen) = self.relisting.take() else {
            return Vec::new();
        };

        let mut stale: Vec<String> = self
            .known
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        stale.sort();

        stale.iter().filter_map(|key| self.delete(key)).collect()
    }

    fn resync(&self) -> Vec<(T, Event)> {
        let mut keys: Vec<&String> = self.known.keys().collect();
        keys.sort();

        keys.into_iter()
            .map(|key| (self.known[key].clone(), Event::Update))
            .collect()
    }
}

/// Processes a watch event and returns the model events to deliver.
///
/// This function is extracted to enable unit testing of the event processing logic.
fn process_event<K, T>(
    event: &WatchEvent<K>,
    tracker: &mut Tracker<T>,
    convert: impl Fn(&K) -> T,
) -> Vec<(T, Event)>
where
    K: Resource,
    T: Clone + PartialEq,
{
    match event {
        WatchEvent::Init => {
            tracing::debug!("Kubernetes watcher re-list started");
            tracker.begin_relist();
            Vec::new()
        }

        WatchEvent::Apply(obj) | WatchEvent::InitApply(obj) => tracker
            .apply(object_key(obj), convert(obj))
            .into_iter()
            .collect(),

        WatchEvent::Delete(obj) => tracker.delete(&object_key(obj)).into_iter().collect(),

        WatchEvent::InitDone => {
            tracing::debug!("Kubernetes watcher re-list complete");
            tracker.finish_relist()
        }
    }
}
