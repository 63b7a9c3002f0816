//! Discovery of API specs published by cluster services.
//!
//! The [`Discoverer`] keeps the catalog of known services current from
//! watcher events and, after every accepted change, runs a discovery pass:
//! each known service's spec is fetched and rewritten, and the resulting
//! documents replace the cached set. Consumers read the cache through
//! [`DiscoveryManager::specs`] and learn about changes through the callback
//! installed with [`DiscoveryManager::register_on_change_func`].
//!
//! Watcher handlers run on the watcher's own task, so a pass in progress
//! holds back the next event; a burst of cluster changes becomes a sequence
//! of passes rather than a queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::config::DiscoveryConfig;
use crate::conversion::{key_func, parse_hostname};
use crate::fetch::SpecFetcher;
use crate::model::{Deployment, Event, Service, ServiceMap, SpecMap};
use crate::rewrite::SpecRewriter;
use crate::watcher::ResourceWatcher;

/// Callback invoked after the spec cache changes.
pub type OnChange = Arc<dyn Fn() + Send + Sync>;

/// Access to discovered specs for the rest of the system.
#[async_trait]
pub trait DiscoveryManager: Send + Sync {
    /// Stops the discovery process. Further calls have no effect.
    fn shutdown(&self);

    /// Starts watching in the background and runs one discovery pass.
    async fn run(&self);

    /// Returns the cached specs, keyed by route.
    fn specs(&self) -> Arc<SpecMap>;

    /// Installs the callback invoked after every refresh of the cache,
    /// replacing any previous one.
    fn register_on_change_func(&self, f: OnChange);
}

/// Result of a single discovery pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// The cache was replaced with this many specs.
    Refreshed(usize),
    /// No services are known; the cache was left as is.
    NoServices,
    /// Services are known but none of their specs could be fetched;
    /// the cache was left as is.
    FetchUnavailable,
}

/// Names whose events are dropped without triggering discovery.
#[derive(Clone, Debug, Default)]
struct IgnoreList(Vec<String>);

impl IgnoreList {
    /// Matches exact names, and hostnames by their first DNS label.
    fn matches(&self, name: &str) -> bool {
        let short = name.split('.').next().unwrap_or(name);
        self.0.iter().any(|ignored| ignored == name || ignored == short)
    }
}

/// Discovers specs of services reported by a [`ResourceWatcher`].
pub struct Discoverer<W, F> {
    watcher: Arc<W>,
    inner: Arc<Inner<F>>,
    stop: CancellationToken,
    stopped: AtomicBool,
}

struct Inner<F> {
    fetcher: F,
    rewriter: SpecRewriter,
    ignore: IgnoreList,
    services: Mutex<ServiceMap>,
    // serializes discovery passes
    pass: tokio::sync::Mutex<()>,
    specs: Mutex<Arc<SpecMap>>,
    notify: Mutex<OnChange>,
}

impl<W, F> Discoverer<W, F>
where
    W: ResourceWatcher,
    F: SpecFetcher,
{
    /// Creates a discoverer and registers its handlers with the watcher.
    #[must_use]
    pub fn new(watcher: W, fetcher: F, config: &DiscoveryConfig) -> Self {
        Self::with_rewriter(watcher, fetcher, SpecRewriter::default(), config)
    }

    /// Creates a discoverer with a custom spec rewriter.
    #[must_use]
    pub fn with_rewriter(
        watcher: W,
        fetcher: F,
        rewriter: SpecRewriter,
        config: &DiscoveryConfig,
    ) -> Self {
        tracing::info!("initializing new discoverer instance");

        let noop: OnChange = Arc::new(|| {});
        let inner = Arc::new(Inner {
            fetcher,
            rewriter,
            ignore: IgnoreList(config.ignore.clone()),
            services: Mutex::new(ServiceMap::new()),
            pass: tokio::sync::Mutex::new(()),
            specs: Mutex::new(Arc::new(SpecMap::new())),
            notify: Mutex::new(noop),
        });

        let watcher = Arc::new(watcher);

        let i = inner.clone();
        watcher.append_service_handler(Arc::new(move |service: Service, event: Event| {
            let inner = i.clone();
            async move { inner.update_services(service, event).await }.boxed()
        }));

        let i = inner.clone();
        watcher.append_deployment_handler(Arc::new(move |deployment: Deployment, event: Event| {
            let inner = i.clone();
            async move { inner.update_deployments(deployment, event).await }.boxed()
        }));

        Self {
            watcher,
            inner,
            stop: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// The watcher feeding this discoverer.
    #[must_use]
    pub fn watcher(&self) -> &Arc<W> {
        &self.watcher
    }

    /// Snapshot of the service catalog.
    #[must_use]
    pub fn services(&self) -> ServiceMap {
        self.inner
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs a discovery pass now.
    pub async fn discover(&self) -> PassOutcome {
        self.inner.discover().await
    }
}

impl<W, F> Drop for Discoverer<W, F> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[async_trait]
impl<W, F> DiscoveryManager for Discoverer<W, F>
where
    W: ResourceWatcher,
    F: SpecFetcher,
{
    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("discovery process already stopped");
            return;
        }

        self.stop.cancel();
        tracing::info!("shutting down discovery process");
    }

    async fn run(&self) {
        tracing::info!("starting discovery process");

        let watcher = self.watcher.clone();
        let stop = self.stop.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.run(stop).await {
                tracing::error!("resource watcher failed: {e}");
            }
        });

        self.inner.discover().await;
    }

    fn specs(&self) -> Arc<SpecMap> {
        self.inner.specs()
    }

    fn register_on_change_func(&self, f: OnChange) {
        *self
            .inner
            .notify
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = f;
    }
}

impl<F: SpecFetcher> Inner<F> {
    fn specs(&self) -> Arc<SpecMap> {
        self.specs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn update_services(&self, service: Service, event: Event) {
        if self.ignore.matches(service.hostname()) {
            tracing::debug!("skipping service on ignore list: {}", service.hostname());
            return;
        }

        {
            let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
            match event {
                Event::Add | Event::Update => services.insert(service),
                Event::Delete => services.delete(&service),
            }
        }

        self.discover().await;
    }

    async fn update_deployments(&self, deployment: Deployment, event: Event) {
        if self.ignore.matches(&deployment.name) {
            tracing::debug!("skipping deployment on ignore list: {}", deployment.name);
            return;
        }

        tracing::debug!(
            "deployment {} {event} (generation {})",
            deployment.name,
            deployment.generation
        );

        self.discover().await;
    }

    async fn discover(&self) -> PassOutcome {
        let _pass = self.pass.lock().await;

        let services: Vec<Service> = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();

        if services.is_empty() {
            tracing::debug!("no services known, keeping {} cached specs", self.specs().len());
            return PassOutcome::NoServices;
        }

        let fetched = join_all(services.iter().map(|service| self.fetch_spec(service))).await;
        let specs: SpecMap = fetched.into_iter().flatten().collect();

        if specs.is_empty() {
            tracing::warn!(
                "no specs could be fetched from {} services, keeping cached specs",
                services.len()
            );
            return PassOutcome::FetchUnavailable;
        }

        let count = specs.len();
        tracing::info!("successfully processed [{count}] API specs");

        *self.specs.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(specs);

        let notify = self
            .notify
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        notify();

        PassOutcome::Refreshed(count)
    }

    async fn fetch_spec(&self, service: &Service) -> Option<(String, Vec<u8>)> {
        let raw = match self.fetcher.fetch(service).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("failed to fetch spec for {}: {e}", service.hostname());
                return None;
            }
        };

        match self.rewriter.rewrite(&raw) {
            Ok(doc) => Some((route_key(service), doc)),
            Err(e) => {
                tracing::warn!("failed to rewrite spec for {}: {e}", service.hostname());
                None
            }
        }
    }
}

/// Route key of a service's spec: `namespace/name`, or the hostname if it
/// cannot be parsed.
fn route_key(service: &Service) -> String {
    parse_hostname(service.hostname()).map_or_else(
        || service.hostname().to_string(),
        |(name, namespace)| key_func(name, namespace),
    )
}
