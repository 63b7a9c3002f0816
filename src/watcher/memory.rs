//! In-memory watcher that delivers events on demand.
//!
//! Useful for tests and for running discovery against a fixed set of
//! services without a cluster. Every call delivers its event to the
//! registered handlers before returning.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{DeploymentHandler, Handlers, ResourceWatcher, ServiceHandler};
use crate::error::Result;
use crate::model::{Deployment, Event, Service};

/// Watcher backed by in-memory state.
pub struct MemoryWatcher {
    handlers: Handlers,
    services: Mutex<BTreeMap<String, Service>>,
    deployments: Mutex<BTreeMap<String, Deployment>>,
    resync_period: Duration,
}

impl Default for MemoryWatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl MemoryWatcher {
    /// Creates an empty watcher that resyncs on the given period while running.
    #[must_use]
    pub fn new(resync_period: Duration) -> Self {
        Self {
            handlers: Handlers::new(),
            services: Mutex::new(BTreeMap::new()),
            deployments: Mutex::new(BTreeMap::new()),
            resync_period,
        }
    }

    /// Adds or replaces a service, delivering `Add` or `Update`.
    pub async fn apply_service(&self, service: Service) {
        let previous = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.hostname().to_string(), service.clone());

        let event = if previous.is_some() { Event::Update } else { Event::Add };
        self.handlers.notify_service(&service, event).await;
    }

    /// Removes a service by hostname, delivering `Delete` if it was known.
    pub async fn delete_service(&self, hostname: &str) {
        let removed = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(hostname);

        if let Some(service) = removed {
            self.handlers.notify_service(&service, Event::Delete).await;
        }
    }

    /// Adds or replaces a deployment, delivering `Add` or `Update`.
    pub async fn apply_deployment(&self, deployment: Deployment) {
        let previous = self
            .deployments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(deployment.name.clone(), deployment.clone());

        let event = if previous.is_some() { Event::Update } else { Event::Add };
        self.handlers.notify_deployment(&deployment, event).await;
    }

    /// Removes a deployment by name, delivering `Delete` if it was known.
    pub async fn delete_deployment(&self, name: &str) {
        let removed = self
            .deployments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        if let Some(deployment) = removed {
            self.handlers
                .notify_deployment(&deployment, Event::Delete)
                .await;
        }
    }

    /// Re-delivers every known object as `Update`.
    pub async fn resync(&self) {
        let services: Vec<Service> = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let deployments: Vec<Deployment> = self
            .deployments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for service in &services {
            self.handlers.notify_service(service, Event::Update).await;
        }
        for deployment in &deployments {
            self.handlers
                .notify_deployment(deployment, Event::Update)
                .await;
        }
    }
}

#[async_trait]
impl ResourceWatcher for MemoryWatcher {
    fn append_service_handler(&self, handler: ServiceHandler) {
        self.handlers.append_service(handler);
    }

    fn append_deployment_handler(&self, handler: DeploymentHandler) {
        self.handlers.append_deployment(handler);
    }

    async fn run(&self, stop: CancellationToken) -> Result<()> {
        let period = self.resync_period.max(Duration::from_millis(1));
        let mut resync = time::interval_at(Instant::now() + period, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = stop.cancelled() => return Ok(()),
                _ = resync.tick() => self.resync().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::FutureExt;

    use super::*;

    fn recorder(watcher: &MemoryWatcher) -> Arc<Mutex<Vec<(String, Event)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        watcher.append_service_handler(Arc::new(move |svc: Service, event: Event| {
            let l = l.clone();
            async move {
                l.lock().unwrap().push((svc.hostname().to_string(), event));
            }
            .boxed()
        }));

        let l = log.clone();
        watcher.append_deployment_handler(Arc::new(move |dpl: Deployment, event: Event| {
            let l = l.clone();
            async move {
                l.lock().unwrap().push((dpl.name, event));
            }
            .boxed()
        }));

        log
    }

    fn make_service(name: &str) -> Service {
        Service::new(format!("{name}.default.svc.cluster.local"), vec![], None, None)
    }

    #[tokio::test]
    async fn apply_then_update_then_delete() {
        let watcher = MemoryWatcher::default();
        let log = recorder(&watcher);

        watcher.apply_service(make_service("a")).await;
        watcher.apply_service(make_service("a")).await;
        watcher.delete_service("a.default.svc.cluster.local").await;
        watcher.delete_service("a.default.svc.cluster.local").await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("a.default.svc.cluster.local".to_string(), Event::Add),
                ("a.default.svc.cluster.local".to_string(), Event::Update),
                ("a.default.svc.cluster.local".to_string(), Event::Delete),
            ]
        );
    }

    #[tokio::test]
    async fn deployment_events() {
        let watcher = MemoryWatcher::default();
        let log = recorder(&watcher);

        watcher.apply_deployment(Deployment::new("reviews", 1)).await;
        watcher.apply_deployment(Deployment::new("reviews", 2)).await;
        watcher.delete_deployment("reviews").await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("reviews".to_string(), Event::Add),
                ("reviews".to_string(), Event::Update),
                ("reviews".to_string(), Event::Delete),
            ]
        );
    }

    #[tokio::test]
    async fn resync_redelivers_known_state() {
        let watcher = MemoryWatcher::default();
        watcher.apply_service(make_service("b")).await;
        watcher.apply_service(make_service("a")).await;
        watcher.apply_deployment(Deployment::new("reviews", 1)).await;

        let log = recorder(&watcher);
        watcher.resync().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("a.default.svc.cluster.local".to_string(), Event::Update),
                ("b.default.svc.cluster.local".to_string(), Event::Update),
                ("reviews".to_string(), Event::Update),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_resyncs_until_stopped() {
        let watcher = Arc::new(MemoryWatcher::new(Duration::from_secs(10)));
        watcher.apply_service(make_service("a")).await;
        let log = recorder(&watcher);

        let stop = CancellationToken::new();
        let task = tokio::spawn({
            let watcher = watcher.clone();
            let stop = stop.clone();
            async move { watcher.run(stop).await }
        });

        time::sleep(Duration::from_secs(25)).await;
        stop.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
