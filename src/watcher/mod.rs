//! Resource watchers delivering service and deployment events.
//!
//! A watcher owns its event loop. Registered handlers run on that loop, one
//! after another in registration order, and the next event is not delivered
//! until every handler for the current one has returned. A slow handler
//! therefore slows the watcher down instead of queueing events behind it.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{Deployment, Event, Service};

pub mod k8s;
pub mod memory;

pub use k8s::KubeWatcher;
pub use memory::MemoryWatcher;

/// Callback invoked for every service event.
pub type ServiceHandler = Arc<dyn Fn(Service, Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback invoked for every deployment event.
pub type DeploymentHandler =
    Arc<dyn Fn(Deployment, Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Source of service and deployment events.
#[async_trait]
pub trait ResourceWatcher: Send + Sync + 'static {
    /// Registers a handler for service events.
    fn append_service_handler(&self, handler: ServiceHandler);

    /// Registers a handler for deployment events.
    fn append_deployment_handler(&self, handler: DeploymentHandler);

    /// Watches until `stop` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the watch cannot be established.
    async fn run(&self, stop: CancellationToken) -> Result<()>;
}

/// Ordered handler registry shared by watcher implementations.
#[derive(Default)]
pub struct Handlers {
    services: Mutex<Vec<ServiceHandler>>,
    deployments: Mutex<Vec<DeploymentHandler>>,
}

impl Handlers {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a service handler.
    pub fn append_service(&self, handler: ServiceHandler) {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Appends a deployment handler.
    pub fn append_deployment(&self, handler: DeploymentHandler) {
        self.deployments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Runs every service handler in registration order.
    pub async fn notify_service(&self, service: &Service, event: Event) {
        let handlers = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        tracing::debug!("service {} {event}", service.hostname());

        for handler in handlers {
            handler(service.clone(), event).await;
        }
    }

    /// Runs every deployment handler in registration order.
    pub async fn notify_deployment(&self, deployment: &Deployment, event: Event) {
        let handlers = self
            .deployments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        tracing::debug!("deployment {} {event}", deployment.name);

        for handler in handlers {
            handler(deployment.clone(), event).await;
        }
    }
}
