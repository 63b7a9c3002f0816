#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Kubernetes service discovery for published API documentation.
//!
//! Services running in a cluster often publish a machine-readable API spec
//! (`OpenAPI`/`Swagger`). This crate watches Kubernetes `Service` and
//! `Deployment` resources, keeps a catalog of the services it finds, fetches
//! and rewrites each service's spec, and tells a downstream renderer when the
//! set of specs changed, without regenerating on every minor cluster event.
//!
//! # Features
//!
//! - **Kubernetes API discovery**: Real-time service and deployment updates via watches,
//!   with periodic resync to repair missed events
//! - **Protocol inference**: Port protocols derived from port names (`http-api`, `grpc`, ...)
//!   and management ports derived from health probes
//! - **Tolerant refresh**: A service whose spec cannot be fetched is skipped; a pass that
//!   fetches nothing keeps the last good specs
//! - **Debounced regeneration**: Many changes between two ticks cost a single regeneration
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use apidocs_k8s::{
//!     DiscoveryConfig, DiscoveryManager, Discoverer, FetchConfig, HttpSpecFetcher,
//!     KubeWatcher, SpecRoutes, Updater, UpdaterConfig,
//! };
//!
//! let config = DiscoveryConfig::new("cluster.local")
//!     .namespace("apps")
//!     .ignore("apidocs");
//!
//! let watcher = KubeWatcher::try_default(&config).await?;
//! let fetcher = HttpSpecFetcher::new(&FetchConfig::default())?;
//! let discoverer = Arc::new(Discoverer::new(watcher, fetcher, &config));
//!
//! // Publish specs at /{namespace}/{name}/api.json
//! let routes = Arc::new(SpecRoutes::new());
//! let updater = Updater::new(discoverer.clone(), routes.clone(), &UpdaterConfig::default());
//!
//! discoverer.run().await;
//!
//! // ... on shutdown
//! updater.close();
//! discoverer.shutdown();
//! ```

pub mod config;
pub mod conversion;
pub mod discover;
pub mod error;
pub mod fetch;
pub mod model;
pub mod rewrite;
pub mod routes;
pub mod updater;
pub mod watcher;

pub use config::{DiscoveryConfig, FetchConfig, UpdaterConfig};
pub use discover::{Discoverer, DiscoveryManager, OnChange, PassOutcome};
pub use error::{ConversionError, ConversionErrors, Error, Result};
pub use fetch::{HttpSpecFetcher, SpecFetcher};
pub use model::{Deployment, Event, Port, PortList, Protocol, Service, ServiceMap, SpecMap};
pub use rewrite::SpecRewriter;
pub use routes::SpecRoutes;
pub use updater::{Regenerator, Updater, UpdaterState};
pub use watcher::{KubeWatcher, MemoryWatcher, ResourceWatcher};
