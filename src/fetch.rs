//! Fetching spec documents from discovered services.

use async_trait::async_trait;

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::model::{Port, Protocol, Service};

/// Retrieves the raw spec document a service publishes.
#[async_trait]
pub trait SpecFetcher: Send + Sync + 'static {
    /// Fetches the service's spec document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be retrieved.
    async fn fetch(&self, service: &Service) -> Result<Vec<u8>>;
}

/// Fetches spec documents over HTTP from each service's first HTTP port.
#[derive(Clone, Debug)]
pub struct HttpSpecFetcher {
    client: reqwest::Client,
    spec_path: String,
}

impl HttpSpecFetcher {
    /// Creates a fetcher with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            spec_path: config.spec_path.clone(),
        })
    }

    /// Returns the URL a service's spec is fetched from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHttpPort`] if the service has no HTTP-like port.
    pub fn spec_url(&self, service: &Service) -> Result<String> {
        let port = spec_port(service).ok_or_else(|| Error::NoHttpPort(service.hostname().to_string()))?;
        let scheme = if port.protocol == Protocol::Https { "https" } else { "http" };

        Ok(format!(
            "{scheme}://{}:{}{}",
            service.hostname(),
            port.port,
            self.spec_path
        ))
    }
}

#[async_trait]
impl SpecFetcher for HttpSpecFetcher {
    async fn fetch(&self, service: &Service) -> Result<Vec<u8>> {
        let url = self.spec_url(service)?;
        tracing::trace!("fetching spec from {url}");

        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(body.to_vec())
    }
}

fn spec_port(service: &Service) -> Option<&Port> {
    service.ports().iter().find(|p| p.protocol.is_http())
}
