//! Route table of downloadable spec documents.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::SpecMap;
use crate::updater::Regenerator;

/// Spec documents keyed by the route they are served on.
///
/// Each discovered spec keyed `k` is published at `/{k}/api.json`. URL
/// replacements are applied to every document, in the order they were
/// added, so that links inside specs point where readers can reach them.
#[derive(Debug, Default)]
pub struct SpecRoutes {
    replacements: Vec<(String, String)>,
    routes: RwLock<Arc<BTreeMap<String, Vec<u8>>>>,
}

impl SpecRoutes {
    /// Creates an empty route table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a URL replacement applied to every published document.
    #[must_use]
    pub fn rewrite_url(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.replacements.push((from.into(), to.into()));
        self
    }

    /// Returns the document served on `route`.
    #[must_use]
    pub fn get(&self, route: &str) -> Option<Vec<u8>> {
        self.routes().get(route).cloned()
    }

    /// Snapshot of the whole route table.
    #[must_use]
    pub fn routes(&self) -> Arc<BTreeMap<String, Vec<u8>>> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_urls(&self, doc: &[u8]) -> Vec<u8> {
        if self.replacements.is_empty() {
            return doc.to_vec();
        }

        let mut text = String::from_utf8_lossy(doc).into_owned();
        for (from, to) in &self.replacements {
            text = text.replace(from.as_str(), to);
        }
        text.into_bytes()
    }
}

#[async_trait]
impl Regenerator for SpecRoutes {
    async fn regenerate(&self, specs: Arc<SpecMap>) -> Result<()> {
        tracing::info!("registering specifications");

        let routes: BTreeMap<String, Vec<u8>> = specs
            .iter()
            .map(|(key, doc)| (format!("/{key}/api.json"), self.replace_urls(doc)))
            .collect();

        tracing::debug!("loaded [{}] specs for download", routes.len());

        *self.routes.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(routes);
        Ok(())
    }
}
