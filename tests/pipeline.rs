use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apidocs_k8s::{
    DiscoveryConfig, DiscoveryManager, Discoverer, Error, MemoryWatcher, Port, Protocol, Result,
    Service, SpecFetcher, SpecRoutes, Updater, UpdaterConfig,
};
use async_trait::async_trait;

/// Documents served by hostname, shared between the test and the fetcher.
type Docs = Mutex<HashMap<String, String>>;

#[derive(Clone, Default)]
struct StaticFetcher(Arc<Docs>);

impl StaticFetcher {
    fn serve(&self, hostname: &str, doc: &str) {
        self.0
            .lock()
            .unwrap()
            .insert(hostname.to_string(), doc.to_string());
    }
}

#[async_trait]
impl SpecFetcher for StaticFetcher {
    async fn fetch(&self, service: &Service) -> Result<Vec<u8>> {
        self.0
            .lock()
            .unwrap()
            .get(service.hostname())
            .map(|doc| doc.clone().into_bytes())
            .ok_or_else(|| Error::NoHttpPort(service.hostname().to_string()))
    }
}

fn petstore() -> Service {
    Service::new(
        "petstore.default.svc.cluster.local",
        vec![Port::new("http", 8080, Protocol::Http)],
        Some("10.0.0.1".to_string()),
        None,
    )
}

#[tokio::test(start_paused = true)]
async fn cluster_changes_reach_published_routes() {
    let config = DiscoveryConfig::default().ignore("apidocs");
    let fetcher = StaticFetcher::default();
    fetcher.serve("petstore.default.svc.cluster.local", r#"{"paths":{"/pets":{"get":{}}}}"#);

    let discoverer = Arc::new(Discoverer::new(MemoryWatcher::default(), fetcher.clone(), &config));
    let routes = Arc::new(SpecRoutes::new());
    let updater = Updater::new(
        discoverer.clone(),
        routes.clone(),
        &UpdaterConfig::default()
            .interval(Duration::from_secs(30))
            .initial_delay(Duration::from_secs(1)),
    );

    discoverer.run().await;
    discoverer.watcher().apply_service(petstore()).await;
    assert!(routes.get("/default/petstore/api.json").is_none());

    // published on the initial delay, not on the event itself
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        routes.get("/default/petstore/api.json"),
        Some(br#"{"paths":{"/pets":{"get":{}}}}"#.to_vec())
    );

    fetcher.serve(
        "petstore.default.svc.cluster.local",
        r#"{"paths":{"/pets":{"get":{},"post":{"x-private":true}}},"v":2}"#,
    );
    discoverer.watcher().resync().await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        routes.get("/default/petstore/api.json"),
        Some(br#"{"paths":{"/pets":{"get":{}}},"v":2}"#.to_vec())
    );

    updater.close();
    discoverer.shutdown();
}
