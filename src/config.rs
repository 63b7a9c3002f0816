//! Configuration for discovery, spec fetching and the periodic updater.

use std::time::Duration;

/// Configuration for Kubernetes service discovery.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Cluster domain suffix used to build service hostnames.
    pub domain_suffix: String,

    /// The Kubernetes namespace to watch.
    /// If `None`, uses the current namespace from the kube client.
    pub namespace: Option<String>,

    /// How often the watcher re-delivers all known objects.
    pub resync_period: Duration,

    /// Hostnames or deployment names whose events never trigger discovery.
    pub ignore: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            domain_suffix: "cluster.local".to_string(),
            namespace: None,
            resync_period: Duration::from_secs(60),
            ignore: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Creates a configuration for the given cluster domain suffix.
    #[must_use]
    pub fn new(domain_suffix: impl Into<String>) -> Self {
        Self {
            domain_suffix: domain_suffix.into(),
            ..Self::default()
        }
    }

    /// Sets an explicit namespace to watch.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the watcher resync period.
    #[must_use]
    pub fn resync_period(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    /// Adds a hostname or deployment name to the ignore list.
    #[must_use]
    pub fn ignore(mut self, name: impl Into<String>) -> Self {
        self.ignore.push(name.into());
        self
    }
}

/// Configuration for fetching spec documents over HTTP.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Path of the spec document on each service.
    pub spec_path: String,

    /// Deadline for a single fetch.
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            spec_path: "/swagger.json".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl FetchConfig {
    /// Sets the spec document path.
    #[must_use]
    pub fn spec_path(mut self, path: impl Into<String>) -> Self {
        self.spec_path = path.into();
        self
    }

    /// Sets the per-fetch deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for the periodic updater.
#[derive(Clone, Debug)]
pub struct UpdaterConfig {
    /// Tick interval between regeneration checks.
    pub interval: Duration,

    /// Delay before the first regeneration.
    pub initial_delay: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(5),
        }
    }
}

impl UpdaterConfig {
    /// Sets the tick interval.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}
