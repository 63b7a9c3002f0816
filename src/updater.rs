//! Debounced regeneration of published documentation.
//!
//! The [`Updater`] registers itself as the discovery change callback and
//! records that a change happened. Regeneration only runs on its own
//! schedule: once after an initial delay, then on every tick while a change
//! is pending. Any number of changes between two ticks cost one
//! regeneration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::UpdaterConfig;
use crate::discover::DiscoveryManager;
use crate::error::Result;
use crate::model::SpecMap;

/// Rebuilds whatever is published from the discovered specs.
#[async_trait]
pub trait Regenerator: Send + Sync {
    /// Regenerates output from the current specs.
    ///
    /// # Errors
    ///
    /// Returns an error if regeneration fails; the change stays pending.
    async fn regenerate(&self, specs: Arc<SpecMap>) -> Result<()>;
}

/// Whether a change is waiting to be regenerated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdaterState {
    /// Nothing changed since the last regeneration.
    Idle,
    /// A change notification arrived since the last regeneration.
    PendingChange,
}

/// Periodically regenerates documentation when discovered specs change.
pub struct Updater {
    discovery: Arc<dyn DiscoveryManager>,
    regenerator: Arc<dyn Regenerator>,
    state: Mutex<UpdaterState>,
    // serializes regenerations
    running: tokio::sync::Mutex<()>,
    stop: CancellationToken,
    closed: AtomicBool,
}

impl Updater {
    /// Creates an updater and starts its background schedule.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        discovery: Arc<dyn DiscoveryManager>,
        regenerator: Arc<dyn Regenerator>,
        config: &UpdaterConfig,
    ) -> Arc<Self> {
        let updater = Arc::new(Self {
            discovery: discovery.clone(),
            regenerator,
            // the first scheduled update always regenerates
            state: Mutex::new(UpdaterState::PendingChange),
            running: tokio::sync::Mutex::new(()),
            stop: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&updater);
        discovery.register_on_change_func(Arc::new(move || {
            if let Some(updater) = weak.upgrade() {
                updater.on_change();
            }
        }));

        tokio::spawn(initial_update(
            Arc::downgrade(&updater),
            updater.stop.clone(),
            config.initial_delay,
        ));
        tokio::spawn(tick_loop(
            Arc::downgrade(&updater),
            updater.stop.clone(),
            config.interval,
        ));

        updater
    }

    /// Records that discovered specs changed.
    pub fn on_change(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = UpdaterState::PendingChange;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> UpdaterState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Regenerates if a change is pending. Returns `true` if regeneration ran
    /// and succeeded.
    pub async fn update(&self) -> bool {
        let _running = self.running.lock().await;

        let previous = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            UpdaterState::Idle,
        );
        if previous == UpdaterState::Idle {
            tracing::trace!("no spec changes since last update");
            return false;
        }

        let specs = self.discovery.specs();
        let count = specs.len();

        match self.regenerator.regenerate(specs).await {
            Ok(()) => {
                tracing::info!("regenerated documentation for [{count}] specs");
                true
            }
            Err(e) => {
                tracing::error!("failed to regenerate documentation: {e}");
                self.on_change();
                false
            }
        }
    }

    /// Stops the schedule. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop.cancel();
        tracing::info!("periodic updater stopped");
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Updater {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn initial_update(updater: Weak<Updater>, stop: CancellationToken, delay: std::time::Duration) {
    tokio::select! {
        () = stop.cancelled() => {}
        () = time::sleep(delay) => {
            if let Some(updater) = updater.upgrade() {
                updater.update().await;
            }
        }
    }
}

async fn tick_loop(updater: Weak<Updater>, stop: CancellationToken, interval: std::time::Duration) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let Some(updater) = updater.upgrade() else {
                    break;
                };
                updater.update().await;
            }
        }
    }

    tracing::debug!("periodic updater loop exited");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::discover::OnChange;
    use crate::error::Error;

    /// Discovery stand-in that lets tests fire the change callback.
    #[derive(Default)]
    struct FakeDiscovery {
        specs: Mutex<Arc<SpecMap>>,
        on_change: Mutex<Option<OnChange>>,
    }

    impl FakeDiscovery {
        fn changed(&self) {
            let f = self.on_change.lock().unwrap().clone();
            if let Some(f) = f {
                f();
            }
        }
    }

    #[async_trait]
    impl DiscoveryManager for FakeDiscovery {
        fn shutdown(&self) {}

        async fn run(&self) {}

        fn specs(&self) -> Arc<SpecMap> {
            self.specs.lock().unwrap().clone()
        }

        fn register_on_change_func(&self, f: OnChange) {
            *self.on_change.lock().unwrap() = Some(f);
        }
    }

    /// Counts regenerations, failing while `fail` is set.
    #[derive(Default)]
    struct CountingRegenerator {
        count: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Regenerator for CountingRegenerator {
        async fn regenerate(&self, _specs: Arc<SpecMap>) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Regeneration("boom".into()));
            }
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup(config: &UpdaterConfig) -> (Arc<Updater>, Arc<FakeDiscovery>, Arc<CountingRegenerator>) {
        let discovery = Arc::new(FakeDiscovery::default());
        let regenerator = Arc::new(CountingRegenerator::default());
        let updater = Updater::new(discovery.clone(), regenerator.clone(), config);
        (updater, discovery, regenerator)
    }

    // Long enough that the schedule never fires during direct update() tests
    fn idle_schedule() -> UpdaterConfig {
        UpdaterConfig::default()
            .interval(Duration::from_secs(3600))
            .initial_delay(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn first_update_regenerates() {
        let (updater, _, regenerator) = setup(&idle_schedule());

        assert_eq!(updater.state(), UpdaterState::PendingChange);
        assert!(updater.update().await);
        assert_eq!(updater.state(), UpdaterState::Idle);
        assert_eq!(regenerator.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn update_without_change_is_noop() {
        let (updater, _, regenerator) = setup(&idle_schedule());
        updater.update().await;

        assert!(!updater.update().await);
        assert_eq!(regenerator.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changes_between_updates_collapse() {
        let (updater, discovery, regenerator) = setup(&idle_schedule());
        updater.update().await;

        discovery.changed();
        discovery.changed();
        assert_eq!(updater.state(), UpdaterState::PendingChange);

        assert!(updater.update().await);
        assert!(!updater.update().await);
        assert_eq!(regenerator.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_regeneration_stays_pending() {
        let (updater, _, regenerator) = setup(&idle_schedule());
        regenerator.fail.store(true, Ordering::SeqCst);

        assert!(!updater.update().await);
        assert_eq!(updater.state(), UpdaterState::PendingChange);

        regenerator.fail.store(false, Ordering::SeqCst);
        assert!(updater.update().await);
        assert_eq!(regenerator.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_twice_is_safe() {
        let (updater, _, _) = setup(&idle_schedule());

        updater.close();
        updater.close();

        assert!(updater.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_debounces_changes() {
        let config = UpdaterConfig::default()
            .interval(Duration::from_secs(60))
            .initial_delay(Duration::from_secs(1));
        let (updater, discovery, regenerator) = setup(&config);

        // initial delay
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(regenerator.count.load(Ordering::SeqCst), 1);

        // two changes, one tick
        discovery.changed();
        discovery.changed();
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(regenerator.count.load(Ordering::SeqCst), 2);

        // a tick with no change
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(regenerator.count.load(Ordering::SeqCst), 2);

        updater.close();
        discovery.changed();
        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(regenerator.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_before_initial_delay_skips_first_update() {
        let config = UpdaterConfig::default()
            .interval(Duration::from_secs(60))
            .initial_delay(Duration::from_secs(1));
        let (updater, _, regenerator) = setup(&config);

        updater.close();
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(regenerator.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropped_updater_ignores_late_changes() {
        let (updater, discovery, _) = setup(&idle_schedule());
        drop(updater);

        // callback holds only a weak reference
        discovery.changed();
    }
}
