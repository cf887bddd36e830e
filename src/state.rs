use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::SchedulerConfig;
use crate::db::ReviewStore;
use crate::scheduler::RngSource;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    store: ReviewStore,
    scheduler: Arc<SchedulerConfig>,
    draws: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(store: ReviewStore, scheduler: SchedulerConfig) -> Self {
        Self {
            started_at: Instant::now(),
            store,
            scheduler: Arc::new(scheduler),
            draws: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn store(&self) -> &ReviewStore {
        &self.store
    }

    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    /// One generator per request. With `JITTER_SEED` set the sequence of
    /// generators is reproducible across restarts.
    pub fn random_source(&self) -> RngSource {
        match self.scheduler.jitter_seed {
            Some(seed) => {
                let n = self.draws.fetch_add(1, Ordering::Relaxed);
                RngSource::seeded(seed.wrapping_add(n))
            }
            None => RngSource::from_os(),
        }
    }
}
