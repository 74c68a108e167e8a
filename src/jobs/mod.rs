use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod registry;
pub mod runner;
pub mod tasks;

pub use registry::{JobRegistry, JobSession};
pub use runner::{JobParams, JobRunner};

/// Job scheduler for background maintenance
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::session_cache_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::entitlement_cache_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::rate_limiter_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::library_cache_purge_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Drop expired session cache entries (runs every 15 minutes)
    async fn session_cache_sweep_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(900));

        loop {
            interval.tick().await;

            let removed = tasks::sweep_session_cache(&scheduler.context);
            if removed > 0 {
                info!("Session cache sweep removed {} expired entries", removed);
            }
        }
    }

    /// Drop expired entitlement cache entries (runs every 15 minutes)
    async fn entitlement_cache_sweep_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(900));

        loop {
            interval.tick().await;

            let removed = tasks::sweep_entitlement_cache(&scheduler.context);
            if removed > 0 {
                info!("Entitlement cache sweep removed {} expired entries", removed);
            }
        }
    }

    /// Drop elapsed per-caller rate-limit windows (runs every 30 minutes)
    async fn rate_limiter_sweep_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(1800));

        loop {
            interval.tick().await;

            let removed = tasks::sweep_rate_limiter(&scheduler.context);
            if removed > 0 {
                info!("Rate limiter sweep removed {} idle caller windows", removed);
            }
        }
    }

    /// Purge stale library database working copies (runs every 6 hours)
    async fn library_cache_purge_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(21600));

        loop {
            interval.tick().await;
            info!("Running library cache purge");

            match tasks::purge_library_cache(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Purged {} stale library cache copies", count);
                    }
                }
                Err(e) => error!("Failed to purge library cache: {}", e),
            }
        }
    }
}
