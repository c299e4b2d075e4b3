use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Duration, interval};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::{Config, SchedulerConfig};
use crate::domain::events::EventSink;
use crate::fetch::CatalogFetcher;
use crate::fetch::steam_bulk::SteamBulkClient;
use crate::reconcile::validator::ReferenceValidator;
use crate::services::{CycleStats, UpdateService};
use crate::store::Store;

/// Everything a running instance shares: the single-writer store and
/// the cycle service built from config.
pub struct AppState {
    pub config: Config,
    pub store: Mutex<Store>,
    pub update: UpdateService,
}

impl AppState {
    pub fn new(config: Config, events: Arc<dyn EventSink>) -> Result<Self> {
        let store = Store::open(
            &config.general.data_dir,
            ReferenceValidator,
            Arc::clone(&events),
        )?;

        let catalog: Arc<dyn CatalogFetcher> = Arc::new(SteamBulkClient::new(
            config.fetch.steam_api_url.clone(),
            config.request_timeout(),
        ));
        // Free-platform scrapers are external collaborators; none is
        // bundled, so the cycle leaves free listings untouched unless
        // a fetcher is wired in by an embedding caller.
        let update = UpdateService::new(
            catalog,
            None,
            config.batch_controller(),
            config.retry_policy(),
            events,
        );

        Ok(Self {
            config,
            store: Mutex::new(store),
            update,
        })
    }

    /// Run one reconcile cycle against the shared store.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let mut store = self.store.lock().await;
        let stats = self
            .update
            .run_cycle(&mut store, &self.config.cycle_options())
            .await?;
        Ok(stats)
    }
}

/// Background loop driving cycles on an interval or cron expression.
pub struct Daemon {
    state: Arc<AppState>,
    config: SchedulerConfig,
    running: Arc<RwLock<bool>>,
}

impl Daemon {
    #[must_use]
    pub fn new(state: Arc<AppState>, config: SchedulerConfig) -> Self {
        Self {
            state,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Scheduler is disabled in config");
            return Ok(());
        }

        *self.running.write().await = true;
        info!("Starting background scheduler");

        if let Some(cron_expr) = &self.config.cron_expression {
            self.run_with_cron(cron_expr).await
        } else {
            self.run_with_interval().await
        }
    }

    async fn run_with_cron(&self, cron_expr: &str) -> Result<()> {
        let mut sched = JobScheduler::new().await?;

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);

        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let state = Arc::clone(&state);
            let running = Arc::clone(&running);
            Box::pin(async move {
                if !*running.read().await {
                    return;
                }
                match state.run_cycle().await {
                    Ok(stats) => log_stats(&stats),
                    Err(e) => error!("Scheduled cycle failed: {e:#}"),
                }
            })
        })?;

        sched.add(job).await?;
        sched.start().await?;

        info!("Scheduler running with cron: {}", cron_expr);

        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        sched.shutdown().await?;
        Ok(())
    }

    async fn run_with_interval(&self) -> Result<()> {
        let interval_mins = self.config.check_interval_minutes;
        info!("Scheduler running every {} minutes", interval_mins);

        let mut check_interval = interval(Duration::from_secs(u64::from(interval_mins) * 60));

        loop {
            check_interval.tick().await;
            if !*self.running.read().await {
                break;
            }
            info!("Running scheduled cycle...");
            match self.state.run_cycle().await {
                Ok(stats) => log_stats(&stats),
                Err(e) => error!("Scheduled cycle failed: {e:#}"),
            }
        }

        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping scheduler...");
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

fn log_stats(stats: &CycleStats) {
    info!(
        candidates = stats.candidates,
        fetched = stats.fetched,
        skipped = stats.skipped,
        repaired = stats.repaired,
        stubbed = stats.stubbed,
        dropped = stats.dropped,
        links_approved = stats.links_approved,
        links_retracted = stats.links_retracted,
        warnings = stats.warnings,
        "cycle complete"
    );
}
