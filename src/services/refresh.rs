//! Coarse refresh cycle.
//!
//! Fetches all four upstream categories, rewrites the match store, runs
//! the slow-path transition reconcile, maintains the temporal window,
//! and derives reminders for interested guilds. One category failing is
//! skipped for the cycle; the others proceed independently.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::adapters::pandascore::{ApiMatch, MatchDataSource};
use crate::adapters::postgres::PostgresStore;
use crate::cache::match_store::{MatchStore, StatusFilter};
use crate::cache::window::TemporalWindow;
use crate::config::CacheConfig;
use crate::coordination::CycleLock;
use crate::domain::MatchStatus;
use crate::error::Result;
use crate::services::detector::TransitionDetector;
use crate::services::metrics::Metrics;
use crate::services::scheduler::ReminderScheduler;

pub struct RefreshService {
    matches: Arc<MatchStore>,
    store: PostgresStore,
    source: Arc<dyn MatchDataSource>,
    window: TemporalWindow,
    detector: Arc<TransitionDetector>,
    scheduler: Arc<ReminderScheduler>,
    lock: CycleLock,
    metrics: Arc<Metrics>,
    page_size: u32,
    min_coverage_hours: i64,
    schedule_query_limit: i64,
}

impl RefreshService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        matches: Arc<MatchStore>,
        store: PostgresStore,
        source: Arc<dyn MatchDataSource>,
        window: TemporalWindow,
        detector: Arc<TransitionDetector>,
        scheduler: Arc<ReminderScheduler>,
        lock: CycleLock,
        metrics: Arc<Metrics>,
        cache: &CacheConfig,
        page_size: u32,
    ) -> Self {
        Self {
            matches,
            store,
            source,
            window,
            detector,
            scheduler,
            lock,
            metrics,
            page_size,
            min_coverage_hours: cache.min_coverage_hours,
            schedule_query_limit: (page_size as i64) * 2,
        }
    }

    pub async fn run_cycle(&self) -> Result<()> {
        // Serialize the write phase against the fast detection cycle.
        let _guard = self.lock.acquire().await;
        let now = Utc::now();
        self.metrics.inc_refresh_cycles();

        let fresh = self.fetch_all_categories().await;
        let stats = self.matches.upsert(&fresh).await;
        self.metrics
            .add_matches_upserted((stats.added + stats.updated) as u64);
        info!(
            "Refresh upsert: added={}, updated={}, skipped={}, errors={}",
            stats.added, stats.updated, stats.skipped, stats.errors
        );

        // Slow-path reconcile over the full fetched set catches whatever
        // the fast path's page depth missed.
        match self.detector.reconcile_full(&fresh, now).await {
            Ok(report) if report.confirmed > 0 => {
                self.metrics
                    .add_transitions_confirmed(report.confirmed as u64);
                info!(
                    "Reconcile confirmed {} of {} suspects",
                    report.confirmed, report.suspects
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Full reconcile failed: {}", e),
        }

        match self.window.cleanup(now).await {
            Ok(report) => debug!("Cleanup kept {} matches", report.kept),
            Err(e) => warn!("Window cleanup failed: {}", e),
        }

        match self.window.ensure_coverage(self.min_coverage_hours).await {
            Ok(report) => debug!(
                "Coverage {:?} after {} backfill pages ({} added)",
                report.status, report.pages_fetched, report.added
            ),
            Err(e) => warn!("Coverage backfill failed: {}", e),
        }

        if let Err(e) = self.schedule_reminders().await {
            warn!("Reminder derivation failed: {}", e);
        }

        Ok(())
    }

    /// Fetch the four categories, skipping any that fail this cycle.
    async fn fetch_all_categories(&self) -> Vec<ApiMatch> {
        let mut fresh = Vec::new();
        let mut healthy = 0;

        match self.source.fetch_upcoming(self.page_size).await {
            Ok(mut batch) => {
                healthy += 1;
                fresh.append(&mut batch);
            }
            Err(e) => warn!("Upcoming fetch failed, category skipped: {}", e),
        }
        match self.source.fetch_running().await {
            Ok(mut batch) => {
                healthy += 1;
                fresh.append(&mut batch);
            }
            Err(e) => warn!("Running fetch failed, category skipped: {}", e),
        }
        match self.source.fetch_finished(self.page_size, 1).await {
            Ok(mut batch) => {
                healthy += 1;
                fresh.append(&mut batch);
            }
            Err(e) => warn!("Finished fetch failed, category skipped: {}", e),
        }
        match self.source.fetch_canceled(self.page_size).await {
            Ok(mut batch) => {
                healthy += 1;
                fresh.append(&mut batch);
            }
            Err(e) => warn!("Canceled fetch failed, category skipped: {}", e),
        }

        debug!(
            "Fetched {} matches from {}/4 healthy categories",
            fresh.len(),
            healthy
        );
        fresh
    }

    /// Derive reminders for every guild with reminders enabled, over the
    /// matches that still have a future start.
    async fn schedule_reminders(&self) -> Result<()> {
        let guilds = self.store.guilds_with_reminders_enabled().await?;
        if guilds.is_empty() {
            return Ok(());
        }
        let now = Utc::now();

        let mut candidates = self
            .matches
            .query(
                Some(StatusFilter::Status(MatchStatus::NotStarted)),
                None,
                self.schedule_query_limit,
            )
            .await;
        candidates.extend(
            self.matches
                .query(
                    Some(StatusFilter::Status(MatchStatus::Running)),
                    None,
                    self.schedule_query_limit,
                )
                .await,
        );

        for guild in guilds {
            match self
                .scheduler
                .schedule_matches(guild.guild_id, &candidates, now)
                .await
            {
                Ok(n) if n > 0 => {
                    self.metrics.add_reminders_scheduled(n as u64);
                    debug!(
                        "Scheduled reminders for {} matches in guild {}",
                        n, guild.guild_id
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(
                    "Reminder scheduling failed for guild {}: {}",
                    guild.guild_id, e
                ),
            }
        }
        Ok(())
    }

    /// Run the cycle on a fixed interval until shutdown.
    pub fn spawn(
        self: Arc<Self>,
        interval_secs: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_cycle().await {
                            error!("Refresh cycle failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Refresh loop stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
