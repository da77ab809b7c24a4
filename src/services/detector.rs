//! State transition detection.
//!
//! A running match that stops appearing in the upstream running list is
//! only a *suspect*: staleness alone proves nothing. Transitions are
//! applied exclusively on positive confirmation — the match id showing
//! up in authoritative finished data. Suspects that cannot be confirmed
//! stay running untouched.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::adapters::pandascore::{ApiMatch, MatchDataSource};
use crate::adapters::postgres::PostgresStore;
use crate::cache::match_store::MatchStore;
use crate::config::SchedulerConfig;
use crate::coordination::CycleLock;
use crate::domain::{MatchRecord, MatchStatus};
use crate::error::Result;
use crate::services::metrics::Metrics;
use crate::services::scheduler::ReminderScheduler;

#[derive(Debug, Default, Clone, Copy)]
pub struct DetectionReport {
    pub suspects: usize,
    pub confirmed: usize,
    pub notifications_enqueued: usize,
}

/// Suspects present in the authoritative lookup with a decided status.
/// Everything else stays as-is — absence is not evidence.
fn confirm_against(
    suspects: &[MatchRecord],
    lookup: &HashMap<i64, ApiMatch>,
) -> Vec<ApiMatch> {
    suspects
        .iter()
        .filter_map(|s| lookup.get(&s.match_id))
        .filter(|m| m.status.is_decided())
        .cloned()
        .collect()
}

/// Build an id-keyed lookup from several pages of finished data. More
/// than one page is fetched because recent finishes get pushed past
/// page 1 by unrelated finishes; under-fetching causes false negatives.
/// Any page failing fails the whole confirmation — no partial evidence.
async fn finished_lookup(
    source: &dyn MatchDataSource,
    pages: u32,
    page_size: u32,
) -> Result<HashMap<i64, ApiMatch>> {
    let mut lookup = HashMap::new();
    for page in 1..=pages {
        let batch = source.fetch_finished(page_size, page).await?;
        let batch_len = batch.len();
        for m in batch {
            lookup.insert(m.id, m);
        }
        if batch_len < page_size as usize {
            break;
        }
    }
    Ok(lookup)
}

pub struct TransitionDetector {
    matches: Arc<MatchStore>,
    store: PostgresStore,
    source: Arc<dyn MatchDataSource>,
    staleness: Duration,
    confirm_pages: u32,
    confirm_page_size: u32,
}

impl TransitionDetector {
    pub fn new(
        matches: Arc<MatchStore>,
        store: PostgresStore,
        source: Arc<dyn MatchDataSource>,
        config: &SchedulerConfig,
        confirm_page_size: u32,
    ) -> Self {
        Self {
            matches,
            store,
            source,
            staleness: Duration::seconds(config.staleness_secs),
            confirm_pages: config.confirm_pages,
            confirm_page_size,
        }
    }

    /// Fast path: targeted confirmation fetch, only when suspects exist.
    /// The no-suspect case is a cheap single query since this runs every
    /// short cycle.
    pub async fn fast_cycle(&self, now: DateTime<Utc>) -> Result<DetectionReport> {
        let suspects = self.matches.stale_running(now - self.staleness).await?;
        if suspects.is_empty() {
            return Ok(DetectionReport::default());
        }

        debug!(
            "{} stale running matches, confirming against finished pages",
            suspects.len()
        );
        let lookup =
            finished_lookup(self.source.as_ref(), self.confirm_pages, self.confirm_page_size)
                .await?;

        let confirmed = confirm_against(&suspects, &lookup);
        self.apply_transitions(suspects.len(), confirmed).await
    }

    /// Slow path: the same suspect/confirm logic against a full freshly
    /// fetched match set, catching whatever the fast path's page depth
    /// missed. Run by the coarse refresh cycle.
    pub async fn reconcile_full(
        &self,
        fresh: &[ApiMatch],
        now: DateTime<Utc>,
    ) -> Result<DetectionReport> {
        let suspects = self.matches.stale_running(now - self.staleness).await?;
        if suspects.is_empty() {
            return Ok(DetectionReport::default());
        }

        let lookup: HashMap<i64, ApiMatch> = fresh
            .iter()
            .filter(|m| m.status.is_decided())
            .map(|m| (m.id, m.clone()))
            .collect();

        let confirmed = confirm_against(&suspects, &lookup);
        self.apply_transitions(suspects.len(), confirmed).await
    }

    /// Overwrite confirmed rows with their authoritative snapshots and
    /// enqueue one result notification per interested guild.
    async fn apply_transitions(
        &self,
        suspects: usize,
        confirmed: Vec<ApiMatch>,
    ) -> Result<DetectionReport> {
        let mut report = DetectionReport {
            suspects,
            confirmed: confirmed.len(),
            notifications_enqueued: 0,
        };
        if confirmed.is_empty() {
            return Ok(report);
        }

        let stats = self.matches.upsert(&confirmed).await;
        info!(
            "Applied {} confirmed transitions (updated={}, errors={})",
            confirmed.len(),
            stats.updated,
            stats.errors
        );

        let guilds = self.store.guilds_with_results_enabled().await?;
        for m in &confirmed {
            if m.status != MatchStatus::Finished {
                continue;
            }
            for guild in &guilds {
                match self
                    .store
                    .insert_result_notification(guild.guild_id, m.id)
                    .await
                {
                    Ok(true) => report.notifications_enqueued += 1,
                    Ok(false) => {}
                    Err(e) => warn!(
                        "Failed to enqueue result notification for guild {}, match {}: {}",
                        guild.guild_id, m.id, e
                    ),
                }
            }
        }

        Ok(report)
    }
}

/// The fast periodic cycle: refresh the running set, pick up new
/// upcoming matches and their reminders, then run suspect confirmation.
pub struct DetectionService {
    matches: Arc<MatchStore>,
    store: PostgresStore,
    source: Arc<dyn MatchDataSource>,
    detector: Arc<TransitionDetector>,
    scheduler: Arc<ReminderScheduler>,
    lock: CycleLock,
    metrics: Arc<Metrics>,
    fast_page_size: u32,
}

impl DetectionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        matches: Arc<MatchStore>,
        store: PostgresStore,
        source: Arc<dyn MatchDataSource>,
        detector: Arc<TransitionDetector>,
        scheduler: Arc<ReminderScheduler>,
        lock: CycleLock,
        metrics: Arc<Metrics>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            matches,
            store,
            source,
            detector,
            scheduler,
            lock,
            metrics,
            fast_page_size: config.fast_page_size,
        }
    }

    pub async fn run_cycle(&self) -> Result<()> {
        // Serialize the write phase against the coarse refresh cycle.
        let _guard = self.lock.acquire().await;
        let now = Utc::now();
        self.metrics.inc_detection_cycles();

        // Re-confirm live matches first: anything still running gets a
        // fresh updated_at and drops out of the suspect set.
        match self.source.fetch_running().await {
            Ok(running) => {
                let stats = self.matches.upsert(&running).await;
                self.metrics
                    .add_matches_upserted((stats.added + stats.updated) as u64);
            }
            Err(e) => warn!("Running fetch failed, skipping for this cycle: {}", e),
        }

        // Pick up newly announced matches and derive their reminders.
        match self.source.fetch_upcoming(self.fast_page_size).await {
            Ok(upcoming) => {
                let stats = self.matches.upsert(&upcoming).await;
                self.metrics
                    .add_matches_upserted((stats.added + stats.updated) as u64);
                if let Err(e) = self.schedule_new_reminders(now).await {
                    warn!("Reminder derivation failed: {}", e);
                }
            }
            Err(e) => warn!("Upcoming fetch failed, skipping for this cycle: {}", e),
        }

        match self.detector.fast_cycle(now).await {
            Ok(report) => {
                if report.confirmed > 0 {
                    self.metrics
                        .add_transitions_confirmed(report.confirmed as u64);
                }
            }
            // Confirmation fetch failed: nothing was mutated, next tick retries.
            Err(e) => warn!("Transition confirmation failed: {}", e),
        }

        Ok(())
    }

    async fn schedule_new_reminders(&self, now: DateTime<Utc>) -> Result<()> {
        let guilds = self.store.guilds_with_reminders_enabled().await?;
        if guilds.is_empty() {
            return Ok(());
        }

        let candidates = self
            .store
            .upcoming_matches(self.fast_page_size as i64)
            .await?;
        for guild in guilds {
            match self
                .scheduler
                .schedule_matches(guild.guild_id, &candidates, now)
                .await
            {
                Ok(n) if n > 0 => {
                    self.metrics.add_reminders_scheduled(n as u64);
                    debug!("Scheduled reminders for {} matches in guild {}", n, guild.guild_id);
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
                            error!("Detection cycle failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Detection loop stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::pandascore::MockMatchDataSource;
    use crate::domain::time::parse_utc;
    use crate::error::FragcastError;
    use serde_json::json;

    fn suspect(match_id: i64) -> MatchRecord {
        MatchRecord {
            match_id,
            status: MatchStatus::Running,
            snapshot: json!({}),
            begin_at: Some(parse_utc("2024-03-01T10:00:00Z").unwrap()),
            end_at: None,
            updated_at: parse_utc("2024-03-01T10:30:00Z").unwrap(),
        }
    }

    fn api_match(id: i64, status: MatchStatus) -> ApiMatch {
        ApiMatch::from_value(json!({"id": id, "status": status.as_str()})).unwrap()
    }

    #[test]
    fn only_decided_lookup_hits_confirm() {
        let suspects = vec![suspect(1), suspect(2), suspect(3)];
        let mut lookup = HashMap::new();
        lookup.insert(1, api_match(1, MatchStatus::Finished));
        // still running upstream: a lookup hit that must NOT confirm
        lookup.insert(2, api_match(2, MatchStatus::Running));
        // suspect 3 absent from lookup: stays running

        let confirmed = confirm_against(&suspects, &lookup);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, 1);
    }

    #[test]
    fn absence_alone_confirms_nothing() {
        let suspects = vec![suspect(1), suspect(2)];
        let confirmed = confirm_against(&suspects, &HashMap::new());
        assert!(confirmed.is_empty());
    }

    #[tokio::test]
    async fn lookup_spans_multiple_pages() {
        let mut source = MockMatchDataSource::new();
        source
            .expect_fetch_finished()
            .times(3)
            .returning(|page_size, page| {
                let base = (page as i64) * 100;
                Ok((0..page_size as i64)
                    .map(|i| api_match(base + i, MatchStatus::Finished))
                    .collect())
            });

        let lookup = finished_lookup(&source, 3, 2).await.unwrap();
        assert_eq!(lookup.len(), 6);
        assert!(lookup.contains_key(&301));
    }

    #[tokio::test]
    async fn short_page_stops_fetching_early() {
        let mut source = MockMatchDataSource::new();
        source
            .expect_fetch_finished()
            .times(1)
            .returning(|_, _| Ok(vec![api_match(1, MatchStatus::Finished)]));

        let lookup = finished_lookup(&source, 5, 50).await.unwrap();
        assert_eq!(lookup.len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_yields_no_partial_evidence() {
        let mut source = MockMatchDataSource::new();
        source
            .expect_fetch_finished()
            .times(2)
            .returning(|page_size, page| {
                if page == 1 {
                    Ok((0..page_size as i64)
                        .map(|i| api_match(i, MatchStatus::Finished))
                        .collect())
                } else {
                    Err(FragcastError::Upstream("HTTP 503".to_string()))
                }
            });

        assert!(finished_lookup(&source, 3, 10).await.is_err());
    }
}
