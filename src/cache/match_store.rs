//! Durable match snapshot store with a derived in-memory read cache.
//!
//! The store owns the match-table lifecycle: batch upserts with
//! per-record isolation, the status monotonicity guard, windowed
//! deletion, and a best-effort partitioned cache serving
//! latency-sensitive reads without touching PostgreSQL.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::adapters::pandascore::ApiMatch;
use crate::adapters::postgres::PostgresStore;
use crate::config::CacheConfig;
use crate::domain::{MatchRecord, MatchStatus};
use crate::error::Result;

/// Status filter for match queries. `Results` is the synthetic filter
/// covering every decided status, matching the single "results" surface
/// the bot exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Status(MatchStatus),
    Results,
}

impl StatusFilter {
    pub fn as_param(&self) -> &'static str {
        match self {
            StatusFilter::Status(status) => status.as_str(),
            StatusFilter::Results => "results",
        }
    }
}

/// Read-cache partitions, one per primary status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePartition {
    Upcoming,
    Running,
    Results,
}

/// Outcome counts for one upsert batch. `skipped` counts writes rejected
/// by the status monotonicity guard; `errors` counts per-record failures
/// that did not abort the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub added: u32,
    pub updated: u32,
    pub skipped: u32,
    pub errors: u32,
}

enum UpsertOutcome {
    Added,
    Updated,
    Skipped,
}

pub struct MatchStore {
    store: PostgresStore,
    query_timeout: Duration,
    read_cache_limit: i64,
    read_cache: RwLock<HashMap<CachePartition, Vec<MatchRecord>>>,
}

impl MatchStore {
    pub fn new(store: PostgresStore, config: &CacheConfig) -> Self {
        Self {
            store,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            read_cache_limit: config.read_cache_limit,
            read_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Batch upsert. One record failing is counted and skipped, never
    /// raised; last write wins per match id within a rank.
    pub async fn upsert(&self, matches: &[ApiMatch]) -> UpsertStats {
        let now = Utc::now();
        let mut stats = UpsertStats::default();

        for m in matches {
            match self.upsert_one(m, now).await {
                Ok(UpsertOutcome::Added) => stats.added += 1,
                Ok(UpsertOutcome::Updated) => stats.updated += 1,
                Ok(UpsertOutcome::Skipped) => stats.skipped += 1,
                Err(e) => {
                    warn!("Failed to upsert match {}: {}", m.id, e);
                    stats.errors += 1;
                }
            }
        }

        if stats.added + stats.updated > 0 {
            if let Err(e) = self.rebuild_read_cache().await {
                warn!("Read cache rebuild failed: {}", e);
            }
        }

        stats
    }

    async fn upsert_one(&self, m: &ApiMatch, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        match self.store.get_match_status(m.id).await? {
            None => {
                self.store.upsert_match(m, now).await?;
                Ok(UpsertOutcome::Added)
            }
            Some(existing) => {
                if m.status.rank() < existing.rank() {
                    warn!(
                        "Rejected status regression for match {}: {} -> {}",
                        m.id, existing, m.status
                    );
                    return Ok(UpsertOutcome::Skipped);
                }
                self.store.upsert_match(m, now).await?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    /// Filtered query with the interactive-read timeout. Degrades to an
    /// empty list on timeout or error; interactive callers render
    /// "nothing available" rather than waiting.
    pub async fn query(
        &self,
        filter: Option<StatusFilter>,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Vec<MatchRecord> {
        match timeout(
            self.query_timeout,
            self.store.query_matches(filter, since, limit),
        )
        .await
        {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!("Match query failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Match query timed out after {:?}, returning empty",
                    self.query_timeout
                );
                Vec::new()
            }
        }
    }

    /// Best-effort cached read. May be empty or stale; callers fall back
    /// to `query` when they need authoritative data.
    pub async fn cached(&self, partition: CachePartition) -> Vec<MatchRecord> {
        self.read_cache
            .read()
            .await
            .get(&partition)
            .cloned()
            .unwrap_or_default()
    }

    /// Rebuild the whole read cache from the durable store. The cache is
    /// replaced wholesale; partial mutation is not permitted.
    async fn rebuild_read_cache(&self) -> Result<()> {
        let upcoming = self.store.upcoming_matches(self.read_cache_limit).await?;
        let running = self.store.running_matches(self.read_cache_limit).await?;
        let results = self.store.recent_results(self.read_cache_limit).await?;

        let mut fresh = HashMap::new();
        fresh.insert(CachePartition::Upcoming, upcoming);
        fresh.insert(CachePartition::Running, running);
        fresh.insert(CachePartition::Results, results);

        *self.read_cache.write().await = fresh;
        debug!("Read cache rebuilt");
        Ok(())
    }

    pub async fn get(&self, match_id: i64) -> Result<Option<MatchRecord>> {
        self.store.get_match(match_id).await
    }

    pub async fn all(&self) -> Result<Vec<MatchRecord>> {
        self.store.all_matches().await
    }

    pub async fn stale_running(&self, older_than: DateTime<Utc>) -> Result<Vec<MatchRecord>> {
        self.store.stale_running(older_than).await
    }

    pub async fn delete_ids(&self, match_ids: &[i64]) -> Result<u64> {
        self.store.delete_matches(match_ids).await
    }

    /// Remove matches whose temporal anchor predates `cutoff`. Rows
    /// without a derivable anchor are kept.
    pub async fn delete_outside_window(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.store.delete_matches_outside(cutoff).await
    }

    pub async fn anchor_bounds(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        self.store.anchor_bounds().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_params_cover_results_surface() {
        assert_eq!(
            StatusFilter::Status(MatchStatus::Running).as_param(),
            "running"
        );
        assert_eq!(StatusFilter::Results.as_param(), "results");
    }

    #[test]
    fn stats_default_to_zero() {
        let stats = UpsertStats::default();
        assert_eq!(stats.added + stats.updated + stats.skipped + stats.errors, 0);
    }
}
