//! Temporal window maintenance.
//!
//! Keeps the match store at an approximately constant temporal depth:
//! old anchors are pruned, and when the stored anchor spread falls
//! below the configured minimum, historical pages are backfilled until
//! coverage recovers, the upstream runs dry, or the page ceiling hits.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::pandascore::MatchDataSource;
use crate::cache::match_store::MatchStore;
use crate::config::CacheConfig;
use crate::domain::time::hours_between;
use crate::domain::{MatchRecord, MatchStatus};
use crate::error::Result;

/// Whether a record's anchor falls inside `[now - window_hours, now]`.
pub fn is_within_window(record: &MatchRecord, now: DateTime<Utc>, window_hours: i64) -> bool {
    let anchor = record.temporal_anchor();
    anchor >= now - Duration::hours(window_hours) && anchor <= now
}

/// Coverage currently spanned by the store's anchors, in hours.
pub fn coverage_hours(oldest: DateTime<Utc>, newest: DateTime<Utc>) -> f64 {
    hours_between(newest, oldest).max(0.0)
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub deleted: usize,
    pub kept: usize,
    pub by_status: HashMap<MatchStatus, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageStatus {
    Sufficient,
    Insufficient,
}

#[derive(Debug)]
pub struct CoverageReport {
    pub status: CoverageStatus,
    pub pages_fetched: u32,
    pub added: u32,
}

pub struct TemporalWindow {
    matches: Arc<MatchStore>,
    source: Arc<dyn MatchDataSource>,
    window_hours: i64,
    backfill_page_size: u32,
    max_backfill_pages: u32,
}

impl TemporalWindow {
    pub fn new(
        matches: Arc<MatchStore>,
        source: Arc<dyn MatchDataSource>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            matches,
            source,
            window_hours: config.window_hours,
            backfill_page_size: config.backfill_page_size,
            max_backfill_pages: config.max_backfill_pages,
        }
    }

    /// Delete every match whose anchor predates the window cutoff.
    ///
    /// Iterates the full store; fine at the documented cache size, would
    /// need pagination at a larger one. Returns a per-status breakdown
    /// of what was removed.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = now - Duration::hours(self.window_hours);
        let all = self.matches.all().await?;

        let mut report = CleanupReport::default();
        let mut expired_ids = Vec::new();
        for record in &all {
            if record.temporal_anchor() < cutoff {
                expired_ids.push(record.match_id);
                *report.by_status.entry(record.status).or_insert(0) += 1;
            }
        }

        report.kept = all.len() - expired_ids.len();
        report.deleted = self.matches.delete_ids(&expired_ids).await? as usize;

        info!(
            "Window cleanup: deleted={}, kept={}, breakdown={:?}",
            report.deleted, report.kept, report.by_status
        );
        Ok(report)
    }

    /// Backfill historical pages until the anchor spread reaches
    /// `minimum_hours`. Page density varies with the event calendar, so
    /// this is a feedback loop on actual ingested coverage, not a fixed
    /// page count.
    pub async fn ensure_coverage(&self, minimum_hours: i64) -> Result<CoverageReport> {
        let mut pages_fetched: u32 = 0;
        let mut added: u32 = 0;

        loop {
            let coverage = match self.matches.anchor_bounds().await? {
                Some((oldest, newest)) => coverage_hours(oldest, newest),
                None => 0.0,
            };

            if coverage >= minimum_hours as f64 {
                return Ok(CoverageReport {
                    status: CoverageStatus::Sufficient,
                    pages_fetched,
                    added,
                });
            }

            if pages_fetched >= self.max_backfill_pages {
                warn!(
                    "Coverage {:.1}h below {}h after {} pages, giving up for this pass",
                    coverage, minimum_hours, pages_fetched
                );
                return Ok(CoverageReport {
                    status: CoverageStatus::Insufficient,
                    pages_fetched,
                    added,
                });
            }

            let page_number = pages_fetched + 1;
            let page = self
                .source
                .fetch_finished(self.backfill_page_size, page_number)
                .await?;
            pages_fetched = page_number;

            if page.is_empty() {
                info!(
                    "Upstream history exhausted at page {}, coverage {:.1}h",
                    page_number, coverage
                );
                return Ok(CoverageReport {
                    status: CoverageStatus::Insufficient,
                    pages_fetched,
                    added,
                });
            }

            let stats = self.matches.upsert(&page).await;
            added += stats.added;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time::parse_utc;
    use serde_json::json;

    fn record_with_anchor(
        match_id: i64,
        status: MatchStatus,
        begin_at: Option<&str>,
        end_at: Option<&str>,
        updated_at: &str,
    ) -> MatchRecord {
        MatchRecord {
            match_id,
            status,
            snapshot: json!({}),
            begin_at: begin_at.map(|s| parse_utc(s).unwrap()),
            end_at: end_at.map(|s| parse_utc(s).unwrap()),
            updated_at: parse_utc(updated_at).unwrap(),
        }
    }

    #[test]
    fn window_membership_uses_anchor_fallback() {
        let now = parse_utc("2024-03-03T12:00:00Z").unwrap();

        // end_at 1h ago: inside a 42h window
        let fresh = record_with_anchor(
            1,
            MatchStatus::Finished,
            Some("2024-03-03T09:00:00Z"),
            Some("2024-03-03T11:00:00Z"),
            "2024-03-03T11:05:00Z",
        );
        assert!(is_within_window(&fresh, now, 42));

        // end_at 50h ago: outside
        let old = record_with_anchor(
            2,
            MatchStatus::Finished,
            None,
            Some("2024-03-01T10:00:00Z"),
            "2024-03-03T11:00:00Z",
        );
        assert!(!is_within_window(&old, now, 42));

        // no end_at: begin_at decides even though updated_at is recent
        let no_end = record_with_anchor(
            3,
            MatchStatus::Finished,
            Some("2024-03-01T10:00:00Z"),
            None,
            "2024-03-03T11:59:00Z",
        );
        assert!(!is_within_window(&no_end, now, 42));

        // future anchor is not "within" the trailing window
        let upcoming = record_with_anchor(
            4,
            MatchStatus::NotStarted,
            Some("2024-03-04T18:00:00Z"),
            None,
            "2024-03-03T11:00:00Z",
        );
        assert!(!is_within_window(&upcoming, now, 42));
    }

    #[test]
    fn coverage_is_anchor_spread() {
        let oldest = parse_utc("2024-03-01T12:00:00Z").unwrap();
        let newest = parse_utc("2024-03-03T12:00:00Z").unwrap();
        assert_eq!(coverage_hours(oldest, newest), 48.0);
        // degenerate bounds clamp to zero rather than going negative
        assert_eq!(coverage_hours(newest, oldest), 0.0);
    }

    #[test]
    fn naive_and_aware_anchors_compare() {
        let aware = parse_utc("2024-03-03T12:00:00+00:00").unwrap();
        let naive = parse_utc("2024-03-01T12:00:00").unwrap();
        assert_eq!(coverage_hours(naive, aware), 48.0);
    }
}
