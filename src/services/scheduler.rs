//! Reminder derivation.
//!
//! Turns an upcoming match into its fixed set of one-shot reminder
//! rows for a guild. Creation is idempotent per (guild, match, offset)
//! via the table's uniqueness constraint; re-running for the same match
//! is a no-op for rows that already exist.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::adapters::postgres::PostgresStore;
use crate::domain::{MatchRecord, MatchStatus};
use crate::error::Result;

/// Minutes before match start at which reminders fire. Policy constant,
/// not configurable per call.
pub const REMINDER_OFFSETS_MIN: [i64; 5] = [60, 30, 15, 5, 0];

/// The (offset, fire time) pairs still in the future for a match
/// starting at `begin_at`. Offsets whose fire time has already passed
/// are dropped individually; a missed 60-minute warning never
/// suppresses a still-future 5-minute one.
pub fn reminder_times(
    begin_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<(i64, DateTime<Utc>)> {
    REMINDER_OFFSETS_MIN
        .iter()
        .filter_map(|&offset| {
            let fire_at = begin_at - Duration::minutes(offset);
            (fire_at > now).then_some((offset, fire_at))
        })
        .collect()
}

/// Only matches that still have a future to remind about are eligible.
pub fn is_eligible(record: &MatchRecord) -> bool {
    matches!(
        record.status,
        MatchStatus::NotStarted | MatchStatus::Running
    ) && record.begin_at.is_some()
}

pub struct ReminderScheduler {
    store: PostgresStore,
}

impl ReminderScheduler {
    pub fn new(store: PostgresStore) -> Self {
        Self { store }
    }

    /// Create the reminder rows for one (guild, match) pair. Returns the
    /// number of rows actually created; existing rows are left alone.
    /// Ineligible matches are silently skipped.
    pub async fn schedule_for_match(
        &self,
        guild_id: i64,
        record: &MatchRecord,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if !is_eligible(record) {
            return Ok(0);
        }
        let Some(begin_at) = record.begin_at else {
            return Ok(0);
        };

        let mut created = 0;
        for (offset, fire_at) in reminder_times(begin_at, now) {
            if self
                .store
                .insert_reminder(guild_id, record.match_id, offset as i32, fire_at)
                .await?
            {
                created += 1;
            }
        }

        if created > 0 {
            debug!(
                "Scheduled {} reminders for guild {}, match {}",
                created, guild_id, record.match_id
            );
        }
        Ok(created)
    }

    /// Bulk entry point. Returns the number of matches that had at least
    /// one reminder created — the caller-meaningful unit ("notifications
    /// active for N upcoming matches"), not the row count.
    pub async fn schedule_matches(
        &self,
        guild_id: i64,
        records: &[MatchRecord],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut matches_scheduled = 0;
        for record in records {
            match self.schedule_for_match(guild_id, record, now).await {
                Ok(created) if created > 0 => matches_scheduled += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Failed to schedule reminders for guild {}, match {}: {}",
                        guild_id, record.match_id, e
                    );
                }
            }
        }
        Ok(matches_scheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time::parse_utc;
    use serde_json::json;

    fn record(status: MatchStatus, begin_at: Option<&str>) -> MatchRecord {
        MatchRecord {
            match_id: 100,
            status,
            snapshot: json!({}),
            begin_at: begin_at.map(|s| parse_utc(s).unwrap()),
            end_at: None,
            updated_at: parse_utc("2024-03-01T00:00:00Z").unwrap(),
        }
    }

    #[test]
    fn all_offsets_created_well_before_start() {
        let begin = parse_utc("2024-03-01T18:00:00Z").unwrap();
        let now = parse_utc("2024-03-01T12:00:00Z").unwrap();

        let times = reminder_times(begin, now);
        assert_eq!(times.len(), 5);
        assert_eq!(times[0], (60, parse_utc("2024-03-01T17:00:00Z").unwrap()));
        assert_eq!(times[4], (0, begin));
    }

    #[test]
    fn past_offsets_are_dropped_individually() {
        let begin = parse_utc("2024-03-01T18:00:00Z").unwrap();
        // two minutes before start: only the 0-offset remains
        let now = parse_utc("2024-03-01T17:58:00Z").unwrap();

        let times = reminder_times(begin, now);
        assert_eq!(times.len(), 1);
        assert_eq!(times[0].0, 0);
    }

    #[test]
    fn nothing_scheduled_after_start() {
        let begin = parse_utc("2024-03-01T18:00:00Z").unwrap();
        let now = parse_utc("2024-03-01T18:00:01Z").unwrap();
        assert!(reminder_times(begin, now).is_empty());
    }

    #[test]
    fn mid_window_cutoff_keeps_later_offsets() {
        let begin = parse_utc("2024-03-01T18:00:00Z").unwrap();
        // 20 minutes out: 60/30 are gone, 15/5/0 remain
        let now = parse_utc("2024-03-01T17:40:00Z").unwrap();

        let offsets: Vec<i64> = reminder_times(begin, now).iter().map(|t| t.0).collect();
        assert_eq!(offsets, vec![15, 5, 0]);
    }

    #[test]
    fn eligibility_requires_future_and_start_time() {
        assert!(is_eligible(&record(
            MatchStatus::NotStarted,
            Some("2024-03-01T18:00:00Z")
        )));
        assert!(is_eligible(&record(
            MatchStatus::Running,
            Some("2024-03-01T18:00:00Z")
        )));
        assert!(!is_eligible(&record(
            MatchStatus::Finished,
            Some("2024-03-01T18:00:00Z")
        )));
        assert!(!is_eligible(&record(MatchStatus::NotStarted, None)));
    }
}
