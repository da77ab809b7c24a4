use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::FragcastError;

/// Upstream match lifecycle status.
///
/// The lifecycle is one-directional: `not_started -> running -> decided`.
/// A decided match may be re-filed between the terminal statuses (upstream
/// does move matches from finished to canceled on forfeits) but never
/// moves back to an earlier rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    NotStarted,
    Running,
    Finished,
    Canceled,
    Postponed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::NotStarted => "not_started",
            MatchStatus::Running => "running",
            MatchStatus::Finished => "finished",
            MatchStatus::Canceled => "canceled",
            MatchStatus::Postponed => "postponed",
        }
    }

    /// Position in the one-directional lifecycle. Decided statuses share
    /// the top rank; a write that would lower the rank is a regression.
    pub fn rank(&self) -> u8 {
        match self {
            MatchStatus::NotStarted => 0,
            MatchStatus::Running => 1,
            MatchStatus::Finished | MatchStatus::Canceled | MatchStatus::Postponed => 2,
        }
    }

    /// Whether this status is terminal ("results" in the query surface).
    pub fn is_decided(&self) -> bool {
        self.rank() == 2
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = FragcastError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "not_started" => Ok(MatchStatus::NotStarted),
            "running" => Ok(MatchStatus::Running),
            "finished" => Ok(MatchStatus::Finished),
            "canceled" | "cancelled" => Ok(MatchStatus::Canceled),
            "postponed" => Ok(MatchStatus::Postponed),
            _ => Err(FragcastError::UnknownStatus(raw.to_string())),
        }
    }
}

/// A cached match snapshot as held in the `matches` table.
///
/// The `snapshot` is the full upstream payload and is treated as opaque
/// by the cache; only id, status and the two timestamps are indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: i64,
    pub status: MatchStatus,
    pub snapshot: serde_json::Value,
    pub begin_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MatchRecord {
    /// The timestamp used for retention decisions: `end_at` when present,
    /// else `begin_at`, else the last write. Upstream omits `end_at` for
    /// some finished matches, hence the fallback chain.
    pub fn temporal_anchor(&self) -> DateTime<Utc> {
        self.end_at.or(self.begin_at).unwrap_or(self.updated_at)
    }

    /// Display name pulled from the snapshot, falling back to the
    /// opponent names and finally the match id.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.snapshot.get("name").and_then(|v| v.as_str()) {
            if !name.is_empty() {
                return name.to_string();
            }
        }
        let (one, two) = self.team_names();
        if one != "TBD" || two != "TBD" {
            return format!("{} vs {}", one, two);
        }
        format!("match {}", self.match_id)
    }

    /// Opponent names from the snapshot, "TBD" for unfilled slots.
    pub fn team_names(&self) -> (String, String) {
        let name_at = |idx: usize| -> String {
            self.snapshot
                .pointer(&format!("/opponents/{}/opponent/name", idx))
                .and_then(|v| v.as_str())
                .unwrap_or("TBD")
                .to_string()
        };
        (name_at(0), name_at(1))
    }

    /// Score line ("2:1") from the snapshot's results array, if present.
    pub fn score_line(&self) -> Option<String> {
        let results = self.snapshot.get("results")?.as_array()?;
        let scores: Vec<String> = results
            .iter()
            .filter_map(|r| r.get("score").and_then(|s| s.as_i64()))
            .map(|s| s.to_string())
            .collect();
        if scores.len() < 2 {
            return None;
        }
        Some(scores.join(":"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(s: &str) -> DateTime<Utc> {
        crate::domain::time::parse_utc(s).unwrap()
    }

    fn record(
        begin_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
        snapshot: serde_json::Value,
    ) -> MatchRecord {
        MatchRecord {
            match_id: 1,
            status: MatchStatus::Finished,
            snapshot,
            begin_at,
            end_at,
            updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            MatchStatus::NotStarted,
            MatchStatus::Running,
            MatchStatus::Finished,
            MatchStatus::Canceled,
            MatchStatus::Postponed,
        ] {
            assert_eq!(status.as_str().parse::<MatchStatus>().unwrap(), status);
        }
        assert!("imaginary".parse::<MatchStatus>().is_err());
    }

    #[test]
    fn rank_never_regresses_along_lifecycle() {
        assert!(MatchStatus::NotStarted.rank() < MatchStatus::Running.rank());
        assert!(MatchStatus::Running.rank() < MatchStatus::Finished.rank());
        assert_eq!(MatchStatus::Finished.rank(), MatchStatus::Canceled.rank());
    }

    #[test]
    fn anchor_prefers_end_then_begin_then_write() {
        let begin = ts("2024-03-01T10:00:00Z");
        let end = ts("2024-03-01T12:00:00Z");

        let full = record(Some(begin), Some(end), json!({}));
        assert_eq!(full.temporal_anchor(), end);

        let no_end = record(Some(begin), None, json!({}));
        assert_eq!(no_end.temporal_anchor(), begin);

        let bare = record(None, None, json!({}));
        assert_eq!(bare.temporal_anchor(), bare.updated_at);
    }

    #[test]
    fn display_name_falls_back_to_opponents() {
        let snapshot = json!({
            "opponents": [
                {"opponent": {"name": "Natus Vincere"}},
                {"opponent": {"name": "FaZe"}}
            ]
        });
        let rec = record(None, None, snapshot);
        assert_eq!(rec.display_name(), "Natus Vincere vs FaZe");
    }

    #[test]
    fn score_line_requires_both_scores() {
        let rec = record(
            None,
            None,
            json!({"results": [{"score": 2, "team_id": 1}, {"score": 1, "team_id": 2}]}),
        );
        assert_eq!(rec.score_line().as_deref(), Some("2:1"));

        let partial = record(None, None, json!({"results": [{"score": 2}]}));
        assert_eq!(partial.score_line(), None);
    }
}
