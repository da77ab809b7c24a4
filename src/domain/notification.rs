use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A one-shot pre-match reminder.
///
/// At most one row exists per (guild_id, match_id, offset_minutes).
/// Once `sent` flips to true the row is immutable history; only the
/// dispatcher performs that flip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub guild_id: i64,
    pub match_id: i64,
    pub offset_minutes: i32,
    pub scheduled_time: DateTime<Utc>,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Reminder {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.sent && self.scheduled_time <= now
    }
}

/// A one-shot "match finished" notification, one per (guild, match).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultNotification {
    pub id: i64,
    pub guild_id: i64,
    pub match_id: i64,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Per-guild notification settings, written by the command surface and
/// read-only for this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: i64,
    pub channel_id: Option<i64>,
    pub reminders_enabled: bool,
    pub results_enabled: bool,
    pub timezone: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn due_requires_unsent_and_elapsed() {
        let now = Utc::now();
        let mut reminder = Reminder {
            id: 1,
            guild_id: 10,
            match_id: 100,
            offset_minutes: 15,
            scheduled_time: now - Duration::seconds(10),
            sent: false,
            sent_at: None,
        };
        assert!(reminder.is_due(now));

        reminder.sent = true;
        assert!(!reminder.is_due(now));

        reminder.sent = false;
        reminder.scheduled_time = now + Duration::seconds(10);
        assert!(!reminder.is_due(now));
    }
}
