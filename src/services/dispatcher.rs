//! Notification dispatch.
//!
//! The single component allowed to flip `sent` on reminder and result
//! records. Each cycle queries pending records, attempts the due ones,
//! and leaves everything that could not be delivered pending for the
//! next tick — an indefinite retry policy, made observable through the
//! pending-backlog gauge.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::adapters::discord::Notifier;
use crate::adapters::postgres::PostgresStore;
use crate::cache::match_store::MatchStore;
use crate::domain::{MatchRecord, Reminder, ResultNotification};
use crate::error::Result;
use crate::services::metrics::Metrics;

/// Age in minutes past which a still-undelivered due backlog is worth
/// warning about.
const STUCK_BACKLOG_AGE_MIN: i64 = 60;

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchReport {
    pub reminders_sent: usize,
    pub results_sent: usize,
    pub left_pending: usize,
}

/// Reminder message text. Presentation is deliberately plain; embeds
/// belong to the command surface.
pub fn render_reminder(record: &MatchRecord, offset_minutes: i32) -> String {
    let name = record.display_name();
    if offset_minutes == 0 {
        format!("\u{23f0} {} is starting now!", name)
    } else {
        format!("\u{23f0} {} starts in {} minutes", name, offset_minutes)
    }
}

pub fn render_result(record: &MatchRecord) -> String {
    let name = record.display_name();
    match record.score_line() {
        Some(score) => format!("\u{1f3c1} {} finished {}", name, score),
        None => format!("\u{1f3c1} {} has finished", name),
    }
}

pub struct NotificationDispatcher {
    store: PostgresStore,
    matches: Arc<MatchStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
}

impl NotificationDispatcher {
    pub fn new(
        store: PostgresStore,
        matches: Arc<MatchStore>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            matches,
            notifier,
            metrics,
        }
    }

    /// One dispatch tick: reminders pass, then results pass. The two
    /// passes are independent; a failure in one never blocks the other.
    pub async fn run_cycle(&self) -> Result<DispatchReport> {
        let now = Utc::now();
        self.metrics.inc_dispatch_cycles();
        let mut report = DispatchReport::default();

        match self.dispatch_reminders(now).await {
            Ok((sent, pending)) => {
                report.reminders_sent = sent;
                report.left_pending += pending;
            }
            Err(e) => warn!("Reminder pass failed: {}", e),
        }

        match self.dispatch_results(now).await {
            Ok((sent, pending)) => {
                report.results_sent = sent;
                report.left_pending += pending;
            }
            Err(e) => warn!("Result pass failed: {}", e),
        }

        self.update_backlog_gauge(now).await;
        Ok(report)
    }

    async fn dispatch_reminders(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let pending = self.store.pending_reminders().await?;
        let mut sent = 0;
        let mut left_pending = 0;

        for reminder in pending {
            if !reminder.is_due(now) {
                continue;
            }
            match self.dispatch_one_reminder(&reminder, now).await {
                Ok(true) => sent += 1,
                Ok(false) => left_pending += 1,
                Err(e) => {
                    warn!(
                        "Reminder delivery failed (guild {}, match {}, offset {}m): {}",
                        reminder.guild_id, reminder.match_id, reminder.offset_minutes, e
                    );
                    self.metrics.inc_delivery_failures();
                    left_pending += 1;
                }
            }
        }

        Ok((sent, left_pending))
    }

    /// Attempt one reminder. Ok(true) = delivered and flipped;
    /// Ok(false) = intentionally left pending (unresolved destination,
    /// disabled guild, evicted match) for the next cycle.
    async fn dispatch_one_reminder(&self, reminder: &Reminder, now: DateTime<Utc>) -> Result<bool> {
        let Some(config) = self.store.get_guild_config(reminder.guild_id).await? else {
            debug!(
                "Guild {} unknown, leaving reminder {} pending",
                reminder.guild_id, reminder.id
            );
            self.metrics.inc_unresolved_destinations();
            return Ok(false);
        };
        if !config.reminders_enabled {
            debug!(
                "Reminders disabled for guild {}, leaving reminder {} pending",
                reminder.guild_id, reminder.id
            );
            return Ok(false);
        }

        let Some(destination) = self.notifier.resolve_destination(reminder.guild_id).await? else {
            debug!(
                "No channel configured for guild {}, leaving reminder {} pending",
                reminder.guild_id, reminder.id
            );
            self.metrics.inc_unresolved_destinations();
            return Ok(false);
        };

        let Some(record) = self.matches.get(reminder.match_id).await? else {
            debug!(
                "Match {} evicted from cache, leaving reminder {} pending",
                reminder.match_id, reminder.id
            );
            return Ok(false);
        };

        let message = render_reminder(&record, reminder.offset_minutes);
        self.notifier.send(&destination, &message).await?;

        if self.store.mark_reminder_sent(reminder.id, now).await? {
            self.metrics.inc_reminders_sent();
        }
        Ok(true)
    }

    async fn dispatch_results(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let pending = self.store.pending_result_notifications().await?;
        let mut sent = 0;
        let mut left_pending = 0;

        for notification in pending {
            match self.dispatch_one_result(&notification, now).await {
                Ok(true) => sent += 1,
                Ok(false) => left_pending += 1,
                Err(e) => {
                    warn!(
                        "Result delivery failed (guild {}, match {}): {}",
                        notification.guild_id, notification.match_id, e
                    );
                    self.metrics.inc_delivery_failures();
                    left_pending += 1;
                }
            }
        }

        Ok((sent, left_pending))
    }

    async fn dispatch_one_result(
        &self,
        notification: &ResultNotification,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(config) = self.store.get_guild_config(notification.guild_id).await? else {
            self.metrics.inc_unresolved_destinations();
            return Ok(false);
        };
        if !config.results_enabled {
            return Ok(false);
        }

        let Some(destination) = self
            .notifier
            .resolve_destination(notification.guild_id)
            .await?
        else {
            self.metrics.inc_unresolved_destinations();
            return Ok(false);
        };

        let Some(record) = self.matches.get(notification.match_id).await? else {
            debug!(
                "Match {} evicted from cache, leaving result notification {} pending",
                notification.match_id, notification.id
            );
            return Ok(false);
        };

        let message = render_result(&record);
        self.notifier.send(&destination, &message).await?;

        if self
            .store
            .mark_result_notification_sent(notification.id, now)
            .await?
        {
            self.metrics.inc_results_sent();
        }
        Ok(true)
    }

    async fn update_backlog_gauge(&self, now: DateTime<Utc>) {
        match self.store.count_due_pending_reminders(now).await {
            Ok(backlog) => {
                self.metrics.set_pending_backlog(backlog);
                if backlog > 0 {
                    if let Ok(Some(oldest)) = self.store.oldest_due_pending_reminder(now).await {
                        if now - oldest > Duration::minutes(STUCK_BACKLOG_AGE_MIN) {
                            warn!(
                                "{} due reminders still pending, oldest due since {}",
                                backlog, oldest
                            );
                        }
                    }
                }
            }
            Err(e) => warn!("Backlog gauge update failed: {}", e),
        }
    }

    /// Run the dispatch cycle on a fixed interval until shutdown. Does
    /// not take the cycle lock: this loop only reads match rows and owns
    /// its single-record sent flips.
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
                            error!("Dispatch cycle failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Dispatch loop stopping");
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
    use crate::domain::MatchStatus;
    use serde_json::json;

    fn record(snapshot: serde_json::Value) -> MatchRecord {
        MatchRecord {
            match_id: 9,
            status: MatchStatus::Running,
            snapshot,
            begin_at: None,
            end_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn reminder_text_distinguishes_start() {
        let rec = record(json!({"name": "NaVi vs FaZe"}));
        assert_eq!(
            render_reminder(&rec, 15),
            "\u{23f0} NaVi vs FaZe starts in 15 minutes"
        );
        assert_eq!(
            render_reminder(&rec, 0),
            "\u{23f0} NaVi vs FaZe is starting now!"
        );
    }

    #[test]
    fn result_text_includes_score_when_known() {
        let with_score = record(json!({
            "name": "NaVi vs FaZe",
            "results": [{"score": 2}, {"score": 0}]
        }));
        assert_eq!(
            render_result(&with_score),
            "\u{1f3c1} NaVi vs FaZe finished 2:0"
        );

        let without = record(json!({"name": "NaVi vs FaZe"}));
        assert_eq!(render_result(&without), "\u{1f3c1} NaVi vs FaZe has finished");
    }
}
