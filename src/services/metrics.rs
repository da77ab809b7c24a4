use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for observability
///
/// The pending-backlog gauge exists because dispatch retries forever by
/// design; operators watch it to notice deliveries that never succeed.
#[derive(Default)]
pub struct Metrics {
    pub refresh_cycles: AtomicU64,
    pub detection_cycles: AtomicU64,
    pub dispatch_cycles: AtomicU64,
    pub matches_upserted: AtomicU64,
    pub transitions_confirmed: AtomicU64,
    pub reminders_scheduled: AtomicU64,
    pub reminders_sent: AtomicU64,
    pub results_sent: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub unresolved_destinations: AtomicU64,
    pending_backlog: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_refresh_cycles(&self) {
        self.refresh_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_detection_cycles(&self) {
        self.detection_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dispatch_cycles(&self) {
        self.dispatch_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_matches_upserted(&self, n: u64) {
        self.matches_upserted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_transitions_confirmed(&self, n: u64) {
        self.transitions_confirmed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_reminders_scheduled(&self, n: u64) {
        self.reminders_scheduled.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_reminders_sent(&self) {
        self.reminders_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_results_sent(&self) {
        self.results_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_delivery_failures(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unresolved_destinations(&self) {
        self.unresolved_destinations.fetch_add(1, Ordering::Relaxed);
    }

    /// Past-due records still pending, sampled each dispatch cycle.
    pub fn set_pending_backlog(&self, n: u64) {
        self.pending_backlog.store(n, Ordering::Relaxed);
    }

    pub fn pending_backlog(&self) -> u64 {
        self.pending_backlog.load(Ordering::Relaxed)
    }

    /// Current counters as a formatted status block.
    pub fn summary(&self) -> String {
        format!(
            r#"
=== FRAGCAST STATUS ===
Cycles: refresh={} detect={} dispatch={}
Matches upserted: {} | Transitions: {}
Reminders: scheduled={} sent={} | Results sent: {}
Delivery failures: {} | Unresolved destinations: {}
Pending backlog (past due): {}
=======================
"#,
            self.refresh_cycles.load(Ordering::Relaxed),
            self.detection_cycles.load(Ordering::Relaxed),
            self.dispatch_cycles.load(Ordering::Relaxed),
            self.matches_upserted.load(Ordering::Relaxed),
            self.transitions_confirmed.load(Ordering::Relaxed),
            self.reminders_scheduled.load(Ordering::Relaxed),
            self.reminders_sent.load(Ordering::Relaxed),
            self.results_sent.load(Ordering::Relaxed),
            self.delivery_failures.load(Ordering::Relaxed),
            self.unresolved_destinations.load(Ordering::Relaxed),
            self.pending_backlog(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_gauge_overwrites() {
        let metrics = Metrics::new();
        metrics.set_pending_backlog(7);
        metrics.set_pending_backlog(3);
        assert_eq!(metrics.pending_backlog(), 3);
    }

    #[test]
    fn summary_reflects_counters() {
        let metrics = Metrics::new();
        metrics.inc_reminders_sent();
        metrics.inc_reminders_sent();
        assert!(metrics.summary().contains("sent=2"));
    }
}
