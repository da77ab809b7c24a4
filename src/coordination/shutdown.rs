//! Graceful shutdown signalling.
//!
//! A single watch channel flips to true on SIGINT/SIGTERM; every
//! service loop selects on its receiver and exits at the next
//! opportunity. Cycles are short and idempotent across restarts, so no
//! phased drain is needed.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers that trigger shutdown.
pub fn install_signal_handlers(shutdown: Arc<Shutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let for_sigterm = shutdown.clone();
        tokio::spawn(async move {
            if let Ok(mut stream) = signal(SignalKind::terminate()) {
                stream.recv().await;
                info!("Received SIGTERM");
                for_sigterm.trigger();
            }
        });

        let for_sigint = shutdown;
        tokio::spawn(async move {
            if let Ok(mut stream) = signal(SignalKind::interrupt()) {
                stream.recv().await;
                info!("Received SIGINT");
                for_sigint.trigger();
            }
        });
    }

    #[cfg(windows)]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                shutdown.trigger();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();

        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        assert!(shutdown.is_triggered());

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
