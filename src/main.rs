use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use fragcast::adapters::{DiscordNotifier, MatchDataSource, Notifier, PandaScoreClient};
use fragcast::cache::{MatchStore, TemporalWindow};
use fragcast::config::{AppConfig, LoggingConfig};
use fragcast::coordination::{install_signal_handlers, CycleLock, Shutdown};
use fragcast::services::{
    DetectionService, Metrics, NotificationDispatcher, RefreshService, ReminderScheduler,
    TransitionDetector,
};
use fragcast::PostgresStore;

#[derive(Parser)]
#[command(name = "fragcast", about = "Counter-Strike match reminder bot for Discord")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "FRAGCAST_CONFIG")]
    config: Option<PathBuf>,
}

fn init_tracing(config: &LoggingConfig) {
    let level = if config.level.is_empty() {
        "info"
    } else {
        config.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);
    info!("fragcast starting");

    let store = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;

    let source: Arc<dyn MatchDataSource> = Arc::new(PandaScoreClient::new(&config.pandascore)?);
    let notifier: Arc<dyn Notifier> =
        Arc::new(DiscordNotifier::new(&config.discord, store.clone())?);

    let matches = Arc::new(MatchStore::new(store.clone(), &config.cache));
    let metrics = Arc::new(Metrics::new());
    let lock = CycleLock::new();

    let scheduler = Arc::new(ReminderScheduler::new(store.clone()));
    let detector = Arc::new(TransitionDetector::new(
        matches.clone(),
        store.clone(),
        source.clone(),
        &config.scheduler,
        config.pandascore.page_size,
    ));
    let window = TemporalWindow::new(matches.clone(), source.clone(), &config.cache);

    let refresh = Arc::new(RefreshService::new(
        matches.clone(),
        store.clone(),
        source.clone(),
        window,
        detector.clone(),
        scheduler.clone(),
        lock.clone(),
        metrics.clone(),
        &config.cache,
        config.pandascore.page_size,
    ));
    let detection = Arc::new(DetectionService::new(
        matches.clone(),
        store.clone(),
        source.clone(),
        detector,
        scheduler,
        lock,
        metrics.clone(),
        &config.scheduler,
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store,
        matches,
        notifier,
        metrics.clone(),
    ));

    let shutdown = Arc::new(Shutdown::new());
    install_signal_handlers(shutdown.clone());

    let refresh_handle = refresh.spawn(
        config.scheduler.refresh_interval_secs,
        shutdown.subscribe(),
    );
    let detection_handle = detection.spawn(
        config.scheduler.detection_interval_secs,
        shutdown.subscribe(),
    );
    let dispatch_handle = dispatcher.spawn(
        config.scheduler.dispatch_interval_secs,
        shutdown.subscribe(),
    );
    info!(
        "Cycles running: refresh every {}s, detection every {}s, dispatch every {}s",
        config.scheduler.refresh_interval_secs,
        config.scheduler.detection_interval_secs,
        config.scheduler.dispatch_interval_secs
    );

    let mut rx = shutdown.subscribe();
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }

    let _ = tokio::join!(refresh_handle, detection_handle, dispatch_handle);
    info!("{}", metrics.summary());
    info!("fragcast stopped");
    Ok(())
}
