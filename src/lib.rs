pub mod adapters;
pub mod cache;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod services;

pub use adapters::{
    ApiMatch, Destination, DiscordNotifier, MatchDataSource, Notifier, PandaScoreClient,
    PostgresStore,
};
pub use cache::{CachePartition, MatchStore, StatusFilter, TemporalWindow, UpsertStats};
pub use config::AppConfig;
pub use coordination::{CycleLock, Shutdown};
pub use domain::{GuildConfig, MatchRecord, MatchStatus, Reminder, ResultNotification};
pub use error::{FragcastError, Result};
pub use services::{
    DetectionService, Metrics, NotificationDispatcher, RefreshService, ReminderScheduler,
    TransitionDetector,
};
