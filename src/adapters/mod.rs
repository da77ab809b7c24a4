pub mod discord;
pub mod pandascore;
pub mod postgres;

pub use discord::{Destination, DiscordNotifier, Notifier};
pub use pandascore::{ApiMatch, MatchDataSource, PandaScoreClient};
pub use postgres::PostgresStore;
