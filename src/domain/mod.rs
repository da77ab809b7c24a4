pub mod match_record;
pub mod notification;
pub mod time;

pub use match_record::{MatchRecord, MatchStatus};
pub use notification::{GuildConfig, Reminder, ResultNotification};
