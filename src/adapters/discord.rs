//! Discord outbound notifications.
//!
//! Plain-text channel messages over the Discord REST API. Embeds,
//! slash commands and permission handling live in the command surface,
//! not here.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::adapters::postgres::PostgresStore;
use crate::config::DiscordConfig;
use crate::error::{FragcastError, Result};

/// A resolved delivery target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub channel_id: i64,
}

/// Outbound chat collaborator consumed by the dispatcher.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Map a guild to its configured notification channel. None when the
    /// guild is unknown or has no channel configured.
    async fn resolve_destination(&self, guild_id: i64) -> Result<Option<Destination>>;

    /// Deliver one message. Failure is returned, never swallowed.
    async fn send(&self, destination: &Destination, message: &str) -> Result<()>;
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

/// Notifier backed by the Discord REST API and the guild-config table.
pub struct DiscordNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    store: PostgresStore,
}

impl DiscordNotifier {
    pub fn new(config: &DiscordConfig, store: PostgresStore) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            store,
        })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn resolve_destination(&self, guild_id: i64) -> Result<Option<Destination>> {
        let config = self.store.get_guild_config(guild_id).await?;
        Ok(config
            .and_then(|c| c.channel_id)
            .map(|channel_id| Destination { channel_id }))
    }

    async fn send(&self, destination: &Destination, message: &str) -> Result<()> {
        let url = format!(
            "{}/channels/{}/messages",
            self.api_base, destination.channel_id
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&CreateMessage { content: message })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(FragcastError::Discord(format!(
                "HTTP {} posting to channel {}: {}",
                status, destination.channel_id, body
            )));
        }

        debug!("Message delivered to channel {}", destination.channel_id);
        Ok(())
    }
}
