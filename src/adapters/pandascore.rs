//! PandaScore Counter-Strike match API client.
//!
//! Thin read-only client over the four match categories the cache
//! consumes. Pagination, rate-limit backoff and non-CS videogames are
//! out of scope; callers treat each fetch as one best-effort page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::config::PandascoreConfig;
use crate::domain::time::flexible_utc;
use crate::domain::MatchStatus;
use crate::error::{FragcastError, Result};

/// One match as returned by the upstream API.
///
/// Typed fields cover what the cache indexes; `raw` carries the full
/// payload for pass-through storage.
#[derive(Debug, Clone)]
pub struct ApiMatch {
    pub id: i64,
    pub status: MatchStatus,
    pub begin_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
struct ApiMatchFields {
    id: i64,
    status: MatchStatus,
    #[serde(default, with = "flexible_utc")]
    begin_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_utc")]
    end_at: Option<DateTime<Utc>>,
}

impl ApiMatch {
    /// Parse one payload entry, keeping the full value as the snapshot.
    pub fn from_value(value: Value) -> Result<Self> {
        let fields: ApiMatchFields = serde_json::from_value(value.clone())
            .map_err(|e| FragcastError::InvalidMatchPayload(e.to_string()))?;
        Ok(Self {
            id: fields.id,
            status: fields.status,
            begin_at: fields.begin_at,
            end_at: fields.end_at,
            raw: value,
        })
    }
}

/// Upstream match-data collaborator consumed by the cache subsystem.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchDataSource: Send + Sync {
    async fn fetch_upcoming(&self, page_size: u32) -> Result<Vec<ApiMatch>>;

    async fn fetch_running(&self) -> Result<Vec<ApiMatch>>;

    /// Finished matches, most recent end time first. `page` is 1-based.
    async fn fetch_finished(&self, page_size: u32, page: u32) -> Result<Vec<ApiMatch>>;

    async fn fetch_canceled(&self, page_size: u32) -> Result<Vec<ApiMatch>>;
}

/// HTTP client for the PandaScore CS:GO endpoints.
pub struct PandaScoreClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl PandaScoreClient {
    pub fn new(config: &PandascoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn get_page(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<ApiMatch>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(FragcastError::Upstream(format!(
                "HTTP {} for {}: {}",
                status, path, body
            )));
        }

        let values: Vec<Value> = response.json().await?;
        Ok(parse_page(values))
    }
}

/// Parse a page of payload entries, skipping malformed ones so a single
/// bad record cannot discard the rest of the page.
fn parse_page(values: Vec<Value>) -> Vec<ApiMatch> {
    let mut matches = Vec::with_capacity(values.len());
    for value in values {
        match ApiMatch::from_value(value) {
            Ok(m) => matches.push(m),
            Err(e) => warn!("skipping malformed match payload: {}", e),
        }
    }
    matches
}

#[async_trait]
impl MatchDataSource for PandaScoreClient {
    async fn fetch_upcoming(&self, page_size: u32) -> Result<Vec<ApiMatch>> {
        self.get_page(
            "/csgo/matches/upcoming",
            &[
                ("sort", "begin_at".to_string()),
                ("page[size]", page_size.to_string()),
            ],
        )
        .await
    }

    async fn fetch_running(&self) -> Result<Vec<ApiMatch>> {
        self.get_page("/csgo/matches/running", &[]).await
    }

    async fn fetch_finished(&self, page_size: u32, page: u32) -> Result<Vec<ApiMatch>> {
        self.get_page(
            "/csgo/matches/past",
            &[
                ("sort", "-end_at".to_string()),
                ("page[size]", page_size.to_string()),
                ("page[number]", page.to_string()),
            ],
        )
        .await
    }

    async fn fetch_canceled(&self, page_size: u32) -> Result<Vec<ApiMatch>> {
        self.get_page(
            "/csgo/matches",
            &[
                ("filter[status]", "canceled".to_string()),
                ("sort", "-modified_at".to_string()),
                ("page[size]", page_size.to_string()),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_keeps_full_payload() {
        let value = json!({
            "id": 1042,
            "status": "running",
            "begin_at": "2024-03-01T18:00:00Z",
            "end_at": null,
            "name": "NaVi vs FaZe",
            "tournament": {"name": "Major"}
        });
        let m = ApiMatch::from_value(value.clone()).unwrap();
        assert_eq!(m.id, 1042);
        assert_eq!(m.status, MatchStatus::Running);
        assert!(m.begin_at.is_some());
        assert!(m.end_at.is_none());
        assert_eq!(m.raw, value);
    }

    #[test]
    fn from_value_normalizes_naive_timestamps() {
        let m = ApiMatch::from_value(json!({
            "id": 7,
            "status": "finished",
            "begin_at": "2024-03-01T10:00:00",
            "end_at": "2024-03-01T12:00:00+02:00"
        }))
        .unwrap();
        // naive treated as UTC, aware normalized to UTC
        assert_eq!(m.begin_at.unwrap().to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert_eq!(m.end_at.unwrap().to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn parse_page_isolates_malformed_entries() {
        let page = parse_page(vec![
            json!({"id": 1, "status": "finished"}),
            json!({"status": "finished"}),
            json!({"id": 3, "status": "running"}),
        ]);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, 1);
        assert_eq!(page[1].id, 3);
    }
}
