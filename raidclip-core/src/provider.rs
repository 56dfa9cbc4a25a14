//! Clip provider: lists a channel's clips.
//!
//! [`HelixClipProvider`] talks to the Twitch Helix API. Everything else in
//! the engine only sees [`ClipProvider`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use raidclip_common::models::Clip;
use raidclip_common::ProviderError;
use regex::Regex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info};

pub const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";
pub const ENV_CLIENT_ID: &str = "TWITCH_CLIENT_ID";
pub const ENV_ACCESS_TOKEN: &str = "TWITCH_ACCESS_TOKEN";

/// Clips fetched per raid lookup.
const MAX_CLIPS: usize = 4;
/// Clips fetched per watch window.
const MAX_RECENT_CLIPS: usize = 20;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClipProvider: Send + Sync {
    /// Current clips of `channel` (a login name), possibly none.
    async fn clips_for(&self, channel: &str) -> Result<Vec<Clip>, ProviderError>;

    /// Clips of `channel` created at or after `since`, featured or not.
    async fn recent_clips(&self, channel: &str, since: DateTime<Utc>) -> Result<Vec<Clip>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct HelixPage<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
}

#[derive(Debug, Deserialize)]
struct HelixClip {
    id: String,
    url: String,
    title: String,
    view_count: u64,
    thumbnail_url: String,
    duration: f64,
}

pub struct HelixClipProvider {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    access_token: String,
    /// login -> broadcaster id
    user_ids: DashMap<String, String>,
    preview_suffix: Regex,
}

impl HelixClipProvider {
    pub fn new(client_id: impl Into<String>, access_token: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_base_url(HELIX_BASE_URL, client_id, access_token)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        let preview_suffix = Regex::new("-preview-.*").map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            access_token: access_token.into(),
            user_ids: DashMap::new(),
            preview_suffix,
        })
    }

    /// Reads `TWITCH_CLIENT_ID` / `TWITCH_ACCESS_TOKEN`. `None` if either is unset.
    pub fn from_env() -> Option<Result<Self, ProviderError>> {
        let client_id = std::env::var(ENV_CLIENT_ID).ok().filter(|s| !s.is_empty())?;
        let token = std::env::var(ENV_ACCESS_TOKEN).ok().filter(|s| !s.is_empty())?;
        Some(Self::new(client_id, token))
    }

    /// Direct media URL of a clip, derived from its thumbnail.
    pub fn thumbnail_to_mp4(&self, thumbnail_url: &str) -> String {
        self.preview_suffix.replace(thumbnail_url, ".mp4").into_owned()
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let resp = self
            .http
            .get(url)
            .header("Client-Id", &self.client_id)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED => {
                error!("[ClipProvider] 401 from {}", url);
                Err(ProviderError::Unauthorized)
            }
            s if s.is_success() => resp
                .json::<T>()
                .await
                .map_err(|e| ProviderError::Malformed(e.to_string())),
            s => {
                let body = resp.text().await.unwrap_or_default();
                error!("[ClipProvider] unexpected status {} from {}: {}", s, url, body);
                Err(ProviderError::Unreachable(format!("status {}: {}", s, body)))
            }
        }
    }

    async fn broadcaster_id(&self, login: &str) -> Result<String, ProviderError> {
        let key = login.to_ascii_lowercase();
        if let Some(id) = self.user_ids.get(&key) {
            return Ok(id.clone());
        }

        let url = format!("{}/users?login={}", self.base_url, urlencoding::encode(&key));
        let page: HelixPage<HelixUser> = self.get_json(&url).await?;
        let user = page
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed(format!("no user named '{}'", login)))?;

        info!("[ClipProvider] {} is broadcaster {}", user.login, user.id);
        self.user_ids.insert(key, user.id.clone());
        Ok(user.id)
    }

    async fn fetch_clips(
        &self,
        broadcaster_id: &str,
        featured: bool,
        first: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HelixClip>, ProviderError> {
        let mut url = format!(
            "{}/clips?broadcaster_id={}&is_featured={}&first={}",
            self.base_url,
            urlencoding::encode(broadcaster_id),
            featured,
            first
        );
        if let Some(since) = since {
            let started_at = since.to_rfc3339_opts(SecondsFormat::Secs, true);
            url.push_str(&format!("&started_at={}", urlencoding::encode(&started_at)));
        }
        let page: HelixPage<HelixClip> = self.get_json(&url).await?;
        Ok(page.data)
    }

    fn to_clip(&self, c: HelixClip) -> Clip {
        Clip {
            mp4: self.thumbnail_to_mp4(&c.thumbnail_url),
            id: c.id,
            url: c.url,
            title: c.title,
            thumbnail: c.thumbnail_url,
            view_count: c.view_count,
            duration: c.duration,
        }
    }
}

#[async_trait]
impl ClipProvider for HelixClipProvider {
    async fn clips_for(&self, channel: &str) -> Result<Vec<Clip>, ProviderError> {
        let id = self.broadcaster_id(channel).await?;

        let mut raw = self.fetch_clips(&id, true, MAX_CLIPS, None).await?;
        if raw.is_empty() {
            debug!("[ClipProvider] {} has no featured clips, trying all", channel);
            raw = self.fetch_clips(&id, false, MAX_CLIPS, None).await?;
        }

        Ok(raw.into_iter().map(|c| self.to_clip(c)).collect())
    }

    async fn recent_clips(&self, channel: &str, since: DateTime<Utc>) -> Result<Vec<Clip>, ProviderError> {
        let id = self.broadcaster_id(channel).await?;
        let raw = self.fetch_clips(&id, false, MAX_RECENT_CLIPS, Some(since)).await?;
        debug!("[ClipProvider] {} clip(s) on {} since {}", raw.len(), channel, since);
        Ok(raw.into_iter().map(|c| self.to_clip(c)).collect())
    }
}
