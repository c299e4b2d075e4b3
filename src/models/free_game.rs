use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::is_false;
use super::steam::ReviewStats;
use crate::domain::Platform;

const STEAM_APP_URL_PREFIX: &str = "https://store.steampowered.com/app/";

/// A listing on one of the secondary free-game platforms, keyed by its
/// canonical URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeGame {
    pub url: String,
    pub platform: Platform,
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "ReviewStats::is_empty")]
    pub reviews: ReviewStats,

    /// Back-link to the catalog, set symmetrically with the catalog
    /// side by the matcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_url: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_stub: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stub_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_to: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub removal_pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_detected: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl FreeGame {
    #[must_use]
    pub fn new(url: impl Into<String>, platform: Platform, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            platform,
            name: name.into(),
            tags: Vec::new(),
            reviews: ReviewStats::default(),
            steam_url: None,
            is_stub: false,
            stub_reason: None,
            resolved_to: None,
            removal_pending: false,
            removal_detected: None,
            last_updated: None,
        }
    }

    /// Catalog app id the back-link points at, if it parses.
    #[must_use]
    pub fn steam_app_id(&self) -> Option<String> {
        self.steam_url.as_deref().and_then(parse_steam_app_id)
    }

    /// Replace scraped fields from a fresh fetch, keeping the
    /// matcher-owned back-link.
    #[must_use]
    pub fn refreshed_from(&self, mut fetched: Self, now: DateTime<Utc>) -> Self {
        fetched.url = self.url.clone();
        fetched.platform = self.platform;
        fetched.steam_url = self.steam_url.clone();
        fetched.is_stub = false;
        fetched.stub_reason = None;
        fetched.resolved_to = None;
        fetched.removal_pending = false;
        fetched.removal_detected = None;
        fetched.last_updated = Some(now);
        fetched
    }

    #[must_use]
    pub fn into_stub(
        self,
        reason: impl Into<String>,
        resolved_to: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            is_stub: true,
            stub_reason: Some(reason.into()),
            resolved_to,
            removal_pending: false,
            removal_detected: None,
            last_updated: Some(now),
            ..self
        }
    }

    #[must_use]
    pub fn with_removal_pending(self, now: DateTime<Utc>) -> Self {
        Self {
            removal_pending: true,
            removal_detected: Some(now),
            ..self
        }
    }

    #[must_use]
    pub fn with_steam_url(self, url: impl Into<String>) -> Self {
        Self {
            steam_url: Some(url.into()),
            ..self
        }
    }

    #[must_use]
    pub fn without_steam_url(self) -> Self {
        Self {
            steam_url: None,
            ..self
        }
    }
}

/// Extract the app id from a Steam store URL.
///
/// Accepts `https://store.steampowered.com/app/<id>` with an optional
/// trailing slug; anything else is malformed.
#[must_use]
pub fn parse_steam_app_id(url: &str) -> Option<String> {
    let rest = url.strip_prefix(STEAM_APP_URL_PREFIX)?;
    let id: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if id.is_empty() {
        return None;
    }
    match rest.as_bytes().get(id.len()) {
        None | Some(b'/') | Some(b'?') => Some(id),
        Some(_) => None,
    }
}

/// Canonical Steam store URL for an app id.
#[must_use]
pub fn steam_app_url(id: &str) -> String {
    format!("{STEAM_APP_URL_PREFIX}{id}")
}
