use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::is_false;
use crate::domain::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    #[default]
    Released,
    ComingSoon,
}

/// How much of a planned release date the store page actually commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateGranularity {
    Day,
    Month,
    Quarter,
    Year,
}

/// A release date at whatever precision the platform published it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDate {
    pub granularity: DateGranularity,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<u32>,
    /// Original display string from the store page, e.g. "Q3 2026".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl ReleaseDate {
    #[must_use]
    pub fn exact(date: NaiveDate) -> Self {
        Self {
            granularity: DateGranularity::Day,
            year: date.year(),
            month: Some(date.month()),
            day: Some(date.day()),
            quarter: None,
            raw: None,
        }
    }

    #[must_use]
    pub const fn year_only(year: i32) -> Self {
        Self {
            granularity: DateGranularity::Year,
            year,
            month: None,
            day: None,
            quarter: None,
            raw: None,
        }
    }

    #[must_use]
    pub const fn quarter(year: i32, quarter: u32) -> Self {
        Self {
            granularity: DateGranularity::Quarter,
            year,
            month: None,
            day: None,
            quarter: Some(quarter),
            raw: None,
        }
    }

    #[must_use]
    pub const fn month(year: i32, month: u32) -> Self {
        Self {
            granularity: DateGranularity::Month,
            year,
            month: Some(month),
            day: None,
            quarter: None,
            raw: None,
        }
    }

    /// The earliest instant this date could mean: quarter maps to the
    /// first day of the quarter, year to Jan 1, month to the 1st.
    #[must_use]
    pub fn earliest(&self) -> Option<NaiveDate> {
        match self.granularity {
            DateGranularity::Day => {
                NaiveDate::from_ymd_opt(self.year, self.month?, self.day?)
            }
            DateGranularity::Month => NaiveDate::from_ymd_opt(self.year, self.month?, 1),
            DateGranularity::Quarter => {
                let q = self.quarter?;
                if !(1..=4).contains(&q) {
                    return None;
                }
                NaiveDate::from_ymd_opt(self.year, (q - 1) * 3 + 1, 1)
            }
            DateGranularity::Year => NaiveDate::from_ymd_opt(self.year, 1, 1),
        }
    }

    /// Only day-granularity dates can justify "overdue release"
    /// refreshes and daily polling.
    #[must_use]
    pub const fn is_exact_day(&self) -> bool {
        matches!(self.granularity, DateGranularity::Day)
    }
}

/// Review aggregate as published by a store page, or synthesized from
/// an absorbed listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReviewStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_positive: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// True when the stats are the "recent reviews" variant rather
    /// than the all-time aggregate.
    #[serde(default, skip_serializing_if = "is_false")]
    pub recent: bool,
    /// True when the summary tier was synthesized rather than scraped.
    #[serde(default, skip_serializing_if = "is_false")]
    pub inferred: bool,
}

impl ReviewStats {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.percent_positive.is_none() && self.count.is_none() && self.summary.is_none()
    }
}

/// Steam-style summary ladder. Used verbatim for catalog pages and to
/// synthesize a tier for absorbed free listings.
#[must_use]
pub fn summary_tier(percent_positive: u32, count: u64) -> &'static str {
    match (percent_positive, count) {
        (95.., 500..) => "Overwhelmingly Positive",
        (85.., 50..) => "Very Positive",
        (80.., _) => "Positive",
        (70..=79, _) => "Mostly Positive",
        (40..=69, _) => "Mixed",
        (20..=39, _) => "Mostly Negative",
        (_, 500..) => "Overwhelmingly Negative",
        (_, 50..) => "Very Negative",
        _ => "Negative",
    }
}

/// A catalog (Steam) store entry.
///
/// Values are immutable: every update path goes through one of the
/// copy-with-overrides methods below so the pre-change value survives
/// for the store's discard semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteamApp {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub release_state: ReleaseState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<ReleaseDate>,

    /// Price in minor units per ISO currency code; `None` marks a
    /// region where the listing exists but carries no price.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prices: BTreeMap<String, Option<i64>>,

    #[serde(default, skip_serializing_if = "ReviewStats::is_empty")]
    pub reviews: ReviewStats,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub developers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publishers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    // Demo relationship XOR full-game relationship.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_demo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_game_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_demo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_id: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_stub: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stub_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_to: Option<String>,

    /// Cross-platform links owned by the matcher, one per secondary
    /// platform, pointing at the free listing's canonical URL.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub free_links: BTreeMap<Platform, String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub needs_full_refresh: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub removal_pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_detected: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl SteamApp {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            release_state: ReleaseState::Released,
            release_date: None,
            prices: BTreeMap::new(),
            reviews: ReviewStats::default(),
            tags: Vec::new(),
            genres: Vec::new(),
            developers: Vec::new(),
            publishers: Vec::new(),
            image: None,
            is_demo: false,
            full_game_id: None,
            has_demo: false,
            demo_id: None,
            is_stub: false,
            stub_reason: None,
            resolved_to: None,
            free_links: BTreeMap::new(),
            needs_full_refresh: false,
            removal_pending: false,
            removal_detected: None,
            last_updated: None,
        }
    }

    #[must_use]
    pub const fn is_released(&self) -> bool {
        matches!(self.release_state, ReleaseState::Released)
    }

    #[must_use]
    pub const fn is_coming_soon(&self) -> bool {
        matches!(self.release_state, ReleaseState::ComingSoon)
    }

    /// Whether the entity participates in a demo/full pair, in either
    /// direction.
    #[must_use]
    pub const fn has_pair(&self) -> bool {
        self.has_demo || self.is_demo
    }

    /// Replace scraped fields wholesale from a fresh fetch, keeping
    /// the matcher-owned cross-platform links and clearing stub and
    /// removal bookkeeping.
    #[must_use]
    pub fn refreshed_from(&self, mut fetched: Self, now: DateTime<Utc>) -> Self {
        fetched.id = self.id.clone();
        fetched.free_links = self.free_links.clone();
        fetched.is_stub = false;
        fetched.stub_reason = None;
        fetched.resolved_to = None;
        fetched.needs_full_refresh = false;
        fetched.removal_pending = false;
        fetched.removal_detected = None;
        fetched.last_updated = Some(now);
        fetched
    }

    /// Convert to a stub, optionally forwarding to the entity the
    /// platform redirected to.
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
            needs_full_refresh: false,
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
    pub fn with_needs_full_refresh(self) -> Self {
        Self {
            needs_full_refresh: true,
            ..self
        }
    }

    #[must_use]
    pub fn with_free_link(self, platform: Platform, url: impl Into<String>) -> Self {
        let mut free_links = self.free_links.clone();
        free_links.insert(platform, url.into());
        Self { free_links, ..self }
    }

    #[must_use]
    pub fn without_free_link(self, platform: Platform) -> Self {
        let mut free_links = self.free_links.clone();
        free_links.remove(&platform);
        Self { free_links, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_by_granularity() {
        let q3 = ReleaseDate::quarter(2026, 3);
        assert_eq!(q3.earliest(), NaiveDate::from_ymd_opt(2026, 7, 1));

        let year = ReleaseDate::year_only(2027);
        assert_eq!(year.earliest(), NaiveDate::from_ymd_opt(2027, 1, 1));

        let month = ReleaseDate::month(2026, 9);
        assert_eq!(month.earliest(), NaiveDate::from_ymd_opt(2026, 9, 1));

        let day = ReleaseDate::exact(NaiveDate::from_ymd_opt(2026, 9, 14).unwrap());
        assert_eq!(day.earliest(), NaiveDate::from_ymd_opt(2026, 9, 14));
        assert!(day.is_exact_day());
    }

    #[test]
    fn earliest_rejects_bad_quarter() {
        let bad = ReleaseDate::quarter(2026, 5);
        assert_eq!(bad.earliest(), None);
    }

    #[test]
    fn summary_tier_ladder() {
        assert_eq!(summary_tier(97, 1200), "Overwhelmingly Positive");
        assert_eq!(summary_tier(90, 80), "Very Positive");
        assert_eq!(summary_tier(90, 20), "Positive");
        assert_eq!(summary_tier(75, 20), "Mostly Positive");
        assert_eq!(summary_tier(55, 20), "Mixed");
        assert_eq!(summary_tier(30, 20), "Mostly Negative");
        assert_eq!(summary_tier(10, 600), "Overwhelmingly Negative");
        assert_eq!(summary_tier(10, 60), "Very Negative");
        assert_eq!(summary_tier(10, 5), "Negative");
    }

    #[test]
    fn refreshed_from_keeps_links_and_clears_stub_state() {
        let now = Utc::now();
        let stored = SteamApp::new("10", "Old Name")
            .with_free_link(Platform::Itch, "https://dev.itch.io/game")
            .into_stub("page removed", None, now);

        let fetched = SteamApp::new("ignored", "New Name");
        let updated = stored.refreshed_from(fetched, now);

        assert_eq!(updated.id, "10");
        assert_eq!(updated.name, "New Name");
        assert!(!updated.is_stub);
        assert_eq!(updated.stub_reason, None);
        assert_eq!(
            updated.free_links.get(&Platform::Itch).map(String::as_str),
            Some("https://dev.itch.io/game")
        );
        assert_eq!(updated.last_updated, Some(now));
    }

    #[test]
    fn compact_serialization_omits_defaults() {
        let app = SteamApp::new("10", "Game");
        let json = serde_json::to_string(&app).unwrap();
        assert!(!json.contains("is_demo"));
        assert!(!json.contains("free_links"));
        assert!(!json.contains("removal_pending"));

        let back: SteamApp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, app);
    }
}
