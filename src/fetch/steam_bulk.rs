use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

use super::{CatalogFetcher, FetchError, Fetched};
use crate::models::steam::{ReleaseDate, ReleaseState, ReviewStats, SteamApp};

const DEFAULT_API_URL: &str = "https://store.steampowered.com/api";

/// Bulk catalog client over the store's JSON appdetails endpoint.
///
/// This is the one network path the engine owns: per-page scrapers are
/// external collaborators, but the bulk id sweep that feeds the
/// scheduler runs through here, batched by the caller.
#[derive(Clone)]
pub struct SteamBulkClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl SteamBulkClient {
    #[must_use]
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AppEntry {
    success: bool,
    data: Option<AppData>,
}

#[derive(Debug, Deserialize)]
struct AppData {
    name: Option<String>,
    #[serde(default)]
    release_date: Option<ReleaseDateRaw>,
    #[serde(default)]
    price_overview: Option<PriceOverview>,
    #[serde(default)]
    is_free: Option<bool>,
    #[serde(default)]
    recommendations: Option<Recommendations>,
    #[serde(default)]
    genres: Option<Vec<Described>>,
    #[serde(default)]
    categories: Option<Vec<Described>>,
    #[serde(default)]
    developers: Option<Vec<String>>,
    #[serde(default)]
    publishers: Option<Vec<String>>,
    #[serde(default)]
    header_image: Option<String>,
    #[serde(default)]
    fullgame: Option<FullGameRef>,
    #[serde(default)]
    demos: Option<Vec<DemoRef>>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDateRaw {
    #[serde(default)]
    coming_soon: bool,
    #[serde(default)]
    date: String,
}

#[derive(Debug, Deserialize)]
struct PriceOverview {
    currency: Option<String>,
    #[serde(rename = "final")]
    final_price: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Recommendations {
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Described {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FullGameRef {
    appid: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DemoRef {
    appid: Option<serde_json::Value>,
}

/// The store publishes appids inconsistently as numbers or strings.
fn appid_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Parse the store's display date into a granular release date.
///
/// Accepted shapes: "14 Sep, 2026", "Sep 14, 2026", "Sep 2026",
/// "Q3 2026", "2026". Anything else is treated as no usable date.
#[must_use]
pub fn parse_release_date(raw: &str) -> Option<ReleaseDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for format in ["%d %b, %Y", "%b %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            let mut parsed = ReleaseDate::exact(date);
            parsed.raw = Some(raw.to_string());
            return Some(parsed);
        }
    }

    if let Some(rest) = raw.strip_prefix('Q') {
        let mut parts = rest.splitn(2, ' ');
        if let (Some(q), Some(year)) = (parts.next(), parts.next())
            && let (Ok(q), Ok(year)) = (q.parse::<u32>(), year.trim().parse::<i32>())
            && (1..=4).contains(&q)
        {
            let mut parsed = ReleaseDate::quarter(year, q);
            parsed.raw = Some(raw.to_string());
            return Some(parsed);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(&format!("1 {raw}"), "%d %b %Y") {
        let mut parsed = ReleaseDate::month(date.year(), date.month());
        parsed.raw = Some(raw.to_string());
        return Some(parsed);
    }

    if let Ok(year) = raw.parse::<i32>()
        && (1970..=2100).contains(&year)
    {
        let mut parsed = ReleaseDate::year_only(year);
        parsed.raw = Some(raw.to_string());
        return Some(parsed);
    }

    None
}

fn to_app(id: &str, data: AppData) -> SteamApp {
    let mut app = SteamApp::new(id, data.name.unwrap_or_default());

    if let Some(release) = data.release_date {
        app.release_state = if release.coming_soon {
            ReleaseState::ComingSoon
        } else {
            ReleaseState::Released
        };
        app.release_date = parse_release_date(&release.date);
    }

    let mut prices = BTreeMap::new();
    if let Some(price) = data.price_overview
        && let Some(currency) = price.currency
    {
        prices.insert(currency, price.final_price);
    } else if data.is_free == Some(true) {
        prices.insert("USD".to_string(), None);
    }
    app.prices = prices;

    app.reviews = ReviewStats {
        count: data.recommendations.and_then(|r| r.total),
        ..ReviewStats::default()
    };

    app.genres = data
        .genres
        .unwrap_or_default()
        .into_iter()
        .filter_map(|g| g.description)
        .collect();
    app.tags = data
        .categories
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| c.description)
        .collect();
    app.developers = data.developers.unwrap_or_default();
    app.publishers = data.publishers.unwrap_or_default();
    app.image = data.header_image;

    if let Some(demo) = data
        .demos
        .unwrap_or_default()
        .first()
        .and_then(|d| d.appid.as_ref())
        .and_then(appid_string)
    {
        app.has_demo = true;
        app.demo_id = Some(demo);
    } else if let Some(full) = data
        .fullgame
        .and_then(|f| f.appid)
        .as_ref()
        .and_then(appid_string)
    {
        app.is_demo = true;
        app.full_game_id = Some(full);
    }

    app
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl CatalogFetcher for SteamBulkClient {
    async fn fetch_app(&self, id: &str) -> Result<Fetched<SteamApp>, FetchError> {
        let ids = [id.to_string()];
        let mut batch = self.fetch_apps(&ids).await?;
        Ok(batch.remove(id).unwrap_or(Fetched::NotFound))
    }

    async fn fetch_apps(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Fetched<SteamApp>>, FetchError> {
        let joined = ids.join(",");
        let url = format!(
            "{}/appdetails?appids={}&l=english",
            self.base_url,
            urlencoding::encode(&joined)
        );

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let mut body: HashMap<String, AppEntry> = response
                    .json()
                    .await
                    .map_err(|e| FetchError::Network(e.to_string()))?;

                debug!(requested = ids.len(), received = body.len(), "bulk appdetails");

                let mut apps = HashMap::new();
                for id in ids {
                    let fetched = match body.remove(id) {
                        Some(AppEntry {
                            success: true,
                            data: Some(data),
                        }) => Fetched::Found(to_app(id, data)),
                        _ => Fetched::NotFound,
                    };
                    apps.insert(id.clone(), fetched);
                }
                Ok(apps)
            }
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited {
                retry_after: retry_after(&response),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => Err(FetchError::Overloaded),
            status => Err(FetchError::Http {
                status: status.as_u16(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::steam::DateGranularity;

    #[test]
    fn parses_exact_dates_in_both_orders() {
        let eu = parse_release_date("14 Sep, 2026").unwrap();
        assert!(eu.is_exact_day());
        assert_eq!(eu.earliest(), NaiveDate::from_ymd_opt(2026, 9, 14));

        let us = parse_release_date("Sep 14, 2026").unwrap();
        assert_eq!(us.earliest(), eu.earliest());
    }

    #[test]
    fn parses_imprecise_dates() {
        let quarter = parse_release_date("Q3 2026").unwrap();
        assert_eq!(quarter.granularity, DateGranularity::Quarter);
        assert_eq!(quarter.earliest(), NaiveDate::from_ymd_opt(2026, 7, 1));

        let month = parse_release_date("Sep 2026").unwrap();
        assert_eq!(month.granularity, DateGranularity::Month);

        let year = parse_release_date("2026").unwrap();
        assert_eq!(year.granularity, DateGranularity::Year);
        assert_eq!(year.raw.as_deref(), Some("2026"));
    }

    #[test]
    fn rejects_unusable_dates() {
        assert!(parse_release_date("").is_none());
        assert!(parse_release_date("Coming soon").is_none());
        assert!(parse_release_date("Q7 2026").is_none());
        assert!(parse_release_date("14").is_none());
    }

    #[test]
    fn maps_appdetails_payload() {
        let payload = serde_json::json!({
            "name": "Hollow Depths",
            "release_date": { "coming_soon": true, "date": "Q1 2027" },
            "is_free": false,
            "price_overview": { "currency": "EUR", "final": 1999 },
            "recommendations": { "total": 321 },
            "genres": [{ "description": "Action" }],
            "developers": ["Tiny Studio"],
            "publishers": ["Tiny Studio"],
            "header_image": "https://cdn.example/h.jpg",
            "demos": [{ "appid": 9912 }]
        });
        let data: AppData = serde_json::from_value(payload).unwrap();
        let app = to_app("4400", data);

        assert_eq!(app.id, "4400");
        assert_eq!(app.name, "Hollow Depths");
        assert!(app.is_coming_soon());
        assert_eq!(app.prices.get("EUR"), Some(&Some(1999)));
        assert_eq!(app.reviews.count, Some(321));
        assert!(app.has_demo);
        assert_eq!(app.demo_id.as_deref(), Some("9912"));
        assert!(!app.is_demo);
    }

    #[test]
    fn maps_demo_side_payload() {
        let payload = serde_json::json!({
            "name": "Hollow Depths Demo",
            "release_date": { "coming_soon": false, "date": "1 Feb, 2026" },
            "fullgame": { "appid": "4400" }
        });
        let data: AppData = serde_json::from_value(payload).unwrap();
        let app = to_app("9912", data);

        assert!(app.is_demo);
        assert_eq!(app.full_game_id.as_deref(), Some("4400"));
        assert!(!app.has_demo);
    }
}
