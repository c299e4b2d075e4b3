use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::is_false;
use crate::domain::Platform;

/// Hard cap on references carried by one video. Pathological
/// descriptions (mega-list videos, spam) would otherwise fan a single
/// video out over hundreds of entries.
pub const MAX_GAME_REFS: usize = 32;

/// One game mentioned by a video description.
///
/// For Steam the id is the app id; for the free platforms it is the
/// listing's canonical URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRef {
    pub platform: Platform,
    pub id: String,
    /// Set when the reference was inferred from the title/description
    /// text rather than an explicit store link.
    #[serde(default, skip_serializing_if = "is_false")]
    pub inferred: bool,
    /// Set when the reference came from the detection pipeline rather
    /// than the crawler.
    #[serde(default, skip_serializing_if = "is_false")]
    pub via_detection: bool,
}

impl GameRef {
    #[must_use]
    pub fn new(platform: Platform, id: impl Into<String>) -> Self {
        Self {
            platform,
            id: id.into(),
            inferred: false,
            via_detection: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub published: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub game_refs: Vec<GameRef>,

    /// Legacy single-reference format: older documents stored one
    /// Steam app id instead of a reference list. Preserved on write
    /// until the video is reprocessed with a modern reference list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

impl Video {
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, published: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            published,
            game_refs: Vec::new(),
            game_id: None,
        }
    }

    #[must_use]
    pub fn with_refs(self, game_refs: Vec<GameRef>) -> Self {
        Self { game_refs, ..self }
    }

    /// The reference list to reconcile against: synthesizes a
    /// one-element list from the legacy field when the modern list is
    /// empty, and enforces [`MAX_GAME_REFS`].
    #[must_use]
    pub fn effective_refs(&self) -> Vec<GameRef> {
        let mut refs = if self.game_refs.is_empty() {
            self.game_id
                .as_ref()
                .map(|id| vec![GameRef::new(Platform::Steam, id.clone())])
                .unwrap_or_default()
        } else {
            self.game_refs.clone()
        };
        refs.truncate(MAX_GAME_REFS);
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video() -> Video {
        Video::new("v1", "Three hidden gems", Utc::now())
    }

    #[test]
    fn legacy_game_id_synthesizes_one_ref() {
        let mut v = video();
        v.game_id = Some("440".to_string());

        let refs = v.effective_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].platform, Platform::Steam);
        assert_eq!(refs[0].id, "440");
    }

    #[test]
    fn modern_refs_win_over_legacy() {
        let mut v = video().with_refs(vec![GameRef::new(Platform::Itch, "https://a.itch.io/b")]);
        v.game_id = Some("440".to_string());

        let refs = v.effective_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].platform, Platform::Itch);
    }

    #[test]
    fn reference_cap_enforced() {
        let refs: Vec<GameRef> = (0..100)
            .map(|i| GameRef::new(Platform::Steam, i.to_string()))
            .collect();
        let v = video().with_refs(refs);
        assert_eq!(v.effective_refs().len(), MAX_GAME_REFS);
    }

    #[test]
    fn absent_legacy_field_is_omitted() {
        let v = video();
        let json = serde_json::to_string(&v).unwrap();
        assert!(!json.contains("game_id"));
    }
}
