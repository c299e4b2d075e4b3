use serde::Serialize;

use super::free_game::FreeGame;
use super::steam::SteamApp;

/// One entry of the reconciled view handed to the export consumer.
///
/// Catalog-backed entries carry the merged display record plus both
/// source ids of a demo/full pair; free-platform entries carry the
/// listing and, when absorbed, a pointer to the parent entry instead
/// of videos of their own. Derived per cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedGame {
    /// Stable key: the full game's id for a demo/full pair, otherwise
    /// the app id or the free listing's URL.
    pub key: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<SteamApp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_game: Option<FreeGame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absorbed_into: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<String>,
}

impl UnifiedGame {
    /// Standalone catalog entry (no demo/full counterpart in the set).
    #[must_use]
    pub fn from_app(app: SteamApp) -> Self {
        let (demo_id, full_id) = if app.is_demo {
            (Some(app.id.clone()), None)
        } else if app.has_demo {
            (app.demo_id.clone(), Some(app.id.clone()))
        } else {
            (None, Some(app.id.clone()))
        };
        Self {
            key: app.id.clone(),
            name: app.name.clone(),
            app: Some(app),
            demo_id,
            full_id,
            free_game: None,
            absorbed_into: None,
            videos: Vec::new(),
        }
    }

    /// Merged demo/full pair, keyed by the full game's id.
    #[must_use]
    pub fn from_pair(display: SteamApp, full_id: String, demo_id: String) -> Self {
        Self {
            key: full_id.clone(),
            name: display.name.clone(),
            app: Some(display),
            demo_id: Some(demo_id),
            full_id: Some(full_id),
            free_game: None,
            absorbed_into: None,
            videos: Vec::new(),
        }
    }

    /// Free-platform entry; `absorbed_into` points at the parent
    /// catalog key when the listing was absorbed.
    #[must_use]
    pub fn from_free(game: FreeGame, absorbed_into: Option<String>) -> Self {
        Self {
            key: game.url.clone(),
            name: game.name.clone(),
            app: None,
            demo_id: None,
            full_id: None,
            free_game: Some(game),
            absorbed_into,
            videos: Vec::new(),
        }
    }

    /// Whether a video referencing `id` on the catalog platform
    /// belongs to this entry.
    #[must_use]
    pub fn matches_catalog_id(&self, id: &str) -> bool {
        self.key == id
            || self.demo_id.as_deref() == Some(id)
            || self.full_id.as_deref() == Some(id)
    }
}
