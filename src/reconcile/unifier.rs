use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::domain::Platform;
use crate::domain::events::{EventSink, ReconcileEvent};
use crate::models::free_game::FreeGame;
use crate::models::steam::{ReviewStats, SteamApp, summary_tier};
use crate::models::unified::UnifiedGame;
use crate::models::video::Video;

/// Merges demo/full pairs, resolves stub redirects, absorbs linked
/// free listings and aggregates video references into the unified
/// view. Pure over its inputs: the same stores and videos always
/// produce the same (byte-equal) output.
pub struct GameUnifier {
    min_review_sample: u64,
    events: Arc<dyn EventSink>,
}

impl GameUnifier {
    #[must_use]
    pub fn new(min_review_sample: u64, events: Arc<dyn EventSink>) -> Self {
        Self {
            min_review_sample,
            events,
        }
    }

    #[must_use]
    pub fn unify(
        &self,
        apps: &HashMap<String, SteamApp>,
        free: &HashMap<String, FreeGame>,
        videos: &[&Video],
    ) -> BTreeMap<String, UnifiedGame> {
        let apps = self.resolve_app_stubs(apps);
        let free = self.resolve_free_stubs(free);

        let mut unified = self.merge_pairs(&apps);
        self.absorb_free_listings(&mut unified, &free);
        self.aggregate_videos(&mut unified, videos);
        unified
    }

    /// Two passes: collect every id that is the target of a stub's
    /// redirect, then replace each stub with its target's data and
    /// drop targets that are only surfaced through a stub's id.
    fn resolve_app_stubs(&self, apps: &HashMap<String, SteamApp>) -> HashMap<String, SteamApp> {
        let targets: HashSet<&String> = apps
            .values()
            .filter(|a| a.is_stub)
            .filter_map(|a| a.resolved_to.as_ref())
            .filter(|t| apps.contains_key(*t))
            .collect();

        let mut working = HashMap::with_capacity(apps.len());
        for (id, app) in apps {
            if app.is_stub
                && let Some(target) = &app.resolved_to
                && let Some(resolved) = apps.get(target)
            {
                self.events.publish(&ReconcileEvent::StubResolved {
                    from: id.clone(),
                    to: target.clone(),
                });
                // The resolved data is surfaced under the stub's id.
                let mut surfaced = resolved.clone();
                surfaced.id = id.clone();
                working.insert(id.clone(), surfaced);
                continue;
            }
            if targets.contains(id) {
                // Addressable only via the stubs that point here.
                continue;
            }
            working.insert(id.clone(), app.clone());
        }
        working
    }

    fn resolve_free_stubs(&self, free: &HashMap<String, FreeGame>) -> HashMap<String, FreeGame> {
        let targets: HashSet<&String> = free
            .values()
            .filter(|g| g.is_stub)
            .filter_map(|g| g.resolved_to.as_ref())
            .filter(|t| free.contains_key(*t))
            .collect();

        let mut working = HashMap::with_capacity(free.len());
        for (url, game) in free {
            if game.is_stub
                && let Some(target) = &game.resolved_to
                && let Some(resolved) = free.get(target)
            {
                self.events.publish(&ReconcileEvent::StubResolved {
                    from: url.clone(),
                    to: target.clone(),
                });
                let mut surfaced = resolved.clone();
                surfaced.url = url.clone();
                working.insert(url.clone(), surfaced);
                continue;
            }
            if targets.contains(url) {
                continue;
            }
            working.insert(url.clone(), game.clone());
        }
        working
    }

    fn merge_pairs(&self, apps: &HashMap<String, SteamApp>) -> BTreeMap<String, UnifiedGame> {
        let by_data_id: HashMap<&str, &SteamApp> =
            apps.values().map(|a| (a.id.as_str(), a)).collect();

        let mut unified = BTreeMap::new();
        let mut consumed: HashSet<String> = HashSet::new();

        let mut ordered: Vec<&SteamApp> = apps.values().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        // Full-game side drives the pairing; each pair is merged once.
        for app in &ordered {
            if !app.has_demo {
                continue;
            }
            let Some(demo_id) = &app.demo_id else {
                continue;
            };
            if consumed.contains(app.id.as_str()) {
                continue;
            }
            match by_data_id.get(demo_id.as_str()) {
                Some(demo) if demo.id != app.id => {
                    let display = merge_pair_fields(app, demo);
                    unified.insert(
                        app.id.clone(),
                        UnifiedGame::from_pair(display, app.id.clone(), demo.id.clone()),
                    );
                    consumed.insert(app.id.clone());
                    consumed.insert(demo.id.clone());
                }
                _ => {
                    // Counterpart missing from the store: standalone
                    // fallback, never fail closed.
                    self.events.publish(&ReconcileEvent::UnifiedFallback {
                        app_id: app.id.clone(),
                    });
                    unified.insert(app.id.clone(), UnifiedGame::from_app((*app).clone()));
                    consumed.insert(app.id.clone());
                }
            }
        }

        for app in &ordered {
            if consumed.contains(app.id.as_str()) {
                continue;
            }
            if app.is_demo
                && let Some(full_id) = &app.full_game_id
                && full_id != &app.id
                && !by_data_id.contains_key(full_id.as_str())
            {
                self.events.publish(&ReconcileEvent::UnifiedFallback {
                    app_id: app.id.clone(),
                });
            }
            unified.insert(app.id.clone(), UnifiedGame::from_app((*app).clone()));
            consumed.insert(app.id.clone());
        }

        unified
    }

    fn absorb_free_listings(
        &self,
        unified: &mut BTreeMap<String, UnifiedGame>,
        free: &HashMap<String, FreeGame>,
    ) {
        // Catalog id (own, demo or full) -> unified key, built before
        // free entries start landing in the map.
        let mut catalog_lookup: HashMap<String, String> = HashMap::new();
        for (key, entry) in unified.iter() {
            if entry.app.is_none() {
                continue;
            }
            catalog_lookup
                .entry(key.clone())
                .or_insert_with(|| key.clone());
            if let Some(demo_id) = &entry.demo_id {
                catalog_lookup
                    .entry(demo_id.clone())
                    .or_insert_with(|| key.clone());
            }
            if let Some(full_id) = &entry.full_id {
                catalog_lookup
                    .entry(full_id.clone())
                    .or_insert_with(|| key.clone());
            }
        }

        let mut ordered: Vec<&FreeGame> = free.values().collect();
        ordered.sort_by(|a, b| a.url.cmp(&b.url));

        for game in ordered {
            // Absorbed only when the back-link is mirrored by the
            // catalog side listing this exact URL.
            let parent_key = game
                .steam_app_id()
                .and_then(|app_id| catalog_lookup.get(&app_id).cloned())
                .filter(|key| {
                    unified
                        .get(key)
                        .and_then(|entry| entry.app.as_ref())
                        .is_some_and(|app| app.free_links.get(&game.platform) == Some(&game.url))
                });

            if let Some(parent_key) = parent_key {
                self.copy_reviews_if_absent(unified, &parent_key, game);
                unified.insert(
                    game.url.clone(),
                    UnifiedGame::from_free(game.clone(), Some(parent_key)),
                );
            } else {
                unified.insert(game.url.clone(), UnifiedGame::from_free(game.clone(), None));
            }
        }
    }

    /// A catalog entry without reviews inherits the absorbed listing's
    /// percentage and count, but only from a sample big enough to be
    /// worth publishing, with a synthesized tier marked inferred.
    fn copy_reviews_if_absent(
        &self,
        unified: &mut BTreeMap<String, UnifiedGame>,
        parent_key: &str,
        game: &FreeGame,
    ) {
        let Some(entry) = unified.get_mut(parent_key) else {
            return;
        };
        let Some(app) = entry.app.as_mut() else {
            return;
        };
        if app.reviews.percent_positive.is_some() {
            return;
        }
        let (Some(percent), Some(count)) = (game.reviews.percent_positive, game.reviews.count)
        else {
            return;
        };
        if count < self.min_review_sample {
            return;
        }
        app.reviews = ReviewStats {
            percent_positive: Some(percent),
            count: Some(count),
            summary: Some(summary_tier(percent, count).to_string()),
            recent: false,
            inferred: true,
        };
    }

    fn aggregate_videos(&self, unified: &mut BTreeMap<String, UnifiedGame>, videos: &[&Video]) {
        // Catalog ids (own, demo, full) -> unified key.
        let mut catalog_index: HashMap<String, String> = HashMap::new();
        // Absorbed listing URL -> parent key; standalone URL -> own key.
        let mut free_index: HashMap<String, String> = HashMap::new();
        for (key, entry) in unified.iter() {
            if entry.app.is_some() {
                catalog_index.entry(key.clone()).or_insert_with(|| key.clone());
                if let Some(demo_id) = &entry.demo_id {
                    catalog_index
                        .entry(demo_id.clone())
                        .or_insert_with(|| key.clone());
                }
                if let Some(full_id) = &entry.full_id {
                    catalog_index
                        .entry(full_id.clone())
                        .or_insert_with(|| key.clone());
                }
            }
            if entry.free_game.is_some() {
                let target = entry.absorbed_into.clone().unwrap_or_else(|| key.clone());
                free_index.insert(key.clone(), target);
            }
        }

        let mut ordered: Vec<&Video> = videos.to_vec();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        for video in ordered {
            for game_ref in video.effective_refs() {
                let key = match game_ref.platform {
                    Platform::Steam => catalog_index.get(&game_ref.id),
                    Platform::Itch | Platform::GameJolt => free_index.get(&game_ref.id),
                };
                // Unknown references are dropped silently; the entity
                // simply is not part of the reconciled set.
                let Some(key) = key else { continue };
                if let Some(entry) = unified.get_mut(key)
                    && !entry.videos.contains(&video.id)
                {
                    entry.videos.push(video.id.clone());
                }
            }
        }
    }
}

/// Explicit field provenance for a demo/full pair.
///
/// Released full game: its own fields are the display record. An
/// unreleased full game borrows the demo's playable surface (reviews,
/// image, tags, prices) while release state and date stay the full
/// game's, so release status always reflects the full game. Links from
/// the demo are attached only where the full game has none.
fn merge_pair_fields(full: &SteamApp, demo: &SteamApp) -> SteamApp {
    let mut display = full.clone();

    if !full.is_released() {
        display.reviews = demo.reviews.clone();
        display.image = demo.image.clone();
        display.tags = demo.tags.clone();
        display.prices = demo.prices.clone();
    }

    for (platform, url) in &demo.free_links {
        display
            .free_links
            .entry(*platform)
            .or_insert_with(|| url.clone());
    }

    display
}
