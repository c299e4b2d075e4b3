use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use crate::domain::Platform;
use crate::domain::events::{EventSink, ReconcileEvent};
use crate::models::free_game::{FreeGame, steam_app_url};
use crate::models::steam::SteamApp;

/// Trailing qualifier phrases stripped before name comparison, in
/// parenthesized and bare form: "Foo (Demo)", "Foo Demo", "Foo demo
/// (beta)" all normalize to "foo".
static PAREN_QUALIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\((?:demo|prototype|early access|alpha|beta|prologue)\)\s*$")
        .expect("qualifier regex")
});
static BARE_QUALIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+(?:demo|prototype|early access|alpha|beta|prologue)\s*$")
        .expect("qualifier regex")
});

/// Normalize a game name for cross-platform equality: lowercase, trim,
/// strip trailing qualifiers, drop punctuation, collapse whitespace.
///
/// Matching is exact on the normalized form; fuzzy similarity belongs
/// to the inference pipeline, not this reconciliation step.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut current = name.trim().to_lowercase();
    loop {
        let stripped = PAREN_QUALIFIER.replace(&current, "");
        let stripped = BARE_QUALIFIER.replace(&stripped, "");
        if stripped == current {
            break;
        }
        current = stripped.into_owned();
    }

    let mut out = String::with_capacity(current.len());
    let mut last_space = true;
    for ch in current.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// One proposed catalog ↔ free-platform link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    pub app_id: String,
    pub url: String,
    pub platform: Platform,
}

/// Everything one matcher pass decided; `apply` executes it.
#[derive(Debug, Default, Clone)]
pub struct MatchPlan {
    pub approved: Vec<LinkCandidate>,
    pub denied: Vec<LinkCandidate>,
    pub retracted: Vec<LinkCandidate>,
}

impl MatchPlan {
    /// A plan with nothing to do; re-running the matcher on unchanged
    /// input must produce this.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.approved.is_empty() && self.retracted.is_empty()
    }
}

/// Finds same-game records across the catalog and the free platforms
/// by normalized-name equality and keeps the link fields on both
/// stores symmetric.
pub struct CrossPlatformMatcher {
    events: Arc<dyn EventSink>,
}

impl CrossPlatformMatcher {
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }

    /// Compute approvals, denials and retractions without mutating
    /// anything.
    #[must_use]
    pub fn plan(
        &self,
        apps: &HashMap<String, SteamApp>,
        free: &HashMap<String, FreeGame>,
    ) -> MatchPlan {
        let mut index: HashMap<String, Vec<&SteamApp>> = HashMap::new();
        for app in apps.values().filter(|a| !a.is_stub) {
            index.entry(normalize_name(&app.name)).or_default().push(app);
        }
        for candidates in index.values_mut() {
            candidates.sort_by(|a, b| a.id.cmp(&b.id));
        }

        let mut free_games: Vec<&FreeGame> = free.values().filter(|g| !g.is_stub).collect();
        free_games.sort_by(|a, b| a.url.cmp(&b.url));

        let mut plan = MatchPlan::default();
        let mut claimed_slots: HashSet<(String, Platform)> = HashSet::new();
        let mut claimed_urls: HashSet<String> = HashSet::new();

        for game in &free_games {
            // A listing already carrying a back-link is spoken for;
            // re-approving it against another catalog id would break
            // the symmetry of the existing link.
            if game.steam_url.is_some() {
                continue;
            }
            let Some(candidates) = index.get(&normalize_name(&game.name)) else {
                continue;
            };
            for app in candidates {
                let candidate = LinkCandidate {
                    app_id: app.id.clone(),
                    url: game.url.clone(),
                    platform: game.platform,
                };

                // Existing link for this platform: nothing to add.
                if app.free_links.contains_key(&game.platform) {
                    continue;
                }
                if claimed_slots.contains(&(app.id.clone(), game.platform))
                    || claimed_urls.contains(&game.url)
                {
                    continue;
                }

                // The catalog's own demo takes precedence over a
                // demo-like platform's listing, regardless of which
                // side of the pair matched.
                if app.has_pair() && game.platform.is_demo_like() {
                    plan.denied.push(candidate);
                    continue;
                }

                claimed_slots.insert((app.id.clone(), game.platform));
                claimed_urls.insert(game.url.clone());
                plan.approved.push(candidate);
            }
        }

        // Stale links: a demo/full relationship discovered after an
        // earlier auto-link retracts that link from both sides. Only
        // demo-like-platform links are ever retracted here; approving
        // and retracting the same class of link would oscillate.
        let approved: HashSet<(&str, &str)> = plan
            .approved
            .iter()
            .map(|c| (c.app_id.as_str(), c.url.as_str()))
            .collect();
        for game in &free_games {
            let Some(app_id) = game.steam_app_id() else {
                continue;
            };
            let Some(app) = apps.get(&app_id) else {
                continue;
            };
            if app.has_pair()
                && game.platform.is_demo_like()
                && !approved.contains(&(app_id.as_str(), game.url.as_str()))
            {
                plan.retracted.push(LinkCandidate {
                    app_id,
                    url: game.url.clone(),
                    platform: game.platform,
                });
            }
        }

        plan
    }

    /// Execute a plan, writing both sides of every link in one pass.
    /// Applying the same plan twice leaves the stores unchanged.
    pub fn apply(
        &self,
        plan: &MatchPlan,
        apps: &mut HashMap<String, SteamApp>,
        free: &mut HashMap<String, FreeGame>,
    ) -> usize {
        let mut changes = 0;

        for candidate in &plan.denied {
            self.events.publish(&ReconcileEvent::LinkDenied {
                app_id: candidate.app_id.clone(),
                platform: candidate.platform,
                url: candidate.url.clone(),
                reason: "catalog demo takes precedence".to_string(),
            });
        }

        for candidate in &plan.approved {
            let (Some(app), Some(game)) =
                (apps.get(&candidate.app_id), free.get(&candidate.url))
            else {
                continue;
            };
            let already =
                app.free_links.get(&candidate.platform) == Some(&candidate.url)
                    && game.steam_app_id().as_deref() == Some(candidate.app_id.as_str());
            if already {
                continue;
            }

            let linked_app = app
                .clone()
                .with_free_link(candidate.platform, candidate.url.clone());
            let linked_game = game
                .clone()
                .with_steam_url(steam_app_url(&candidate.app_id));
            apps.insert(candidate.app_id.clone(), linked_app);
            free.insert(candidate.url.clone(), linked_game);
            changes += 1;

            self.events.publish(&ReconcileEvent::LinkApproved {
                app_id: candidate.app_id.clone(),
                platform: candidate.platform,
                url: candidate.url.clone(),
            });
        }

        for candidate in &plan.retracted {
            let mut touched = false;
            if let Some(app) = apps.get(&candidate.app_id)
                && app.free_links.get(&candidate.platform) == Some(&candidate.url)
            {
                let unlinked = app.clone().without_free_link(candidate.platform);
                apps.insert(candidate.app_id.clone(), unlinked);
                touched = true;
            }
            if let Some(game) = free.get(&candidate.url)
                && game.steam_url.is_some()
            {
                let unlinked = game.clone().without_steam_url();
                free.insert(candidate.url.clone(), unlinked);
                touched = true;
            }
            if touched {
                changes += 1;
                self.events.publish(&ReconcileEvent::LinkRetracted {
                    app_id: candidate.app_id.clone(),
                    url: candidate.url.clone(),
                });
            }
        }

        changes
    }

    /// Plan and apply in one step.
    pub fn run(
        &self,
        apps: &mut HashMap<String, SteamApp>,
        free: &mut HashMap<String, FreeGame>,
    ) -> MatchPlan {
        let plan = self.plan(apps, free);
        self.apply(&plan, apps, free);
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::NullSink;

    fn matcher() -> CrossPlatformMatcher {
        CrossPlatformMatcher::new(Arc::new(NullSink))
    }

    fn app(id: &str, name: &str) -> SteamApp {
        SteamApp::new(id, name)
    }

    fn itch(url: &str, name: &str) -> FreeGame {
        FreeGame::new(url, Platform::Itch, name)
    }

    fn jolt(url: &str, name: &str) -> FreeGame {
        FreeGame::new(url, Platform::GameJolt, name)
    }

    #[test]
    fn normalization_strips_qualifiers_and_punctuation() {
        assert_eq!(normalize_name("Hollow Depths (Demo)"), "hollow depths");
        assert_eq!(normalize_name("Hollow Depths Demo"), "hollow depths");
        assert_eq!(normalize_name("  Hollow   Depths: Prologue "), "hollow depths");
        assert_eq!(normalize_name("Hollow Depths demo (beta)"), "hollow depths");
        assert_eq!(normalize_name("HOLLOW-DEPTHS!"), "hollow depths");
        // Qualifier mid-name survives.
        assert_eq!(normalize_name("Demo Disk 98"), "demo disk 98");
    }

    #[test]
    fn approves_exact_normalized_match() {
        let mut apps = HashMap::from([("100".to_string(), app("100", "Hollow Depths"))]);
        let mut free = HashMap::from([(
            "https://a.itch.io/hollow".to_string(),
            itch("https://a.itch.io/hollow", "Hollow Depths (Demo)"),
        )]);

        let plan = matcher().run(&mut apps, &mut free);
        assert_eq!(plan.approved.len(), 1);

        assert_eq!(
            apps["100"].free_links.get(&Platform::Itch).map(String::as_str),
            Some("https://a.itch.io/hollow")
        );
        assert_eq!(
            free["https://a.itch.io/hollow"].steam_app_id().as_deref(),
            Some("100")
        );
    }

    #[test]
    fn denies_demo_like_link_when_pair_exists() {
        // Scenario: the catalog entity has its own demo; the itch
        // listing is denied no matter which side of the pair matched.
        let mut full = app("300", "Hollow Depths");
        full.has_demo = true;
        full.demo_id = Some("301".to_string());
        let mut apps = HashMap::from([("300".to_string(), full)]);
        let mut free = HashMap::from([(
            "u1".to_string(),
            itch("u1", "Hollow Depths"),
        )]);

        let before_apps = apps.clone();
        let before_free = free.clone();
        let plan = matcher().run(&mut apps, &mut free);

        assert!(plan.approved.is_empty());
        assert_eq!(plan.denied.len(), 1);
        assert_eq!(apps, before_apps);
        assert_eq!(free, before_free);
    }

    #[test]
    fn pair_does_not_block_non_demo_like_platform() {
        let mut full = app("300", "Hollow Depths");
        full.has_demo = true;
        full.demo_id = Some("301".to_string());
        let mut apps = HashMap::from([("300".to_string(), full)]);
        let mut free = HashMap::from([(
            "https://gamejolt.example/g/1".to_string(),
            jolt("https://gamejolt.example/g/1", "Hollow Depths"),
        )]);

        let plan = matcher().run(&mut apps, &mut free);
        assert_eq!(plan.approved.len(), 1);
        assert!(apps["300"].free_links.contains_key(&Platform::GameJolt));
    }

    #[test]
    fn existing_link_is_skipped_not_duplicated() {
        let linked = app("100", "Hollow Depths")
            .with_free_link(Platform::Itch, "https://a.itch.io/hollow");
        let mut apps = HashMap::from([("100".to_string(), linked)]);
        let mut free = HashMap::from([(
            "https://a.itch.io/hollow".to_string(),
            itch("https://a.itch.io/hollow", "Hollow Depths")
                .with_steam_url(steam_app_url("100")),
        )]);

        let plan = matcher().run(&mut apps, &mut free);
        assert!(plan.is_noop());
        assert!(plan.denied.is_empty());
    }

    #[test]
    fn retracts_demo_like_link_after_pair_discovered() {
        // The auto-link predates the discovery of the catalog demo.
        let mut full = app("100", "Hollow Depths")
            .with_free_link(Platform::Itch, "https://a.itch.io/hollow");
        full.has_demo = true;
        full.demo_id = Some("101".to_string());
        let mut apps = HashMap::from([("100".to_string(), full)]);
        let mut free = HashMap::from([(
            "https://a.itch.io/hollow".to_string(),
            itch("https://a.itch.io/hollow", "Hollow Depths")
                .with_steam_url(steam_app_url("100")),
        )]);

        let plan = matcher().run(&mut apps, &mut free);
        assert_eq!(plan.retracted.len(), 1);
        assert!(apps["100"].free_links.is_empty());
        assert_eq!(free["https://a.itch.io/hollow"].steam_url, None);

        // Idempotent: the next pass has nothing left to do.
        let again = matcher().run(&mut apps, &mut free);
        assert!(again.is_noop());
    }

    #[test]
    fn rerun_on_unchanged_input_is_noop() {
        let mut apps = HashMap::from([
            ("100".to_string(), app("100", "Hollow Depths")),
            ("200".to_string(), app("200", "Gravity Well")),
        ]);
        let mut free = HashMap::from([
            (
                "https://a.itch.io/hollow".to_string(),
                itch("https://a.itch.io/hollow", "Hollow Depths"),
            ),
            (
                "https://gamejolt.example/g/gw".to_string(),
                jolt("https://gamejolt.example/g/gw", "Gravity Well (demo)"),
            ),
        ]);

        let first = matcher().run(&mut apps, &mut free);
        assert_eq!(first.approved.len(), 2);

        let second = matcher().run(&mut apps, &mut free);
        assert!(second.is_noop());
    }

    #[test]
    fn one_listing_links_one_catalog_entry() {
        // Two catalog entries share a normalized name; the listing can
        // only back-link one of them, so only one approval lands.
        let mut apps = HashMap::from([
            ("100".to_string(), app("100", "Hollow Depths")),
            ("200".to_string(), app("200", "Hollow Depths")),
        ]);
        let mut free = HashMap::from([(
            "https://a.itch.io/hollow".to_string(),
            itch("https://a.itch.io/hollow", "Hollow Depths"),
        )]);

        let plan = matcher().run(&mut apps, &mut free);
        assert_eq!(plan.approved.len(), 1);
        assert_eq!(plan.approved[0].app_id, "100");
    }
}
