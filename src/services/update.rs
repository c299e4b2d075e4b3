use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::Platform;
use crate::domain::events::{EventSink, ReconcileEvent};
use crate::fetch::batch::{BatchController, BulkError, run_batched};
use crate::fetch::retry::RetryPolicy;
use crate::fetch::{CatalogFetcher, Fetched, FreeFetcher};
use crate::models::free_game::FreeGame;
use crate::models::steam::SteamApp;
use crate::reconcile::matcher::CrossPlatformMatcher;
use crate::reconcile::scheduler::{RefreshDecision, RefreshScheduler, RefreshSignals};
use crate::reconcile::validator::Finding;
use crate::store::document::StoreError;
use crate::store::{CommitError, Store};

#[derive(Debug, Error)]
pub enum UpdateError {
    /// The cycle produced state the validator refused; everything was
    /// rolled back and disk is untouched.
    #[error("cycle rejected by validation: {0} error finding(s)")]
    Validation(usize, Vec<Finding>),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bulk(#[from] BulkError),
}

/// Bounds for one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleOptions {
    /// Cap on catalog entities fetched this run.
    pub max_updates: Option<usize>,
    /// Videos published before this instant neither seed candidates
    /// nor count as recent references. They still protect their
    /// referenced entities from being dropped.
    pub cutoff: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub candidates: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub repaired: usize,
    pub stubbed: usize,
    pub dropped: usize,
    pub links_approved: usize,
    pub links_retracted: usize,
    pub warnings: usize,
}

/// Runs one fetch-and-reconcile cycle: scheduler decisions, batched
/// bulk fetching, pair repair, removal lifecycle, cross-platform
/// matching, then a validated commit. Entities are processed to
/// completion one at a time; a pair is repaired at most once per run,
/// driven by whichever side was processed first.
pub struct UpdateService {
    catalog: Arc<dyn CatalogFetcher>,
    free: Option<Arc<dyn FreeFetcher>>,
    batch: BatchController,
    retry: RetryPolicy,
    matcher: CrossPlatformMatcher,
    events: Arc<dyn EventSink>,
}

impl UpdateService {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogFetcher>,
        free: Option<Arc<dyn FreeFetcher>>,
        batch: BatchController,
        retry: RetryPolicy,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            catalog,
            free,
            batch,
            retry,
            matcher: CrossPlatformMatcher::new(Arc::clone(&events)),
            events,
        }
    }

    pub async fn run_cycle(
        &self,
        store: &mut Store,
        options: &CycleOptions,
    ) -> Result<CycleStats, UpdateError> {
        let now = Utc::now();
        let scheduler = RefreshScheduler::new(now);
        let mut stats = CycleStats::default();

        let signals = CycleSignals::collect(store, options.cutoff);

        // Candidate catalog ids: everything stored plus everything a
        // video references, in stable order.
        let mut candidate_ids: Vec<String> = store
            .apps()
            .keys()
            .cloned()
            .chain(signals.referenced_apps_in_window.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        candidate_ids.sort();
        stats.candidates = candidate_ids.len();
        self.events.publish(&ReconcileEvent::CycleStarted {
            candidates: stats.candidates,
        });

        let mut due: Vec<String> = Vec::new();
        for id in &candidate_ids {
            let entity_signals = RefreshSignals {
                latest_video_reference: signals.latest_reference.get(id).copied(),
                reported_free_links: signals.reported_links.get(id).cloned().unwrap_or_default(),
            };
            match scheduler.decide(store.app(id), &entity_signals) {
                RefreshDecision::Fetch(reason) => {
                    self.events.publish(&ReconcileEvent::RefreshDecided {
                        app_id: id.clone(),
                        reason: reason.to_string(),
                    });
                    due.push(id.clone());
                }
                RefreshDecision::Skip => stats.skipped += 1,
            }
        }
        if let Some(cap) = options.max_updates
            && due.len() > cap
        {
            stats.skipped += due.len() - cap;
            due.truncate(cap);
        }
        info!(due = due.len(), skipped = stats.skipped, "cycle scheduled");

        // One bulk sweep over everything due, batch-shaped under
        // overload, then per-entity application in deterministic order.
        let mut controller = self.batch.clone();
        let catalog = Arc::clone(&self.catalog);
        let batches = run_batched(&due, &mut controller, &self.retry, move |chunk| {
            let catalog = Arc::clone(&catalog);
            async move { catalog.fetch_apps(&chunk).await }
        })
        .await?;
        let mut outcomes: HashMap<String, Fetched<SteamApp>> = HashMap::new();
        for batch in batches {
            outcomes.extend(batch);
        }

        let mut repaired_pairs: HashSet<(String, String)> = HashSet::new();
        for id in &due {
            match outcomes.remove(id) {
                Some(Fetched::Found(fetched)) => {
                    self.apply_found(store, id, fetched, now, &mut repaired_pairs, &mut stats)
                        .await;
                }
                Some(Fetched::NotFound) => {
                    self.apply_not_found(store, id, &signals, now, &mut stats);
                }
                None => {
                    // The bulk endpoint silently omitted the id; treat
                    // it like a transient failure and leave the entity
                    // alone.
                    warn!(app_id = %id, "bulk response omitted id");
                }
            }
        }

        self.refresh_free_listings(store, &scheduler, &signals, now, &mut stats)
            .await;

        let plan = {
            let (apps, free) = store.entities_mut();
            self.matcher.run(apps, free)
        };
        stats.links_approved = plan.approved.len();
        stats.links_retracted = plan.retracted.len();

        match store.commit() {
            Ok(warnings) => stats.warnings = warnings.len(),
            Err(CommitError::Validation(errors, findings)) => {
                store.discard()?;
                return Err(UpdateError::Validation(errors, findings));
            }
            Err(CommitError::Store(e)) => return Err(e.into()),
        }

        self.events.publish(&ReconcileEvent::CycleFinished {
            fetched: stats.fetched,
            skipped: stats.skipped,
            stubbed: stats.stubbed,
            dropped: stats.dropped,
        });
        Ok(stats)
    }

    async fn apply_found(
        &self,
        store: &mut Store,
        id: &str,
        fetched: SteamApp,
        now: DateTime<Utc>,
        repaired_pairs: &mut HashSet<(String, String)>,
        stats: &mut CycleStats,
    ) {
        let updated = match store.app(id) {
            Some(existing) => existing.refreshed_from(fetched, now),
            None => {
                let mut fresh = fetched;
                fresh.id = id.to_string();
                fresh.last_updated = Some(now);
                fresh
            }
        };
        store.upsert_app(updated);
        stats.fetched += 1;
        self.events.publish(&ReconcileEvent::AppRefreshed {
            app_id: id.to_string(),
        });

        self.repair_pair_links(store, id, now, repaired_pairs, stats)
            .await;
    }

    /// Bring both sides of any demo/full pair touching `id` back into
    /// agreement: force-refetch inconsistent counterparts, and seed a
    /// placeholder when the counterpart cannot be fetched right now so
    /// the pair still validates and the next cycle picks it up.
    async fn repair_pair_links(
        &self,
        store: &mut Store,
        id: &str,
        now: DateTime<Utc>,
        repaired_pairs: &mut HashSet<(String, String)>,
        stats: &mut CycleStats,
    ) {
        let Some(app) = store.app(id).cloned() else {
            return;
        };

        // Forward pointers of the refreshed entity.
        let mut counterparts: Vec<(String, bool)> = Vec::new();
        if app.has_demo
            && let Some(demo_id) = &app.demo_id
            && demo_id != id
        {
            counterparts.push((demo_id.clone(), true));
        }
        if app.is_demo
            && let Some(full_id) = &app.full_game_id
            && full_id != id
        {
            counterparts.push((full_id.clone(), false));
        }

        for (counterpart_id, counterpart_is_demo) in counterparts {
            let consistent = store.app(&counterpart_id).is_some_and(|other| {
                if counterpart_is_demo {
                    other.is_demo && other.full_game_id.as_deref() == Some(id)
                } else {
                    other.has_demo && other.demo_id.as_deref() == Some(id)
                }
            });
            if consistent || !repaired_pairs.insert(pair_key(id, &counterpart_id)) {
                continue;
            }

            debug!(app_id = %id, counterpart = %counterpart_id, "repairing pair link");
            match self.retry.run(|| self.catalog.fetch_app(&counterpart_id)).await {
                Ok(Fetched::Found(fetched)) => {
                    let refreshed = match store.app(&counterpart_id) {
                        Some(existing) => existing.refreshed_from(fetched, now),
                        None => {
                            let mut fresh = fetched;
                            fresh.id = counterpart_id.clone();
                            fresh.last_updated = Some(now);
                            fresh
                        }
                    };
                    store.upsert_app(refreshed);
                    stats.repaired += 1;
                    let (full_id, demo_id) = if counterpart_is_demo {
                        (id.to_string(), counterpart_id.clone())
                    } else {
                        (counterpart_id.clone(), id.to_string())
                    };
                    self.events
                        .publish(&ReconcileEvent::PairRepaired { full_id, demo_id });
                }
                Ok(Fetched::NotFound) => {
                    // The platform no longer serves the counterpart:
                    // keep the pair addressable through a stub that
                    // still points back.
                    let stub = pair_placeholder(&counterpart_id, counterpart_is_demo, id)
                        .into_stub("not found during pair repair", None, now);
                    store.upsert_app(stub);
                    stats.stubbed += 1;
                    self.events.publish(&ReconcileEvent::AppStubbed {
                        app_id: counterpart_id.clone(),
                        reason: "not found during pair repair".to_string(),
                    });
                }
                Err(e) => {
                    // Transient: leave a consistent placeholder that
                    // schedules itself for the next cycle.
                    warn!(counterpart = %counterpart_id, error = %e, "pair repair fetch failed");
                    if store.app(&counterpart_id).is_none() {
                        store.upsert_app(pair_placeholder(
                            &counterpart_id,
                            counterpart_is_demo,
                            id,
                        ));
                    }
                }
            }
        }

        // Reverse pointers: entities that claim this one as their
        // counterpart but that this refresh no longer agrees with.
        let stale_reverse: Vec<String> = store
            .apps()
            .values()
            .filter(|other| other.id != id)
            .filter(|other| {
                let points_here = other.demo_id.as_deref() == Some(id)
                    || other.full_game_id.as_deref() == Some(id);
                if !points_here {
                    return false;
                }
                let agreed = (other.has_demo
                    && app.is_demo
                    && app.full_game_id.as_deref() == Some(other.id.as_str()))
                    || (other.is_demo
                        && app.has_demo
                        && app.demo_id.as_deref() == Some(other.id.as_str()));
                !agreed
            })
            .map(|other| other.id.clone())
            .collect();

        for stale_id in stale_reverse {
            if !repaired_pairs.insert(pair_key(id, &stale_id)) {
                continue;
            }
            debug!(app_id = %id, stale = %stale_id, "refetching stale pair counterpart");
            match self.retry.run(|| self.catalog.fetch_app(&stale_id)).await {
                Ok(Fetched::Found(fetched)) => {
                    if let Some(existing) = store.app(&stale_id) {
                        store.upsert_app(existing.refreshed_from(fetched, now));
                        stats.repaired += 1;
                    }
                }
                Ok(Fetched::NotFound) => {
                    self.drop_or_stub_app(store, &stale_id, now, stats, true);
                }
                Err(e) => {
                    warn!(stale = %stale_id, error = %e, "stale pair refetch failed");
                }
            }
        }
    }

    fn apply_not_found(
        &self,
        store: &mut Store,
        id: &str,
        signals: &CycleSignals,
        now: DateTime<Utc>,
        stats: &mut CycleStats,
    ) {
        let referenced = signals.referenced_apps.contains(id);
        match store.app(id) {
            None => {
                // Never seen before and already gone; a video still
                // references it, so it must stay addressable.
                if referenced {
                    let stub = SteamApp::new(id, "").into_stub("not found", None, now);
                    store.upsert_app(stub);
                    stats.stubbed += 1;
                    self.events.publish(&ReconcileEvent::AppStubbed {
                        app_id: id.to_string(),
                        reason: "not found".to_string(),
                    });
                }
            }
            Some(existing) if !existing.removal_pending => {
                // First sighting of the removal; confirm on a later
                // cycle before acting.
                store.upsert_app(existing.clone().with_removal_pending(now));
                self.events.publish(&ReconcileEvent::RemovalPending {
                    app_id: id.to_string(),
                });
            }
            Some(_) => {
                self.drop_or_stub_app(store, id, now, stats, referenced);
            }
        }
    }

    /// Confirmed-unavailable entity: stub it while any video or pair
    /// counterpart still references it, otherwise drop it and clean up
    /// its links.
    fn drop_or_stub_app(
        &self,
        store: &mut Store,
        id: &str,
        now: DateTime<Utc>,
        stats: &mut CycleStats,
        referenced: bool,
    ) {
        let Some(existing) = store.app(id).cloned() else {
            return;
        };
        let referenced_by_pair = store.apps().values().any(|other| {
            other.id != id
                && (other.demo_id.as_deref() == Some(id)
                    || other.full_game_id.as_deref() == Some(id))
        });

        if referenced || referenced_by_pair {
            let mut stub = existing.into_stub("page removed", None, now);
            // Pair pointers the counterpart no longer reciprocates
            // would dangle forever on a dead stub; drop them.
            if let Some(demo_id) = stub.demo_id.clone() {
                let reciprocated = store.app(&demo_id).is_some_and(|other| {
                    other.is_demo && other.full_game_id.as_deref() == Some(id)
                });
                if !reciprocated {
                    stub.has_demo = false;
                    stub.demo_id = None;
                }
            }
            if let Some(full_id) = stub.full_game_id.clone()
                && full_id != id
            {
                let reciprocated = store.app(&full_id).is_some_and(|other| {
                    other.has_demo && other.demo_id.as_deref() == Some(id)
                });
                if !reciprocated {
                    stub.is_demo = false;
                    stub.full_game_id = None;
                }
            }
            store.upsert_app(stub);
            stats.stubbed += 1;
            self.events.publish(&ReconcileEvent::AppStubbed {
                app_id: id.to_string(),
                reason: "page removed".to_string(),
            });
        } else {
            for url in existing.free_links.values() {
                if let Some(game) = store.free_game(url).cloned() {
                    store.upsert_free_game(game.without_steam_url());
                }
            }
            store.remove_app(id);
            stats.dropped += 1;
            self.events.publish(&ReconcileEvent::AppDropped {
                app_id: id.to_string(),
            });
        }
    }

    async fn refresh_free_listings(
        &self,
        store: &mut Store,
        scheduler: &RefreshScheduler,
        signals: &CycleSignals,
        now: DateTime<Utc>,
        stats: &mut CycleStats,
    ) {
        let Some(fetcher) = &self.free else {
            debug!("free-platform fetching disabled, leaving listings untouched");
            return;
        };

        let mut candidate_urls: Vec<String> = store
            .free_games()
            .keys()
            .cloned()
            .chain(signals.referenced_free_in_window.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        candidate_urls.sort();

        for url in candidate_urls {
            if !scheduler.decide_free(store.free_game(&url)).should_fetch() {
                stats.skipped += 1;
                continue;
            }

            match self.retry.run(|| fetcher.fetch_game(&url)).await {
                Ok(Fetched::Found(fetched)) => {
                    let updated = match store.free_game(&url) {
                        Some(existing) => existing.refreshed_from(fetched, now),
                        None => {
                            let mut fresh = fetched;
                            fresh.url = url.clone();
                            fresh.last_updated = Some(now);
                            // A scraped back-link is only kept if the
                            // catalog side can mirror it right now;
                            // otherwise the matcher re-establishes the
                            // link by name.
                            if let Some(app_id) = fresh.steam_app_id() {
                                match store.app(&app_id).cloned() {
                                    Some(app)
                                        if !app.free_links.contains_key(&fresh.platform) =>
                                    {
                                        store.upsert_app(
                                            app.with_free_link(fresh.platform, url.clone()),
                                        );
                                    }
                                    Some(app)
                                        if app.free_links.get(&fresh.platform)
                                            == Some(&url) => {}
                                    _ => fresh.steam_url = None,
                                }
                            } else if fresh.steam_url.is_some() {
                                fresh.steam_url = None;
                            }
                            fresh
                        }
                    };
                    store.upsert_free_game(updated);
                    stats.fetched += 1;
                    self.events
                        .publish(&ReconcileEvent::FreeGameRefreshed { url: url.clone() });
                }
                Ok(Fetched::NotFound) => {
                    self.apply_free_not_found(store, &url, signals, now, stats);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "free listing fetch failed");
                }
            }
        }
    }

    fn apply_free_not_found(
        &self,
        store: &mut Store,
        url: &str,
        signals: &CycleSignals,
        now: DateTime<Utc>,
        stats: &mut CycleStats,
    ) {
        let referenced = signals.referenced_free.contains_key(url);
        match store.free_game(url) {
            None => {
                if let Some(platform) = signals.referenced_free.get(url) {
                    let stub =
                        FreeGame::new(url, *platform, "").into_stub("not found", None, now);
                    store.upsert_free_game(stub);
                    stats.stubbed += 1;
                }
            }
            Some(existing) if !existing.removal_pending => {
                store.upsert_free_game(existing.clone().with_removal_pending(now));
            }
            Some(existing) => {
                let existing = existing.clone();
                if referenced {
                    store.upsert_free_game(existing.into_stub("page removed", None, now));
                    stats.stubbed += 1;
                } else {
                    // Symmetric cleanup of the catalog side.
                    if let Some(app_id) = existing.steam_app_id()
                        && let Some(app) = store.app(&app_id).cloned()
                    {
                        store.upsert_app(app.without_free_link(existing.platform));
                    }
                    store.remove_free_game(url);
                    stats.dropped += 1;
                }
            }
        }
    }
}

/// A pair is repaired at most once per run, whichever side drives it.
fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Minimal pair-consistent record standing in for a counterpart that
/// could not be fetched this cycle. `last_updated` stays unset so the
/// scheduler treats it as brand new next time.
fn pair_placeholder(id: &str, is_demo_side: bool, other_id: &str) -> SteamApp {
    let mut placeholder = SteamApp::new(id, "");
    if is_demo_side {
        placeholder.is_demo = true;
        placeholder.full_game_id = Some(other_id.to_string());
    } else {
        placeholder.has_demo = true;
        placeholder.demo_id = Some(other_id.to_string());
    }
    placeholder.needs_full_refresh = true;
    placeholder
}

/// Signals derived once per cycle from the video documents and the
/// free-game store.
struct CycleSignals {
    /// Newest in-window reference per catalog id.
    latest_reference: HashMap<String, DateTime<Utc>>,
    /// Catalog ids referenced by any video at all (drop protection).
    referenced_apps: HashSet<String>,
    /// Catalog ids referenced inside the cutoff window (candidates).
    referenced_apps_in_window: HashSet<String>,
    /// Free URLs referenced by any video at all, with the platform the
    /// reference named.
    referenced_free: HashMap<String, Platform>,
    /// Free URLs referenced inside the cutoff window.
    referenced_free_in_window: HashSet<String>,
    /// Catalog id -> secondary platforms claiming a back-link.
    reported_links: HashMap<String, Vec<Platform>>,
}

impl CycleSignals {
    fn collect(store: &Store, cutoff: Option<DateTime<Utc>>) -> Self {
        let mut latest_reference: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut referenced_apps = HashSet::new();
        let mut referenced_apps_in_window = HashSet::new();
        let mut referenced_free: HashMap<String, Platform> = HashMap::new();
        let mut referenced_free_in_window = HashSet::new();

        for video in store.all_videos() {
            let in_window = cutoff.is_none_or(|cutoff| video.published >= cutoff);
            for game_ref in video.effective_refs() {
                match game_ref.platform {
                    Platform::Steam => {
                        referenced_apps.insert(game_ref.id.clone());
                        if in_window {
                            referenced_apps_in_window.insert(game_ref.id.clone());
                            let entry = latest_reference
                                .entry(game_ref.id.clone())
                                .or_insert(video.published);
                            if video.published > *entry {
                                *entry = video.published;
                            }
                        }
                    }
                    Platform::Itch | Platform::GameJolt => {
                        referenced_free
                            .entry(game_ref.id.clone())
                            .or_insert(game_ref.platform);
                        if in_window {
                            referenced_free_in_window.insert(game_ref.id.clone());
                        }
                    }
                }
            }
        }

        let mut reported_links: HashMap<String, Vec<Platform>> = HashMap::new();
        for game in store.free_games().values() {
            if let Some(app_id) = game.steam_app_id() {
                reported_links.entry(app_id).or_default().push(game.platform);
            }
        }

        Self {
            latest_reference,
            referenced_apps,
            referenced_apps_in_window,
            referenced_free,
            referenced_free_in_window,
            reported_links,
        }
    }
}
