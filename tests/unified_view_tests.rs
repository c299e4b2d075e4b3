//! Tests for the unified view produced from a committed store: pair
//! merging, absorption, review inference and video aggregation over
//! the real persistence layer.

use chrono::Utc;
use std::sync::Arc;

use demoarr::domain::Platform;
use demoarr::domain::events::NullSink;
use demoarr::models::free_game::{FreeGame, steam_app_url};
use demoarr::models::steam::{ReleaseDate, ReleaseState, ReviewStats, SteamApp};
use demoarr::models::video::{GameRef, Video};
use demoarr::reconcile::unifier::GameUnifier;
use demoarr::reconcile::validator::ReferenceValidator;
use demoarr::store::Store;

fn temp_store() -> Store {
    let dir = std::env::temp_dir().join(format!("demoarr-unified-test-{}", uuid::Uuid::new_v4()));
    Store::open(dir, ReferenceValidator, Arc::new(NullSink)).unwrap()
}

fn unifier() -> GameUnifier {
    GameUnifier::new(10, Arc::new(NullSink))
}

/// A released full game with demo, symmetric itch link and review-less
/// catalog data, plus a video referencing the demo id.
fn seed(store: &mut Store) {
    let mut full = SteamApp::new("100", "Hollow Depths")
        .with_free_link(Platform::Itch, "https://dev.itch.io/hollow");
    full.has_demo = true;
    full.demo_id = Some("200".to_string());
    full.release_state = ReleaseState::Released;
    full.release_date = Some(ReleaseDate::exact(
        chrono::NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
    ));
    full.last_updated = Some(Utc::now());
    store.upsert_app(full);

    let mut demo = SteamApp::new("200", "Hollow Depths Demo");
    demo.is_demo = true;
    demo.full_game_id = Some("100".to_string());
    demo.last_updated = Some(Utc::now());
    store.upsert_app(demo);

    let mut listing = FreeGame::new("https://dev.itch.io/hollow", Platform::Itch, "Hollow Depths")
        .with_steam_url(steam_app_url("100"));
    listing.reviews = ReviewStats {
        percent_positive: Some(96),
        count: Some(850),
        ..ReviewStats::default()
    };
    listing.last_updated = Some(Utc::now());
    store.upsert_free_game(listing);

    store.upsert_video(
        "channel-a",
        Video::new("v1", "demo showcase", Utc::now())
            .with_refs(vec![GameRef::new(Platform::Steam, "200")]),
    );

    store.commit().unwrap();
}

#[test]
fn unified_view_over_committed_store() {
    let mut store = temp_store();
    seed(&mut store);

    let unified = unifier().unify(store.apps(), store.free_games(), &store.all_videos());

    // Pair keyed by the full game's id; demo folded in.
    let entry = &unified["100"];
    assert_eq!(entry.name, "Hollow Depths");
    assert_eq!(entry.demo_id.as_deref(), Some("200"));
    assert!(!unified.contains_key("200"));

    // The absorbed listing carries no videos and points at the parent.
    let absorbed = &unified["https://dev.itch.io/hollow"];
    assert_eq!(absorbed.absorbed_into.as_deref(), Some("100"));
    assert!(absorbed.videos.is_empty());

    // Review inference: a 850-rating sample clears the threshold and
    // synthesizes the top tier, marked inferred.
    let app = entry.app.as_ref().unwrap();
    assert_eq!(app.reviews.percent_positive, Some(96));
    assert_eq!(
        app.reviews.summary.as_deref(),
        Some("Overwhelmingly Positive")
    );
    assert!(app.reviews.inferred);

    // The demo-id video reference lands on the pair entry.
    assert_eq!(entry.videos, vec!["v1".to_string()]);
}

#[test]
fn unified_view_is_stable_across_save_and_reload() {
    let mut store = temp_store();
    seed(&mut store);

    let before = unifier().unify(store.apps(), store.free_games(), &store.all_videos());

    // Round-trip through disk must not change the view byte-for-byte:
    // absent fields deserialize to their documented defaults.
    store.discard().unwrap();
    let after = unifier().unify(store.apps(), store.free_games(), &store.all_videos());

    assert_eq!(
        serde_json::to_vec(&before).unwrap(),
        serde_json::to_vec(&after).unwrap()
    );
}

#[test]
fn stub_redirect_routes_video_references() {
    let mut store = temp_store();

    store.upsert_app(
        SteamApp::new("1", "Old Page").into_stub("redirected", Some("2".to_string()), Utc::now()),
    );
    let mut target = SteamApp::new("2", "Renamed Game");
    target.last_updated = Some(Utc::now());
    store.upsert_app(target);
    store.upsert_video(
        "channel-a",
        Video::new("v1", "old link", Utc::now())
            .with_refs(vec![GameRef::new(Platform::Steam, "1")]),
    );
    store.commit().unwrap();

    let unified = unifier().unify(store.apps(), store.free_games(), &store.all_videos());

    let entry = &unified["1"];
    assert_eq!(entry.app.as_ref().unwrap().name, "Renamed Game");
    assert_eq!(entry.videos, vec!["v1".to_string()]);
    assert!(!unified.contains_key("2"));
}

#[test]
fn legacy_single_reference_videos_participate() {
    let mut store = temp_store();
    let mut app = SteamApp::new("100", "Hollow Depths");
    app.last_updated = Some(Utc::now());
    store.upsert_app(app);

    let mut legacy = Video::new("v-legacy", "old format", Utc::now());
    legacy.game_id = Some("100".to_string());
    store.upsert_video("channel-a", legacy);
    store.commit().unwrap();

    let unified = unifier().unify(store.apps(), store.free_games(), &store.all_videos());
    assert_eq!(unified["100"].videos, vec!["v-legacy".to_string()]);
}
