//! The two-collection persisted state with deferred-commit semantics.
//!
//! Mutations accumulate in memory; `commit` runs the injected
//! validator over the full pending snapshot and only touches disk when
//! no error-severity finding exists, `discard` reloads from disk and
//! drops everything pending. Partially-linked state is therefore never
//! observable in the persisted documents.

pub mod document;

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::events::{EventSink, ReconcileEvent};
use crate::models::free_game::FreeGame;
use crate::models::steam::SteamApp;
use crate::models::video::Video;
use crate::reconcile::validator::{Finding, ReferenceValidator, Severity, Snapshot};
use document::{Document, StoreError, load, write_atomic};

const APPS_FILE: &str = "steam_apps.json";
const FREE_FILE: &str = "free_games.json";
const VIDEOS_DIR: &str = "videos";

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("validation failed with {0} error finding(s)")]
    Validation(usize, Vec<Finding>),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Store {
    data_dir: PathBuf,
    validator: ReferenceValidator,
    events: Arc<dyn EventSink>,

    apps: HashMap<String, SteamApp>,
    free: HashMap<String, FreeGame>,
    /// Video source name -> video id -> record.
    videos: BTreeMap<String, HashMap<String, Video>>,
    dirty: bool,
}

impl Store {
    /// Open the store rooted at `data_dir`, loading whatever documents
    /// exist. The validator instance is injected here and gates every
    /// commit for the store's lifetime.
    pub fn open(
        data_dir: impl Into<PathBuf>,
        validator: ReferenceValidator,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        let (apps, free, videos) = Self::load_all(&data_dir)?;
        info!(
            apps = apps.len(),
            free_games = free.len(),
            video_sources = videos.len(),
            data_dir = %data_dir.display(),
            "store opened"
        );
        Ok(Self {
            data_dir,
            validator,
            events,
            apps,
            free,
            videos,
            dirty: false,
        })
    }

    #[allow(clippy::type_complexity)]
    fn load_all(
        data_dir: &Path,
    ) -> Result<
        (
            HashMap<String, SteamApp>,
            HashMap<String, FreeGame>,
            BTreeMap<String, HashMap<String, Video>>,
        ),
        StoreError,
    > {
        let apps = load::<SteamApp>(&data_dir.join(APPS_FILE))?
            .map(|d| d.entries.into_iter().collect())
            .unwrap_or_default();
        let free = load::<FreeGame>(&data_dir.join(FREE_FILE))?
            .map(|d| d.entries.into_iter().collect())
            .unwrap_or_default();

        let mut videos = BTreeMap::new();
        let videos_dir = data_dir.join(VIDEOS_DIR);
        match std::fs::read_dir(&videos_dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry.map_err(|e| StoreError::Io {
                        path: videos_dir.display().to_string(),
                        source: e,
                    })?;
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let Some(source) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    if let Some(document) = load::<Video>(&path)? {
                        videos.insert(
                            source.to_string(),
                            document.entries.into_iter().collect(),
                        );
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::Io {
                    path: videos_dir.display().to_string(),
                    source: e,
                });
            }
        }

        Ok((apps, free, videos))
    }

    #[must_use]
    pub const fn apps(&self) -> &HashMap<String, SteamApp> {
        &self.apps
    }

    #[must_use]
    pub const fn free_games(&self) -> &HashMap<String, FreeGame> {
        &self.free
    }

    #[must_use]
    pub fn app(&self, id: &str) -> Option<&SteamApp> {
        self.apps.get(id)
    }

    #[must_use]
    pub fn free_game(&self, url: &str) -> Option<&FreeGame> {
        self.free.get(url)
    }

    /// Every video across all sources.
    #[must_use]
    pub fn all_videos(&self) -> Vec<&Video> {
        self.videos.values().flat_map(HashMap::values).collect()
    }

    #[must_use]
    pub fn videos_for_source(&self, source: &str) -> Option<&HashMap<String, Video>> {
        self.videos.get(source)
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn upsert_app(&mut self, app: SteamApp) {
        self.apps.insert(app.id.clone(), app);
        self.dirty = true;
    }

    pub fn remove_app(&mut self, id: &str) -> Option<SteamApp> {
        let removed = self.apps.remove(id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn upsert_free_game(&mut self, game: FreeGame) {
        self.free.insert(game.url.clone(), game);
        self.dirty = true;
    }

    pub fn remove_free_game(&mut self, url: &str) -> Option<FreeGame> {
        let removed = self.free.remove(url);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn upsert_video(&mut self, source: &str, video: Video) {
        self.videos
            .entry(source.to_string())
            .or_default()
            .insert(video.id.clone(), video);
        self.dirty = true;
    }

    /// Mutable access to both entity maps for the matcher's symmetric
    /// writes. Marks the store dirty unconditionally.
    pub fn entities_mut(
        &mut self,
    ) -> (
        &mut HashMap<String, SteamApp>,
        &mut HashMap<String, FreeGame>,
    ) {
        self.dirty = true;
        (&mut self.apps, &mut self.free)
    }

    /// Consistent borrowed view of the pending in-memory state for
    /// validation; no disk access involved.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            apps: &self.apps,
            free: &self.free,
            videos: self.all_videos(),
        }
    }

    /// Run the validator over the pending state.
    #[must_use]
    pub fn validate(&self) -> Vec<Finding> {
        self.validator.validate(&self.snapshot())
    }

    /// Validate the full pending snapshot and persist it only if no
    /// error-severity finding exists. On failure the disk state stays
    /// untouched and the pending changes stay in memory so the caller
    /// can inspect or discard them. Returns the warnings on success.
    pub fn commit(&mut self) -> Result<Vec<Finding>, CommitError> {
        let findings = self.validate();
        let errors = findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count();
        if errors > 0 {
            self.events
                .publish(&ReconcileEvent::ValidationFailed { errors });
            for finding in findings.iter().filter(|f| f.severity == Severity::Error) {
                warn!(%finding, "integrity error");
            }
            return Err(CommitError::Validation(errors, findings));
        }

        for finding in &findings {
            warn!(%finding, "integrity warning");
        }

        let now = Utc::now();
        write_atomic(
            &self.data_dir.join(APPS_FILE),
            &Document::new(
                self.apps.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                now,
            ),
        )?;
        write_atomic(
            &self.data_dir.join(FREE_FILE),
            &Document::new(
                self.free.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                now,
            ),
        )?;
        for (source, videos) in &self.videos {
            write_atomic(
                &self.data_dir.join(VIDEOS_DIR).join(format!("{source}.json")),
                &Document::new(
                    videos.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    now,
                ),
            )?;
        }

        self.dirty = false;
        self.events.publish(&ReconcileEvent::CommitCompleted {
            apps: self.apps.len(),
            free_games: self.free.len(),
        });
        Ok(findings)
    }

    /// Drop all pending in-memory changes and reload from disk.
    pub fn discard(&mut self) -> Result<(), StoreError> {
        let (apps, free, videos) = Self::load_all(&self.data_dir)?;
        self.apps = apps;
        self.free = free;
        self.videos = videos;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::NullSink;
    use uuid::Uuid;

    fn temp_store() -> Store {
        let dir = std::env::temp_dir().join(format!("demoarr-store-test-{}", Uuid::new_v4()));
        Store::open(dir, ReferenceValidator, Arc::new(NullSink)).unwrap()
    }

    #[test]
    fn empty_dir_opens_empty() {
        let store = temp_store();
        assert!(store.apps().is_empty());
        assert!(store.free_games().is_empty());
        assert!(store.all_videos().is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn commit_persists_and_reopens() {
        let mut store = temp_store();
        store.upsert_app(SteamApp::new("10", "Game"));
        store.upsert_video(
            "channel-a",
            Video::new("v1", "Video", Utc::now()),
        );
        assert!(store.is_dirty());
        store.commit().unwrap();
        assert!(!store.is_dirty());

        let reopened = Store::open(
            store.data_dir.clone(),
            ReferenceValidator,
            Arc::new(NullSink),
        )
        .unwrap();
        assert_eq!(reopened.app("10").unwrap().name, "Game");
        assert_eq!(reopened.all_videos().len(), 1);
    }

    #[test]
    fn failing_validation_blocks_commit_and_leaves_disk_untouched() {
        let mut store = temp_store();
        store.upsert_app(SteamApp::new("10", "Game"));
        store.commit().unwrap();

        // A dangling pair pointer is an error-severity finding.
        let mut broken = SteamApp::new("10", "Game");
        broken.has_demo = true;
        broken.demo_id = Some("404".to_string());
        store.upsert_app(broken);

        let err = store.commit().unwrap_err();
        match err {
            CommitError::Validation(errors, findings) => {
                assert!(errors >= 1);
                assert!(!findings.is_empty());
            }
            CommitError::Store(e) => panic!("unexpected store error: {e}"),
        }

        // Disk still holds the last good state.
        let reopened = Store::open(
            store.data_dir.clone(),
            ReferenceValidator,
            Arc::new(NullSink),
        )
        .unwrap();
        assert!(!reopened.app("10").unwrap().has_demo);
    }

    #[test]
    fn discard_reloads_last_committed_state() {
        let mut store = temp_store();
        store.upsert_app(SteamApp::new("10", "Game"));
        store.commit().unwrap();

        store.upsert_app(SteamApp::new("20", "Pending"));
        store.remove_app("10");
        assert!(store.is_dirty());

        store.discard().unwrap();
        assert!(!store.is_dirty());
        assert!(store.app("10").is_some());
        assert!(store.app("20").is_none());
    }

    #[test]
    fn warnings_do_not_block_commit() {
        let mut store = temp_store();
        let mut stub = SteamApp::new("10", "Odd");
        stub.is_stub = true; // no reason recorded -> warning
        store.upsert_app(stub);

        let warnings = store.commit().unwrap();
        assert!(!warnings.is_empty());
    }
}
