use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed document {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// One persisted JSON collection: a keyed entry map plus the document
/// level timestamp of its last successful write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<T> {
    pub last_updated: DateTime<Utc>,
    #[serde(default = "BTreeMap::new")]
    pub entries: BTreeMap<String, T>,
}

impl<T> Document<T> {
    #[must_use]
    pub fn new(entries: BTreeMap<String, T>, last_updated: DateTime<Utc>) -> Self {
        Self {
            last_updated,
            entries,
        }
    }
}

/// Load a document, treating a missing file as an empty collection.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<Document<T>>, StoreError> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let document = serde_json::from_slice(&content).map_err(|source| StoreError::Malformed {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(document))
}

/// Atomic-replace write: serialize next to the target under a unique
/// temp name, then rename over it so readers never observe a
/// half-written file.
pub fn write_atomic<T: Serialize>(path: &Path, document: &Document<T>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let content = serde_json::to_vec_pretty(document).map_err(|source| StoreError::Malformed {
        path: path.display().to_string(),
        source,
    })?;

    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    fs::write(&tmp, content).map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("demoarr-doc-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_is_empty_collection() {
        let dir = temp_dir();
        let loaded: Option<Document<String>> = load(&dir.join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn roundtrip_and_no_leftover_temp_files() {
        let dir = temp_dir();
        let path = dir.join("things.json");

        let entries = BTreeMap::from([("a".to_string(), 1u32), ("b".to_string(), 2u32)]);
        let document = Document::new(entries.clone(), Utc::now());
        write_atomic(&path, &document).unwrap();

        let loaded: Document<u32> = load(&path).unwrap().unwrap();
        assert_eq!(loaded.entries, entries);

        let names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["things.json".to_string()]);
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = temp_dir();
        let path = dir.join("things.json");

        write_atomic(&path, &Document::new(BTreeMap::from([("a".to_string(), 1u32)]), Utc::now()))
            .unwrap();
        write_atomic(&path, &Document::new(BTreeMap::from([("b".to_string(), 2u32)]), Utc::now()))
            .unwrap();

        let loaded: Document<u32> = load(&path).unwrap().unwrap();
        assert_eq!(loaded.entries.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn malformed_document_is_reported() {
        let dir = temp_dir();
        let path = dir.join("broken.json");
        fs::write(&path, b"{not json").unwrap();

        let result: Result<Option<Document<u32>>, _> = load(&path);
        assert!(matches!(result, Err(StoreError::Malformed { .. })));
    }
}
