use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::audit::AuditEntry;

/// Storage key prefix shared by every collection file.
const STORE_PREFIX: &str = "oneorder";

/// Audit history keeps at most this many entries, newest first.
const HISTORY_CAP: usize = 100;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read store key {key}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Write failures (quota, permissions, disk full) leave the previous
    /// on-disk state in place; in-memory state is unaffected.
    #[error("failed to write store key {key}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store key {key} holds corrupt data")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk envelope for one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEnvelope<E> {
    pub items: Vec<E>,
    /// Set by an explicit user clear; blocks background refresh from
    /// resurrecting old entries until the next legitimate add.
    #[serde(rename = "userCleared", default)]
    pub user_cleared: bool,
    #[serde(rename = "lastClearTime", default)]
    pub last_clear_time: Option<DateTime<Utc>>,
    #[serde(rename = "savedAt", default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl<E> StateEnvelope<E> {
    pub fn new(items: Vec<E>) -> Self {
        Self {
            items,
            user_cleared: false,
            last_clear_time: None,
            saved_at: Some(Utc::now()),
        }
    }

    /// Envelope written by `clear_all`: empty, with the sentinel set.
    pub fn cleared(at: DateTime<Utc>) -> Self {
        Self {
            items: Vec::new(),
            user_cleared: true,
            last_clear_time: Some(at),
            saved_at: Some(at),
        }
    }
}

/// Durable key-value store backed by JSON files in one directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Write {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, kind: &str, suffix: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{}.json", STORE_PREFIX, kind, suffix))
    }

    /// Path of the change-signal file other contexts watch for this
    /// collection; used by the store-signal transport.
    pub fn signal_path(&self, kind: &str) -> PathBuf {
        self.key_path(kind, "signal")
    }

    pub fn load_state<E: DeserializeOwned>(
        &self,
        kind: &str,
    ) -> Result<Option<StateEnvelope<E>>, StoreError> {
        let path = self.key_path(kind, "state");
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| StoreError::Read {
            key: kind.to_string(),
            source,
        })?;

        let envelope = serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            key: kind.to_string(),
            source,
        })?;

        Ok(Some(envelope))
    }

    pub fn save_state<E: Serialize>(
        &self,
        kind: &str,
        envelope: &StateEnvelope<E>,
    ) -> Result<(), StoreError> {
        let path = self.key_path(kind, "state");
        let contents = serde_json::to_string_pretty(envelope).map_err(|source| {
            StoreError::Corrupt {
                key: kind.to_string(),
                source,
            }
        })?;
        std::fs::write(&path, contents).map_err(|source| StoreError::Write {
            key: kind.to_string(),
            source,
        })
    }

    /// Load the audit history, newest first. Unreadable history is treated
    /// as empty; history is diagnostics, not state.
    pub fn load_history(&self, kind: &str) -> Vec<AuditEntry> {
        let path = self.key_path(kind, "history");
        if !path.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(kind, error = %e, "audit history corrupt; starting fresh");
                    Vec::new()
                }
            },
            Err(e) => {
                debug!(kind, error = %e, "failed to read audit history");
                Vec::new()
            }
        }
    }

    /// Prepend an audit entry, trimming the history to its cap.
    pub fn push_history(&self, kind: &str, entry: AuditEntry) {
        let mut history = self.load_history(kind);
        history.insert(0, entry);
        history.truncate(HISTORY_CAP);

        let path = self.key_path(kind, "history");
        match serde_json::to_string_pretty(&history) {
            Ok(contents) => {
                if let Err(e) = std::fs::write(&path, contents) {
                    debug!(kind, error = %e, "failed to write audit history");
                }
            }
            Err(e) => debug!(kind, error = %e, "failed to serialize audit history"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;

    #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
    struct Row {
        id: String,
        value: i64,
    }

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path()).expect("store");
        (dir, store)
    }

    #[test]
    fn test_state_round_trip() {
        let (_dir, store) = store();
        let envelope = StateEnvelope::new(vec![
            Row {
                id: "R001".to_string(),
                value: 1,
            },
            Row {
                id: "R002".to_string(),
                value: 2,
            },
        ]);

        store.save_state("rows", &envelope).expect("save");
        let loaded: StateEnvelope<Row> = store
            .load_state("rows")
            .expect("load")
            .expect("state present");

        assert_eq!(loaded.items, envelope.items);
        assert!(!loaded.user_cleared);
    }

    #[test]
    fn test_missing_state_is_none() {
        let (_dir, store) = store();
        let loaded: Option<StateEnvelope<Row>> = store.load_state("rows").expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn test_cleared_envelope_sets_sentinel() {
        let (_dir, store) = store();
        store
            .save_state::<Row>("rows", &StateEnvelope::cleared(Utc::now()))
            .expect("save");

        let loaded: StateEnvelope<Row> = store
            .load_state("rows")
            .expect("load")
            .expect("state present");
        assert!(loaded.user_cleared);
        assert!(loaded.last_clear_time.is_some());
        assert!(loaded.items.is_empty());
    }

    #[test]
    fn test_history_is_newest_first_and_capped() {
        let (_dir, store) = store();
        for i in 0..105 {
            store.push_history(
                "rows",
                AuditEntry::new(AuditAction::Create, &format!("R{:03}", i), format!("row {}", i)),
            );
        }

        let history = store.load_history("rows");
        assert_eq!(history.len(), 100);
        // Newest entry first, oldest five dropped
        assert_eq!(history[0].entity_id, "R104");
        assert_eq!(history[99].entity_id, "R005");
    }

    #[test]
    fn test_corrupt_history_treated_as_empty() {
        let (_dir, store) = store();
        std::fs::write(store.key_path("rows", "history"), "not json").expect("write");
        assert!(store.load_history("rows").is_empty());
    }
}
