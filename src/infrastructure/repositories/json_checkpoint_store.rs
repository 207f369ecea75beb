// src/infrastructure/repositories/json_checkpoint_store.rs
//! Checkpoint persistence as JSON documents on the local filesystem.
//!
//! One file per source scope, written atomically (temp file plus rename) so
//! a crash leaves either the previous checkpoint or the new one. The kill
//! switch is a sibling record in the same directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::checkpoint::ImportCheckpoint;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::repositories::checkpoint_store::CheckpointStore;

const KILL_SWITCH_FILE: &str = "kill_switch.json";

#[derive(Debug, Serialize, Deserialize)]
struct KillSwitchRecord {
    engaged_until: DateTime<Utc>,
}

#[derive(Debug)]
pub struct JsonCheckpointStore {
    state_dir: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> DomainResult<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)
            .map_err(|e| DomainError::CheckpointError(format!(
                "cannot create state dir {}: {}",
                state_dir.display(),
                e
            )))?;
        Ok(Self { state_dir })
    }

    fn checkpoint_path(&self, scope_key: &str) -> PathBuf {
        let sanitized: String = scope_key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.state_dir.join(format!("checkpoint-{}.json", sanitized))
    }

    fn kill_switch_path(&self) -> PathBuf {
        self.state_dir.join(KILL_SWITCH_FILE)
    }

    /// Writes `content` to `path` through a temp file in the same directory,
    /// then renames. Rename within one directory is atomic on POSIX.
    fn write_atomic(&self, path: &Path, content: &str) -> DomainResult<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.state_dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.persist(path).map_err(|e| {
            DomainError::CheckpointError(format!("cannot persist {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn load(&self, scope_key: &str) -> DomainResult<Option<ImportCheckpoint>> {
        let path = self.checkpoint_path(scope_key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let checkpoint = serde_json::from_str(&content).map_err(|e| {
            DomainError::DeserializationError(format!(
                "corrupt checkpoint {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(checkpoint))
    }

    #[instrument(level = "trace", skip(self, checkpoint), fields(scope = %checkpoint.scope_key))]
    fn save(&self, checkpoint: &ImportCheckpoint) -> DomainResult<()> {
        let content = serde_json::to_string_pretty(checkpoint)?;
        self.write_atomic(&self.checkpoint_path(&checkpoint.scope_key), &content)
    }

    fn delete(&self, scope_key: &str) -> DomainResult<bool> {
        let path = self.checkpoint_path(scope_key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted checkpoint {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn kill_switch_until(&self) -> DomainResult<Option<DateTime<Utc>>> {
        let path = self.kill_switch_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record: KillSwitchRecord = serde_json::from_str(&content).map_err(|e| {
            DomainError::DeserializationError(format!("corrupt kill switch record: {}", e))
        })?;
        Ok(Some(record.engaged_until))
    }

    fn engage_kill_switch(&self, until: DateTime<Utc>) -> DomainResult<()> {
        let content = serde_json::to_string_pretty(&KillSwitchRecord {
            engaged_until: until,
        })?;
        self.write_atomic(&self.kill_switch_path(), &content)
    }

    fn clear_kill_switch(&self) -> DomainResult<()> {
        match fs::remove_file(self.kill_switch_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::checkpoint::ImportScope;
    use chrono::TimeZone;

    fn store() -> (JsonCheckpointStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCheckpointStore::new(dir.path()).unwrap();
        (store, dir)
    }

    fn checkpoint(scope_key: &str) -> ImportCheckpoint {
        ImportCheckpoint::new(
            "tok".to_string(),
            scope_key.to_string(),
            None,
            PathBuf::from("/tmp/unzip"),
            ImportScope::Full,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn round_trips_checkpoints_per_scope() {
        let (store, _dir) = store();
        assert_eq!(store.load("feeds/acme").unwrap(), None);

        let cp = checkpoint("feeds/acme");
        store.save(&cp).unwrap();
        assert_eq!(store.load("feeds/acme").unwrap(), Some(cp.clone()));
        // Scope separators must not leak into the file system layout.
        assert_eq!(store.load("feeds_acme").unwrap(), None);

        let mut updated = cp;
        updated.next_property_index = 7;
        store.save(&updated).unwrap();
        assert_eq!(
            store.load("feeds/acme").unwrap().unwrap().next_property_index,
            7
        );

        assert!(store.delete("feeds/acme").unwrap());
        assert!(!store.delete("feeds/acme").unwrap());
    }

    #[test]
    fn corrupt_checkpoint_is_an_error_not_a_fresh_start() {
        let (store, dir) = store();
        let cp = checkpoint("acme");
        store.save(&cp).unwrap();
        let path = dir.path().join("checkpoint-acme.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(store.load("acme").is_err());
    }

    #[test]
    fn kill_switch_round_trips() {
        let (store, _dir) = store();
        assert_eq!(store.kill_switch_until().unwrap(), None);

        let until = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
        store.engage_kill_switch(until).unwrap();
        assert_eq!(store.kill_switch_until().unwrap(), Some(until));

        store.clear_kill_switch().unwrap();
        assert_eq!(store.kill_switch_until().unwrap(), None);
        // Clearing twice is harmless.
        store.clear_kill_switch().unwrap();
    }
}
