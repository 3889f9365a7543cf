//! Edit store interface (spec.md §6): the trait boundary the SQLite-backed
//! on-disk store implements against. The engine never writes through this
//! trait itself (spec.md §5: "the edit store ... is accessed through an
//! interface that is externally serialized; the engine never writes them"),
//! it only reads presets through it when resuming a file.
//!
//! Schema (owned by the external implementation, documented here because
//! it fixes the key shape this trait assumes):
//! `edits(hash PRIMARY KEY, config_json BLOB, updated_at INT)`,
//! `thumbnails(hash PRIMARY KEY, png BLOB)`.

use std::path::PathBuf;

use crate::config::{FileFingerprint, WorkspaceConfig};
use crate::error::{NegError, Result};

/// Environment variable naming the user data directory the on-disk store
/// lives under (spec.md §6: "one variable naming the user data directory
/// (database, cache, export, ICC). No other environment dependencies.").
pub const DATA_DIR_ENV_VAR: &str = "NEGPY_DATA_DIR";

/// Resolves the user data directory: `$NEGPY_DATA_DIR` if set, otherwise a
/// platform-appropriate default (grounded on `hoolamike`'s use of
/// `directories` rather than hand-rolled `$HOME` logic).
#[must_use]
pub fn resolve_data_dir() -> Option<PathBuf> {
    if let Ok(value) = std::env::var(DATA_DIR_ENV_VAR) {
        return Some(PathBuf::from(value));
    }
    directories::ProjectDirs::from("", "", "negpy").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Content-addressed persistence for edits and thumbnails, keyed by
/// [`FileFingerprint`] so renaming the source file never loses its edits.
pub trait EditStore {
    fn load_config(&self, fingerprint: FileFingerprint) -> Result<Option<WorkspaceConfig>>;
    fn save_config(&mut self, fingerprint: FileFingerprint, config: &WorkspaceConfig) -> Result<()>;
    fn load_thumbnail(&self, fingerprint: FileFingerprint) -> Result<Option<Vec<u8>>>;
    fn save_thumbnail(&mut self, fingerprint: FileFingerprint, png: &[u8]) -> Result<()>;
}

/// An in-memory stand-in used by tests and by callers that have not wired
/// up the real SQLite-backed store yet. `PersistenceFailed` never blocks a
/// render (spec.md §7); callers treat every method here as best-effort.
#[derive(Debug, Default)]
pub struct InMemoryEditStore {
    configs: std::collections::HashMap<FileFingerprint, WorkspaceConfig>,
    thumbnails: std::collections::HashMap<FileFingerprint, Vec<u8>>,
}

impl EditStore for InMemoryEditStore {
    fn load_config(&self, fingerprint: FileFingerprint) -> Result<Option<WorkspaceConfig>> {
        Ok(self.configs.get(&fingerprint).cloned())
    }

    fn save_config(&mut self, fingerprint: FileFingerprint, config: &WorkspaceConfig) -> Result<()> {
        self.configs.insert(fingerprint, config.clone());
        Ok(())
    }

    fn load_thumbnail(&self, fingerprint: FileFingerprint) -> Result<Option<Vec<u8>>> {
        Ok(self.thumbnails.get(&fingerprint).cloned())
    }

    fn save_thumbnail(&mut self, fingerprint: FileFingerprint, png: &[u8]) -> Result<()> {
        self.thumbnails.insert(fingerprint, png.to_vec());
        Ok(())
    }
}

/// Wraps a persistence failure as the non-fatal event spec.md §7 describes:
/// logged, surfaced, never returned as a hard render failure.
pub fn log_persistence_failure(context: &str, err: &NegError) {
    log::warn!("persistence failed ({context}): {err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_config() {
        let mut store = InMemoryEditStore::default();
        let fp = FileFingerprint::of_bytes(b"example");
        let config = WorkspaceConfig::default();
        store.save_config(fp, &config).unwrap();
        let loaded = store.load_config(fp).unwrap();
        assert!(loaded.is_some());
    }

    #[test]
    fn unknown_fingerprint_returns_none() {
        let store = InMemoryEditStore::default();
        let fp = FileFingerprint::of_bytes(b"never-saved");
        assert!(store.load_config(fp).unwrap().is_none());
    }

    #[test]
    fn env_var_overrides_platform_default() {
        // SAFETY: tests in this crate run single-threaded per module; no
        // other test reads or writes NEGPY_DATA_DIR.
        unsafe {
            std::env::set_var(DATA_DIR_ENV_VAR, "/tmp/negpy-test-data");
        }
        assert_eq!(resolve_data_dir(), Some(PathBuf::from("/tmp/negpy-test-data")));
        unsafe {
            std::env::remove_var(DATA_DIR_ENV_VAR);
        }
    }
}
