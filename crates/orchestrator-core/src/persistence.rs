//! Durable key-value store over the local filesystem (§4.1).
//!
//! Keyed by `(task_fingerprint, record_kind[, agent_id])`, serialized as
//! UTF-8 JSON, written atomically (write-temp + rename under the same
//! directory so the rename is same-filesystem), and serialized across
//! writers with an advisory POSIX file lock (thread-lock fallback for
//! platforms without one).

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;

/// The four record kinds named in §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Context,
    Stack,
    /// Per-agent render/fact history, pending tools, thinking, counters.
    Actions,
    /// Optional digest of the latest final output, for UI consumption.
    LatestOutput,
}

impl RecordKind {
    fn suffix(&self) -> &'static str {
        match self {
            RecordKind::Context => "context",
            RecordKind::Stack => "stack",
            RecordKind::Actions => "actions",
            RecordKind::LatestOutput => "latest_output",
        }
    }
}

/// A filesystem-backed store rooted at one directory (typically
/// `~/mla_v3/conversations/`, overridable via `ORCHESTRATOR_HOME`).
pub struct PersistenceStore {
    root: PathBuf,
    /// In-process fallback serialization for platforms/paths where advisory
    /// locks are unavailable (e.g. network filesystems); always held in
    /// addition to the file lock so same-process concurrent writers never
    /// race even if the underlying fs silently no-ops `flock`.
    write_lock: Mutex<()>,
}

impl PersistenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Default root honoring `ORCHESTRATOR_HOME`, falling back to
    /// `~/mla_v3/conversations/` (§4.1, §6's persisted-state layout).
    pub fn default_root() -> PathBuf {
        if let Ok(custom) = std::env::var("ORCHESTRATOR_HOME") {
            return PathBuf::from(custom);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mla_v3")
            .join("conversations")
    }

    fn path_for(&self, fingerprint: &str, kind: RecordKind, agent_id: Option<&str>) -> PathBuf {
        let name = match (kind, agent_id) {
            (RecordKind::Context, _) => format!("{}_context.json", fingerprint),
            (RecordKind::Stack, _) => format!("{}_stack.json", fingerprint),
            (RecordKind::Actions, Some(id)) => format!("{}_{}_actions.json", fingerprint, id),
            (RecordKind::LatestOutput, Some(id)) => {
                format!("{}_{}_latest_output.json", fingerprint, id)
            }
            (kind, None) => format!("{}_{}.json", fingerprint, kind.suffix()),
        };
        self.root.join(name)
    }

    /// `read(kind, key) -> record | None`. A malformed record is treated as
    /// absent and logged (§4.1 failure handling); the caller proceeds from
    /// empty state.
    pub fn read<T: DeserializeOwned>(
        &self,
        fingerprint: &str,
        kind: RecordKind,
        agent_id: Option<&str>,
    ) -> Option<T> {
        let path = self.path_for(fingerprint, kind, agent_id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return None,
        };
        match serde_json::from_str(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed persisted record, treating as absent");
                None
            }
        }
    }

    /// `write(kind, key, record)` atomically: write to a sibling temp file
    /// then rename over the destination, guarded by an advisory lock on a
    /// lockfile so concurrent writers serialize rather than interleave.
    pub fn write<T: Serialize>(
        &self,
        fingerprint: &str,
        kind: RecordKind,
        agent_id: Option<&str>,
        record: &T,
    ) -> Result<(), Error> {
        let _guard = self.write_lock.lock().unwrap();
        let path = self.path_for(fingerprint, kind, agent_id);

        fs::create_dir_all(&self.root)
            .map_err(|e| Error::persistence(self.root.display().to_string(), e.to_string()))?;

        let lock_file = self.acquire_lock(&path)?;

        let json = serde_json::to_string_pretty(record)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json.as_bytes())
            .map_err(|e| Error::persistence(tmp_path.display().to_string(), e.to_string()))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| Error::persistence(path.display().to_string(), e.to_string()))?;

        drop(lock_file);
        Ok(())
    }

    pub fn delete(&self, fingerprint: &str, kind: RecordKind, agent_id: Option<&str>) {
        let _guard = self.write_lock.lock().unwrap();
        let path = self.path_for(fingerprint, kind, agent_id);
        let _ = fs::remove_file(path);
    }

    fn acquire_lock(&self, path: &Path) -> Result<File, Error> {
        let lock_path = path.with_extension("json.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::persistence(lock_path.display().to_string(), e.to_string()))?;
        // Advisory lock; on platforms/filesystems where this is a no-op the
        // in-process Mutex above still prevents same-process races.
        let _ = lock_file.lock_exclusive();
        Ok(lock_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());
        let record = Sample { value: 42 };

        store
            .write("fp1", RecordKind::Context, None, &record)
            .unwrap();

        let read_back: Option<Sample> = store.read("fp1", RecordKind::Context, None);
        assert_eq!(read_back, Some(Sample { value: 42 }));
    }

    #[test]
    fn test_read_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());
        let read_back: Option<Sample> = store.read("no-such-task", RecordKind::Stack, None);
        assert_eq!(read_back, None);
    }

    #[test]
    fn test_malformed_record_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());
        let path = store.path_for("fp1", RecordKind::Context, None);
        fs::write(&path, b"{not valid json").unwrap();

        let read_back: Option<Sample> = store.read("fp1", RecordKind::Context, None);
        assert_eq!(read_back, None);
    }

    #[test]
    fn test_per_agent_actions_path_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());

        store
            .write("fp1", RecordKind::Actions, Some("agent-a"), &Sample { value: 1 })
            .unwrap();
        store
            .write("fp1", RecordKind::Actions, Some("agent-b"), &Sample { value: 2 })
            .unwrap();

        let a: Option<Sample> = store.read("fp1", RecordKind::Actions, Some("agent-a"));
        let b: Option<Sample> = store.read("fp1", RecordKind::Actions, Some("agent-b"));
        assert_eq!(a, Some(Sample { value: 1 }));
        assert_eq!(b, Some(Sample { value: 2 }));
    }

    #[test]
    fn test_delete_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());
        store
            .write("fp1", RecordKind::Context, None, &Sample { value: 1 })
            .unwrap();
        store.delete("fp1", RecordKind::Context, None);
        let read_back: Option<Sample> = store.read("fp1", RecordKind::Context, None);
        assert_eq!(read_back, None);
    }
}
