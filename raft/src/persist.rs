// Persistence backends for the two durable blobs: raft state
// (term/vote/log/commit/applied) and the service-layer snapshot. Treated as
// two independent atomic writes; a crash mid-write must leave the prior
// durable blob intact, via write-to-temp, rename, then fsync the parent.

use crate::error::{RaftError, Result};
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub trait Persister: Send + Sync {
    fn save_raft_state(&self, state: Vec<u8>) -> Result<()>;
    fn read_raft_state(&self) -> Result<Option<Vec<u8>>>;
    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) -> Result<()>;
    fn read_snapshot(&self) -> Result<Option<Vec<u8>>>;
    fn raft_state_size(&self) -> usize;
}

/// In-memory persister, used by unit tests and by `labrpc`-backed
/// integration tests that don't need real crash recovery.
#[derive(Default)]
pub struct MemoryPersister {
    raft_state: Mutex<Option<Vec<u8>>>,
    snapshot: Mutex<Option<Vec<u8>>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persister for MemoryPersister {
    fn save_raft_state(&self, state: Vec<u8>) -> Result<()> {
        *self.raft_state.lock() = Some(state);
        Ok(())
    }

    fn read_raft_state(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.raft_state.lock().clone())
    }

    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) -> Result<()> {
        *self.raft_state.lock() = Some(state);
        *self.snapshot.lock() = Some(snapshot);
        Ok(())
    }

    fn read_snapshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot.lock().clone())
    }

    fn raft_state_size(&self) -> usize {
        self.raft_state.lock().as_ref().map(|s| s.len()).unwrap_or(0)
    }
}

/// File-backed persister: one file per blob under `dir`, each written via
/// temp-file-plus-rename so a crash mid-write never corrupts the previous
/// durable copy.
pub struct FilePersister {
    dir: PathBuf,
    cached_len: Mutex<usize>,
}

impl FilePersister {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let cached_len = fs::metadata(dir.join("raft_state"))
            .map(|m| m.len() as usize)
            .unwrap_or(0);
        Ok(Self {
            dir,
            cached_len: Mutex::new(cached_len),
        })
    }

    fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(data)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        if let Some(parent) = path.parent() {
            if let Ok(dir_handle) = fs::File::open(parent) {
                let _ = dir_handle.sync_all();
            }
        }
        Ok(())
    }

    fn read_opt(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RaftError::Io(e)),
        }
    }

    fn raft_state_path(&self) -> PathBuf {
        self.dir.join("raft_state")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("snapshot")
    }
}

impl Persister for FilePersister {
    fn save_raft_state(&self, state: Vec<u8>) -> Result<()> {
        Self::write_atomic(&self.raft_state_path(), &state)?;
        *self.cached_len.lock() = state.len();
        Ok(())
    }

    fn read_raft_state(&self) -> Result<Option<Vec<u8>>> {
        Self::read_opt(&self.raft_state_path())
    }

    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) -> Result<()> {
        // Snapshot first: if we crash between the two writes, recovery sees
        // an old raft state whose log still covers what the snapshot would
        // have discarded, which is safe to replay again.
        Self::write_atomic(&self.snapshot_path(), &snapshot)?;
        Self::write_atomic(&self.raft_state_path(), &state)?;
        *self.cached_len.lock() = state.len();
        Ok(())
    }

    fn read_snapshot(&self) -> Result<Option<Vec<u8>>> {
        Self::read_opt(&self.snapshot_path())
    }

    fn raft_state_size(&self) -> usize {
        *self.cached_len.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_persister_roundtrip() {
        let p = MemoryPersister::new();
        assert!(p.read_raft_state().unwrap().is_none());
        p.save_raft_state(vec![1, 2, 3]).unwrap();
        assert_eq!(p.read_raft_state().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(p.raft_state_size(), 3);
    }

    #[test]
    fn file_persister_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let p = FilePersister::new(dir.path()).unwrap();
            p.save_state_and_snapshot(vec![9, 9], vec![7]).unwrap();
        }
        let p = FilePersister::new(dir.path()).unwrap();
        assert_eq!(p.read_raft_state().unwrap(), Some(vec![9, 9]));
        assert_eq!(p.read_snapshot().unwrap(), Some(vec![7]));
        assert_eq!(p.raft_state_size(), 2);
    }
}
