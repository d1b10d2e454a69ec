//! WAL checkpoint
//!
//! A tiny JSON file (`wal/CHECKPOINT`) recording the highest WAL sequence
//! number already applied to the object store. Recovery only considers
//! records past it. Advances are monotone and written atomically (temp file +
//! rename) so a crash never leaves a torn or regressed checkpoint.

use chrondb_core::{ChronError, ChronResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Checkpoint file name inside the WAL directory.
pub const CHECKPOINT_FILE: &str = "CHECKPOINT";

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointState {
    last_applied_seq: u64,
}

/// Persistent checkpoint
pub struct Checkpoint {
    path: PathBuf,
    state: Mutex<u64>,
}

impl Checkpoint {
    /// Load the checkpoint from `<data_dir>/wal/CHECKPOINT`, defaulting to 0.
    pub fn load(data_dir: &Path) -> ChronResult<Self> {
        let path = data_dir.join("wal").join(CHECKPOINT_FILE);
        let seq = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let state: CheckpointState = serde_json::from_str(&text)
                    .map_err(|e| ChronError::corrupt(format!("bad checkpoint file: {}", e)))?;
                state.last_applied_seq
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(Checkpoint {
            path,
            state: Mutex::new(seq),
        })
    }

    /// Highest applied sequence number.
    pub fn last_applied_seq(&self) -> u64 {
        *self.state.lock()
    }

    /// Advance to `seq` and persist. Regressions are ignored, which keeps
    /// repeated recovery replays idempotent.
    pub fn advance(&self, seq: u64) -> ChronResult<()> {
        let mut current = self.state.lock();
        if seq <= *current {
            return Ok(());
        }
        let state = CheckpointState {
            last_applied_seq: seq,
        };
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        let json = serde_json::to_string(&state)
            .map_err(|e| ChronError::internal(format!("checkpoint serialize: {}", e)))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        *current = seq;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_checkpoint_is_zero() {
        let dir = TempDir::new().unwrap();
        let cp = Checkpoint::load(dir.path()).unwrap();
        assert_eq!(cp.last_applied_seq(), 0);
    }

    #[test]
    fn test_advance_persists_across_reload() {
        let dir = TempDir::new().unwrap();
        {
            let cp = Checkpoint::load(dir.path()).unwrap();
            cp.advance(42).unwrap();
        }
        let cp = Checkpoint::load(dir.path()).unwrap();
        assert_eq!(cp.last_applied_seq(), 42);
    }

    #[test]
    fn test_advance_is_monotone() {
        let dir = TempDir::new().unwrap();
        let cp = Checkpoint::load(dir.path()).unwrap();
        cp.advance(10).unwrap();
        cp.advance(5).unwrap();
        assert_eq!(cp.last_applied_seq(), 10);
        cp.advance(11).unwrap();
        assert_eq!(cp.last_applied_seq(), 11);
    }

    #[test]
    fn test_corrupt_checkpoint_rejected() {
        let dir = TempDir::new().unwrap();
        let wal_dir = dir.path().join("wal");
        std::fs::create_dir_all(&wal_dir).unwrap();
        std::fs::write(wal_dir.join(CHECKPOINT_FILE), "not json").unwrap();
        let err = Checkpoint::load(dir.path()).unwrap_err();
        assert!(err.is_serious());
    }
}
