use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use consign_batch::{BatchRecord, ConsignmentDraft, ConsignmentRecord};
use consign_core::{BatchId, ConsignmentId, CourierId};
use consign_dispatch::{DispatchRepository, RepositoryError};

use super::Tables;

const SNAPSHOT_FILE: &str = "dispatch.json";
const LOCK_FILE: &str = "dispatch.lock";
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_POLL: Duration = Duration::from_millis(20);

/// Dispatch repository backed by a single JSON snapshot file.
///
/// Every mutation takes the directory's lock file, re-reads the snapshot,
/// applies the change and rewrites the snapshot (temp file, then rename), so
/// any number of handles and processes can share one data directory without
/// losing each other's writes. Reads always see the latest snapshot on disk.
#[derive(Debug)]
pub struct JsonFileDispatchRepository {
    path: PathBuf,
    lock_path: PathBuf,
    lock_wait: Duration,
}

impl JsonFileDispatchRepository {
    /// Open (or create) the snapshot inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| storage(dir, e))?;
        let repo = Self {
            path: dir.join(SNAPSHOT_FILE),
            lock_path: dir.join(LOCK_FILE),
            lock_wait: DEFAULT_LOCK_WAIT,
        };

        let tables = repo.read_snapshot()?;
        info!(
            path = %repo.path.display(),
            batches = tables.batches.len(),
            consignments = tables.consignments.len(),
            "opened dispatch snapshot"
        );
        Ok(repo)
    }

    /// How long a mutation waits for another writer before failing with
    /// [`RepositoryError::Locked`].
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut Tables) -> Result<T, RepositoryError>) -> Result<T, RepositoryError> {
        let _lock = WriterLock::acquire(&self.lock_path, self.lock_wait)?;
        let mut tables = self.read_snapshot()?;
        let out = op(&mut tables)?;
        self.write_snapshot(&tables)?;
        Ok(out)
    }

    fn read_snapshot(&self) -> Result<Tables, RepositoryError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Tables::default()),
            Err(e) => return Err(storage(&self.path, e)),
        };
        serde_json::from_str(&raw).map_err(|e| RepositoryError::Serialization(e.to_string()))
    }

    fn write_snapshot(&self, tables: &Tables) -> Result<(), RepositoryError> {
        let json =
            serde_json::to_vec_pretty(tables).map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| storage(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| storage(&self.path, e))?;
        debug!(path = %self.path.display(), "dispatch snapshot written");
        Ok(())
    }
}

/// Exclusive writer lock: a file created with `create_new`, removed on drop.
///
/// A process killed while holding it leaves the file behind; it holds the
/// writer's pid and must then be removed by hand.
struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    fn acquire(path: &Path, wait: Duration) -> Result<Self, RepositoryError> {
        let deadline = Instant::now() + wait;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let lock = Self {
                        path: path.to_path_buf(),
                    };
                    writeln!(file, "{}", std::process::id()).map_err(|e| storage(path, e))?;
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(RepositoryError::Locked(format!(
                            "{} is held by another writer; remove it if no consign process is running",
                            path.display()
                        )));
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(storage(path, e)),
            }
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not release dispatch lock");
        }
    }
}

fn storage(path: &Path, err: std::io::Error) -> RepositoryError {
    RepositoryError::Storage(format!("{}: {err}", path.display()))
}

impl DispatchRepository for JsonFileDispatchRepository {
    fn save_batch(&self, batch: &BatchRecord) -> Result<(), RepositoryError> {
        self.mutate(|t| t.save_batch(batch))
    }

    fn close_batch(&self, id: BatchId, closed_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.mutate(|t| t.close_batch(id, closed_at))
    }

    fn insert_consignment(&self, draft: &ConsignmentDraft) -> Result<ConsignmentId, RepositoryError> {
        self.mutate(|t| t.insert_consignment(draft))
    }

    fn save_consignment(&self, consignment: &ConsignmentRecord) -> Result<(), RepositoryError> {
        self.mutate(|t| t.save_consignment(consignment))
    }

    fn load_latest_batch(&self) -> Result<Option<BatchRecord>, RepositoryError> {
        Ok(self.read_snapshot()?.latest_batch())
    }

    fn load_batch(&self, id: BatchId) -> Result<Option<BatchRecord>, RepositoryError> {
        Ok(self.read_snapshot()?.batch(id))
    }

    fn load_consignments_for_batch(&self, id: BatchId) -> Result<Vec<ConsignmentRecord>, RepositoryError> {
        Ok(self.read_snapshot()?.consignments_for_batch(id))
    }

    fn highest_consignment_number(&self, courier: CourierId) -> Result<Option<u64>, RepositoryError> {
        Ok(self.read_snapshot()?.highest_number(courier))
    }

    fn closed_batches_with_unsent(&self) -> Result<Vec<BatchId>, RepositoryError> {
        Ok(self.read_snapshot()?.closed_batches_with_unsent())
    }
}
