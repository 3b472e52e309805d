use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use consign_core::CourierId;
use consign_courier::{CourierTransport, TransportError};

/// One send, as written to the drop directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_id: Uuid,
    pub courier: CourierId,
    pub numbers: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

/// Writes each send as a JSON manifest into a directory a carrier picks up from
/// (SFTP drop, shared mount). File names are `<courier>-<uuid v7>.json`.
#[derive(Debug, Clone)]
pub struct FileDropTransport {
    courier: CourierId,
    dir: PathBuf,
}

impl FileDropTransport {
    pub fn new(courier: CourierId, dir: impl Into<PathBuf>) -> Self {
        Self {
            courier,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CourierTransport for FileDropTransport {
    fn send(&self, numbers: &[u64]) -> Result<(), TransportError> {
        let manifest = Manifest {
            manifest_id: Uuid::now_v7(),
            courier: self.courier,
            numbers: numbers.to_vec(),
            created_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&manifest).map_err(|e| TransportError::Io(e.to_string()))?;

        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let name = format!("{}-{}.json", self.courier, manifest.manifest_id);
        let tmp = self.dir.join(format!(".{name}.part"));
        let path = self.dir.join(name);
        fs::write(&tmp, body).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;

        info!(courier = %self.courier, path = %path.display(), count = numbers.len(), "manifest dropped");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file_drop({})", self.dir.display())
    }
}

fn io_error(path: &Path, err: std::io::Error) -> TransportError {
    TransportError::Io(format!("{}: {err}", path.display()))
}
