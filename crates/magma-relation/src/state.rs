//! JSON snapshot files for protocol state that must survive restarts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A single JSON document on disk, rewritten atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    /// Store at `<dir>/<name>.json`.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{name}.json")),
        }
    }

    /// The snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot, falling back to the default when the file is
    /// missing or unreadable.
    pub fn load<T: DeserializeOwned + Default>(&self) -> T {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read state snapshot");
                return T::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => {
                debug!(path = %self.path.display(), "loaded state snapshot");
                value
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding corrupt state snapshot");
                T::default()
            }
        }
    }

    /// Writes the snapshot via a temporary file and rename.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        let fail = |reason: String| Error::Persistence {
            path: self.path.clone(),
            reason,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }
        let json = serde_json::to_vec_pretty(value).map_err(|e| fail(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| fail(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| fail(e.to_string()))
    }
}
