//! The workload file-system boundary and a file-writing consumer.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::broker::Outcome;
use crate::error::{Error, Result};
use crate::protocol::Notification;
use crate::requirer::MaterialConsumer;
use crate::types::Field;

/// Files inside a workload container.
///
/// Paths are absolute paths as the workload sees them; implementations
/// decide where they land.
pub trait WorkloadFs {
    /// Whether the workload currently accepts writes.
    fn can_connect(&self) -> bool;

    /// Writes `contents` to `path`, replacing any existing file.
    fn push(&mut self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Writes `contents` to `path` readable by the owner only.
    fn push_secret(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        self.push(path, contents)
    }

    /// Reads `path`, returning `None` if it does not exist.
    fn pull(&self, path: &Path) -> Result<Option<Vec<u8>>>;
}

/// A workload rooted at a local directory.
#[derive(Debug, Clone)]
pub struct DirWorkload {
    root: PathBuf,
}

impl DirWorkload {
    /// Creates a workload whose `/` is `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a workload path onto the local root, ignoring any leading `/`
    /// and refusing `..` components.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(Error::Workload {
                        path: path.to_path_buf(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            "parent components are not allowed",
                        ),
                    });
                }
            }
        }
        Ok(resolved)
    }

    fn write(&self, path: &Path, contents: &[u8], secret: bool) -> Result<()> {
        let target = self.resolve(path)?;
        let fail = |source| Error::Workload {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(fail)?;
        }
        fs::write(&target, contents).map_err(fail)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if secret {
                fs::set_permissions(&target, fs::Permissions::from_mode(0o600)).map_err(fail)?;
            }
        }
        #[cfg(not(unix))]
        let _ = secret;
        debug!(path = %path.display(), bytes = contents.len(), secret, "Wrote workload file");
        Ok(())
    }
}

impl WorkloadFs for DirWorkload {
    fn can_connect(&self) -> bool {
        self.root.is_dir()
    }

    fn push(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        self.write(path, contents, false)
    }

    fn push_secret(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        self.write(path, contents, true)
    }

    fn pull(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let target = self.resolve(path)?;
        match fs::read(&target) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::Workload {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    offline: bool,
    files: std::collections::BTreeMap<PathBuf, Vec<u8>>,
    secrets: std::collections::BTreeSet<PathBuf>,
    refused: std::collections::BTreeSet<PathBuf>,
    writes: Vec<(PathBuf, Vec<u8>)>,
}

/// In-memory workload that records every write. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkload {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryWorkload {
    /// Creates an empty, reachable workload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the workload as reachable or not.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().offline = !reachable;
    }

    /// Every write so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.inner.lock().writes.clone()
    }

    /// Current contents of a file.
    #[must_use]
    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.inner.lock().files.get(path.as_ref()).cloned()
    }

    /// Whether `path` was last written as an owner-only file.
    #[must_use]
    pub fn is_secret(&self, path: impl AsRef<Path>) -> bool {
        self.inner.lock().secrets.contains(path.as_ref())
    }

    /// Makes writes to `path` fail while the rest of the workload stays
    /// reachable, or lifts that again.
    pub fn refuse_writes(&self, path: impl Into<PathBuf>, refused: bool) {
        let path = path.into();
        let mut inner = self.inner.lock();
        if refused {
            inner.refused.insert(path);
        } else {
            inner.refused.remove(&path);
        }
    }

    fn store(&self, path: &Path, contents: &[u8], secret: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(Error::Workload {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotConnected, "workload unreachable"),
            });
        }
        if inner.refused.contains(path) {
            return Err(Error::Workload {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "write refused"),
            });
        }
        inner.files.insert(path.to_path_buf(), contents.to_vec());
        inner.writes.push((path.to_path_buf(), contents.to_vec()));
        if secret {
            inner.secrets.insert(path.to_path_buf());
        } else {
            inner.secrets.remove(path);
        }
        Ok(())
    }
}

impl WorkloadFs for MemoryWorkload {
    fn can_connect(&self) -> bool {
        !self.inner.lock().offline
    }

    fn push(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        self.store(path, contents, false)
    }

    fn push_secret(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        self.store(path, contents, true)
    }

    fn pull(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().files.get(path).cloned())
    }
}

/// Writes available material to fixed paths inside a workload.
///
/// Each field is mapped to one path; private keys are written owner-only.
/// The sink defers while the workload is unreachable or refuses a write, and
/// rewrites every file on each notification, so a redelivery completes a
/// partial write and renewed material replaces what was there.
#[derive(Debug)]
pub struct FileSink<W> {
    workload: W,
    paths: Vec<(Field, PathBuf)>,
}

impl<W: WorkloadFs> FileSink<W> {
    /// Creates a sink with no paths mapped.
    pub const fn new(workload: W) -> Self {
        Self {
            workload,
            paths: Vec::new(),
        }
    }

    /// Writes `field` to `path`.
    #[must_use]
    pub fn field(mut self, field: Field, path: impl Into<PathBuf>) -> Self {
        self.paths.push((field, path.into()));
        self
    }

    /// Writes the certificate to `path`.
    #[must_use]
    pub fn certificate(self, path: impl Into<PathBuf>) -> Self {
        self.field(Field::Certificate, path)
    }

    /// Writes the private key to `path`.
    #[must_use]
    pub fn private_key(self, path: impl Into<PathBuf>) -> Self {
        self.field(Field::PrivateKey, path)
    }

    /// The workload files are written to.
    pub const fn workload(&self) -> &W {
        &self.workload
    }
}

impl<W: WorkloadFs> MaterialConsumer for FileSink<W> {
    fn consume(&mut self, notification: &Notification) -> Result<Outcome> {
        if !self.workload.can_connect() {
            warn!(relation_id = %notification.relation_id(), "Workload unreachable, deferring");
            return Ok(Outcome::Deferred);
        }

        let material = notification.material();
        for (field, path) in &self.paths {
            let Some(value) = material.get(*field) else {
                continue;
            };
            let pushed = if *field == Field::PrivateKey {
                self.workload.push_secret(path, value.as_bytes())
            } else {
                self.workload.push(path, value.as_bytes())
            };
            match pushed {
                Ok(()) => {
                    info!(relation_id = %notification.relation_id(), field = %field, path = %path.display(), "Stored certificate material");
                }
                Err(e) if is_retryable(&e) => {
                    warn!(relation_id = %notification.relation_id(), error = %e, "Workload refused write, deferring");
                    return Ok(Outcome::Deferred);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Outcome::Handled)
    }
}

/// Write failures that may clear up on their own. A path the workload can
/// never accept is not one of them.
fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::Workload { source, .. } if source.kind() != std::io::ErrorKind::InvalidInput)
}
