use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Destination files that some task is currently writing.
///
/// Two links can lead to the same track (a release and a chart it appears
/// on, say). Whoever claims the path first writes it; everyone else skips.
#[derive(Debug, Default)]
pub struct ActiveFiles {
    paths: RwLock<HashSet<PathBuf>>,
}

impl ActiveFiles {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims `path` for the caller. Returns `false` if someone else holds it.
    pub fn try_acquire(&self, path: &Path) -> bool {
        let mut paths = self.paths.write().unwrap_or_else(|e| e.into_inner());
        paths.insert(path.to_path_buf())
    }

    /// Drops the claim on `path`. Releasing an unheld path is a no-op.
    pub fn release(&self, path: &Path) {
        let mut paths = self.paths.write().unwrap_or_else(|e| e.into_inner());
        paths.remove(path);
    }

    pub fn is_active(&self, path: &Path) -> bool {
        let paths = self.paths.read().unwrap_or_else(|e| e.into_inner());
        paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Like [`try_acquire`](Self::try_acquire), but the claim is dropped
    /// together with the returned guard.
    pub fn claim(self: &Arc<Self>, path: &Path) -> Option<FileClaim> {
        if self.try_acquire(path) {
            Some(FileClaim {
                registry: Arc::clone(self),
                path: path.to_path_buf(),
            })
        } else {
            None
        }
    }
}

/// Holds a destination path in [`ActiveFiles`] until dropped.
#[derive(Debug)]
pub struct FileClaim {
    registry: Arc<ActiveFiles>,
    path: PathBuf,
}

impl FileClaim {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileClaim {
    fn drop(&mut self) {
        self.registry.release(&self.path);
    }
}
