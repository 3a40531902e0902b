use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::{Error, Result};

/// Exclusive advisory lock on `<dir>/<customer_id>.lock`, held until drop.
///
/// Only serializes runs that share the lock directory; runs on different
/// hosts can still race between lookup and create.
#[derive(Debug)]
pub struct CustomerLock {
    file: File,
    path: PathBuf,
}

impl CustomerLock {
    /// Take the lock without blocking. Contention is [`Error::Locked`].
    pub fn acquire(dir: &Path, customer_id: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{customer_id}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        file.try_lock_exclusive()
            .map_err(|_| Error::Locked(customer_id.to_string()))?;

        debug!(path = %path.display(), "customer lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CustomerLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
