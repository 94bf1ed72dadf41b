//! Identity & lock coordination
//!
//! Picks the accumulator file this process will own. Existing files are probed
//! with a non-blocking lock first so a live instance is never waited on. The
//! lock that is kept is also taken without blocking, so losing a race for a
//! candidate just moves on to the next one.

use crate::accumulator::{Accumulator, EMPTY_ARRAY};
use crate::errors::{IngestError, IngestResult};
use crate::layout::{fsync_dir, Identity, Layout};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Finds or creates an accumulator file and locks it exclusively.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    layout: Layout,
    sync_on_append: bool,
}

impl LockCoordinator {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            sync_on_append: false,
        }
    }

    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }

    /// Select, lock and open an accumulator.
    ///
    /// Unlocked candidates in the log directory are preferred; corrupt ones
    /// are skipped and left on disk. When nothing is usable a fresh file is
    /// created.
    pub fn acquire(&self) -> IngestResult<(Accumulator, Identity)> {
        if let Some(found) = self.acquire_existing()? {
            return Ok(found);
        }

        loop {
            let created = self.create_log_file()?;
            if let Some(accumulator) = self.lock_file(&created)? {
                let identity = *accumulator.identity();
                info!(path = %created.display(), %identity, "created accumulator file");
                return Ok((accumulator, identity));
            }
        }
    }

    /// Lock an existing, unlocked accumulator without ever creating one.
    /// Returns `None` when every usable candidate is held elsewhere.
    pub fn acquire_existing(&self) -> IngestResult<Option<(Accumulator, Identity)>> {
        for candidate in self.layout.accumulator_candidates()? {
            if !is_file_unlocked(&candidate) {
                continue;
            }
            match self.lock_file(&candidate) {
                Ok(Some(accumulator)) => {
                    let identity = *accumulator.identity();
                    info!(
                        path = %candidate.display(),
                        %identity,
                        pending = accumulator.len(),
                        "reusing accumulator file"
                    );
                    return Ok(Some((accumulator, identity)));
                }
                Ok(None) => {
                    debug!(path = %candidate.display(), "candidate taken between probe and lock");
                }
                Err(IngestError::CorruptAccumulator { path, reason }) => {
                    warn!(path = %path.display(), %reason, "skipping corrupt accumulator");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn create_log_file(&self) -> IngestResult<PathBuf> {
        let path = self.layout.accumulator_path(&Identity::generate());
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| IngestError::io("creating accumulator file", e))?;
        file.write_all(EMPTY_ARRAY)
            .map_err(|e| IngestError::io("initialising accumulator file", e))?;
        file.sync_all()
            .map_err(|e| IngestError::io("syncing accumulator file", e))?;
        fsync_dir(self.layout.log_dir())
            .map_err(|e| IngestError::io("syncing log directory", e))?;
        Ok(path)
    }

    /// Open and exclusively lock `path`. Returns `None` when another holder
    /// won the lock after the probe.
    fn lock_file(&self, path: &Path) -> IngestResult<Option<Accumulator>> {
        let identity = Identity::from_path(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| IngestError::lock(path, e))?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                return Ok(None)
            }
            Err(e) => return Err(IngestError::lock(path, e)),
        }
        info!(path = %path.display(), "locked accumulator file");

        let accumulator = Accumulator::from_locked(file, path.to_path_buf(), identity)?
            .with_sync_on_append(self.sync_on_append);
        Ok(Some(accumulator))
    }
}

/// Probe a file with a non-blocking exclusive lock, releasing it at once.
fn is_file_unlocked(path: &Path) -> bool {
    let Ok(file) = File::options().read(true).write(true).open(path) else {
        return false;
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn probe_reports_locked_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("probe.json");
        std::fs::write(&path, b"[]").unwrap();
        assert!(is_file_unlocked(&path));

        let holder = File::options().read(true).write(true).open(&path).unwrap();
        FileExt::lock_exclusive(&holder).unwrap();
        assert!(!is_file_unlocked(&path));

        FileExt::unlock(&holder).unwrap();
        assert!(is_file_unlocked(&path));
    }

    #[test]
    fn probe_on_missing_file_is_not_unlocked() {
        let dir = tempdir().unwrap();
        assert!(!is_file_unlocked(&dir.path().join("missing.json")));
    }
}
