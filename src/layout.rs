//! On-disk layout of accumulator and batch files
//!
//! Accumulator files live in the log directory as `log-events-<uuid>.json`,
//! batch files in the batch directory as `batch-<uuid>.json`. The UUID sits at
//! a fixed character offset in the accumulator name and is the identity that
//! links an accumulator to its batch file.

use crate::errors::{IngestError, IngestResult};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const LOG_FILE_PREFIX: &str = "log-events-";
pub const BATCH_FILE_PREFIX: &str = "batch-";
pub const JSON_FILE_TYPE: &str = ".json";

const UUID_START: usize = 11;
const UUID_END: usize = 47;

/// Stable key linking one accumulator file to one batch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct Identity(Uuid);

impl Identity {
    pub fn generate() -> Self {
        Identity(Uuid::new_v4())
    }

    /// Derive the identity from an accumulator file name.
    pub fn from_accumulator_name(name: &str) -> IngestResult<Self> {
        if name.len() != UUID_END + JSON_FILE_TYPE.len()
            || !name.starts_with(LOG_FILE_PREFIX)
            || !name.ends_with(JSON_FILE_TYPE)
        {
            return Err(IngestError::malformed_identity(name));
        }
        let token = name
            .get(UUID_START..UUID_END)
            .ok_or_else(|| IngestError::malformed_identity(name))?;
        Uuid::parse_str(token)
            .map(Identity)
            .map_err(|_| IngestError::malformed_identity(name))
    }

    pub fn from_path(path: &Path) -> IngestResult<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IngestError::malformed_identity(path.display().to_string()))?;
        Self::from_accumulator_name(name)
    }

    pub fn accumulator_file_name(&self) -> String {
        format!("{LOG_FILE_PREFIX}{}{JSON_FILE_TYPE}", self.0)
    }

    pub fn batch_file_name(&self) -> String {
        format!("{BATCH_FILE_PREFIX}{}{JSON_FILE_TYPE}", self.0)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two directories the core works in.
#[derive(Debug, Clone)]
pub struct Layout {
    log_dir: PathBuf,
    batch_dir: PathBuf,
}

impl Layout {
    pub fn new(log_dir: impl Into<PathBuf>, batch_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            batch_dir: batch_dir.into(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn batch_dir(&self) -> &Path {
        &self.batch_dir
    }

    pub fn accumulator_path(&self, identity: &Identity) -> PathBuf {
        self.log_dir.join(identity.accumulator_file_name())
    }

    pub fn batch_path(&self, identity: &Identity) -> PathBuf {
        self.batch_dir.join(identity.batch_file_name())
    }

    /// Staging file the exporter renames over the batch file.
    pub fn batch_staging_path(&self, identity: &Identity) -> PathBuf {
        self.batch_dir
            .join(format!("{}.tmp", identity.batch_file_name()))
    }

    /// Name a batch file takes once a delivery job has claimed it.
    pub fn claimed_batch_path(&self, identity: &Identity, stamp: &str) -> PathBuf {
        self.batch_dir.join(format!(
            "{BATCH_FILE_PREFIX}{}.{stamp}.claimed{JSON_FILE_TYPE}",
            identity.as_uuid()
        ))
    }

    /// List accumulator candidates, creating the log directory if absent.
    ///
    /// Results are sorted by file name so discovery is deterministic.
    pub fn accumulator_candidates(&self) -> IngestResult<Vec<PathBuf>> {
        fs::create_dir_all(&self.log_dir)
            .map_err(|e| IngestError::io("creating log directory", e))?;

        let mut files = Vec::new();
        for entry in
            fs::read_dir(&self.log_dir).map_err(|e| IngestError::io("reading log directory", e))?
        {
            let entry = entry.map_err(|e| IngestError::io("reading log directory entry", e))?;
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(LOG_FILE_PREFIX) && n.ends_with(JSON_FILE_TYPE))
                .unwrap_or(false);
            if matches && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Flush directory metadata so a rename inside it survives a crash.
#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    OpenOptions::new().read(true).open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn fsync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn identity_roundtrips_through_accumulator_name() {
        let identity = Identity::generate();
        let name = identity.accumulator_file_name();
        assert_eq!(name.len(), 52);
        assert_eq!(Identity::from_accumulator_name(&name).unwrap(), identity);
    }

    #[test]
    fn identity_rejects_wrong_length() {
        let err = Identity::from_accumulator_name("log-events-1234.json").unwrap_err();
        assert!(matches!(err, IngestError::MalformedIdentity { .. }));
    }

    #[test]
    fn identity_rejects_non_uuid_token() {
        let name = format!("{LOG_FILE_PREFIX}{}{JSON_FILE_TYPE}", "z".repeat(36));
        assert!(Identity::from_accumulator_name(&name).is_err());
    }

    #[test]
    fn batch_name_shares_identity() {
        let identity = Identity::generate();
        let layout = Layout::new("log", "batch");
        let batch = layout.batch_path(&identity);
        assert_eq!(
            batch.file_name().unwrap().to_str().unwrap(),
            format!("batch-{identity}.json")
        );
    }

    #[test]
    fn candidates_filter_by_pattern_and_create_directory() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path().join("log"), dir.path().join("batch"));

        assert!(layout.accumulator_candidates().unwrap().is_empty());
        assert!(layout.log_dir().is_dir());

        let identity = Identity::generate();
        fs::write(layout.accumulator_path(&identity), b"[]").unwrap();
        fs::write(layout.log_dir().join("notes.txt"), b"x").unwrap();
        fs::write(layout.log_dir().join("log-events-x.txt"), b"x").unwrap();

        let candidates = layout.accumulator_candidates().unwrap();
        assert_eq!(candidates, vec![layout.accumulator_path(&identity)]);
    }
}
