//! Locked accumulator handle
//!
//! The accumulator is a JSON array kept in a file this process holds an
//! exclusive lock on. Records are spliced in over the closing bracket so an
//! append never rewrites earlier bytes:
//!
//! ```text
//! []            -> [\n{a}\n]
//! [\n{a}\n]     -> [\n{a}\n,\n{b}\n]
//! ```
//!
//! The splice is only safe because no other handle can write the file while
//! the lock is held.

use crate::errors::{IngestError, IngestResult};
use crate::layout::Identity;
use fs2::FileExt;
use serde::de::IgnoredAny;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const EMPTY_ARRAY: &[u8] = b"[]";
const EMPTY_FILE_LENGTH: u64 = EMPTY_ARRAY.len() as u64;

/// Exclusive handle on one accumulator file.
#[derive(Debug)]
pub struct Accumulator {
    file: File,
    path: PathBuf,
    identity: Identity,
    len: usize,
    locked: bool,
    sync_on_append: bool,
}

impl Accumulator {
    /// Wrap a file whose exclusive lock the caller already holds.
    ///
    /// Runs the startup integrity check and resynchronises the tracked
    /// element count from a full parse.
    pub(crate) fn from_locked(file: File, path: PathBuf, identity: Identity) -> IngestResult<Self> {
        let mut accumulator = Self {
            file,
            path,
            identity,
            len: 0,
            locked: true,
            sync_on_append: false,
        };
        accumulator.check_integrity()?;
        Ok(accumulator)
    }

    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tracked element count.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Append one record to the array.
    pub fn append<T: Serialize + ?Sized>(&mut self, record: &T) -> IngestResult<()> {
        self.ensure_locked()?;
        let json = serde_json::to_string(record)
            .map_err(|e| IngestError::serialization("serializing record", e))?;

        let length = self.file_length()?;
        if length < EMPTY_FILE_LENGTH {
            return Err(IngestError::corrupt(&self.path, "file shorter than an empty array"));
        }

        self.file
            .seek(SeekFrom::Start(length - 1))
            .map_err(|e| IngestError::io("seeking accumulator", e))?;
        self.file
            .write_all(splice(&json, length).as_bytes())
            .map_err(|e| IngestError::io("appending to accumulator", e))?;
        self.file
            .flush()
            .map_err(|e| IngestError::io("flushing accumulator", e))?;
        if self.sync_on_append {
            self.file
                .sync_data()
                .map_err(|e| IngestError::io("syncing accumulator", e))?;
        }

        self.len += 1;
        debug!(
            path = %self.path.display(),
            elements = self.len,
            "record appended to accumulator"
        );
        Ok(())
    }

    /// Count the array elements by re-reading and parsing the whole file.
    pub fn count(&mut self) -> IngestResult<usize> {
        let content = self.contents()?;
        let elements: Vec<IgnoredAny> = serde_json::from_slice(&content)
            .map_err(|e| IngestError::corrupt(&self.path, e.to_string()))?;
        Ok(elements.len())
    }

    /// Raw bytes of the accumulator file.
    pub fn contents(&mut self) -> IngestResult<Vec<u8>> {
        self.ensure_locked()?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| IngestError::io("seeking accumulator", e))?;
        let mut content = Vec::with_capacity(self.file_length()? as usize);
        self.file
            .read_to_end(&mut content)
            .map_err(|e| IngestError::io("reading accumulator", e))?;
        Ok(content)
    }

    /// Truncate to the empty array, keeping the lock.
    pub fn reset(&mut self) -> IngestResult<()> {
        self.ensure_locked()?;
        self.write_empty_array()?;
        self.len = 0;
        Ok(())
    }

    /// Give up the lock. The handle is unusable afterwards.
    pub fn release(&mut self) -> IngestResult<()> {
        self.ensure_locked()?;
        FileExt::unlock(&self.file).map_err(|e| IngestError::io("unlocking accumulator", e))?;
        self.locked = false;
        Ok(())
    }

    fn ensure_locked(&self) -> IngestResult<()> {
        if self.locked {
            Ok(())
        } else {
            Err(IngestError::NoActiveLock)
        }
    }

    fn file_length(&self) -> IngestResult<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| IngestError::io("reading accumulator length", e))
    }

    fn write_empty_array(&mut self) -> IngestResult<()> {
        self.rewrite(EMPTY_ARRAY)
    }

    /// Replace the whole file with `bytes` and sync it.
    fn rewrite(&mut self, bytes: &[u8]) -> IngestResult<()> {
        self.file
            .set_len(0)
            .map_err(|e| IngestError::io("truncating accumulator", e))?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| IngestError::io("seeking accumulator", e))?;
        self.file
            .write_all(bytes)
            .map_err(|e| IngestError::io("rewriting accumulator", e))?;
        self.file
            .sync_data()
            .map_err(|e| IngestError::io("syncing accumulator", e))
    }

    /// First non-whitespace byte must be `[`, last `]`, and the body must
    /// parse as an array. Surrounding whitespace is stripped on disk so the
    /// closing bracket sits at the final byte again. A zero-length file is
    /// initialised and a blank array is normalised to `[]`.
    fn check_integrity(&mut self) -> IngestResult<()> {
        let content = self.contents()?;
        if content.is_empty() {
            warn!(path = %self.path.display(), "accumulator was empty on disk, initialising");
            self.write_empty_array()?;
            self.len = 0;
            return Ok(());
        }

        let body = content.trim_ascii();
        if body.first() != Some(&b'[') {
            return Err(IngestError::corrupt(&self.path, "leading byte is not '['"));
        }
        if body.last() != Some(&b']') {
            return Err(IngestError::corrupt(&self.path, "trailing byte is not ']'"));
        }

        self.len = self.count()?;
        if self.len == 0 {
            if content != EMPTY_ARRAY {
                self.write_empty_array()?;
            }
        } else if body.len() != content.len() {
            debug!(path = %self.path.display(), "stripping whitespace around accumulator array");
            self.rewrite(body)?;
        }
        Ok(())
    }
}

impl Drop for Accumulator {
    fn drop(&mut self) {
        if self.locked {
            let _ = FileExt::unlock(&self.file);
        }
    }
}

fn splice(json: &str, length: u64) -> String {
    if length == EMPTY_FILE_LENGTH {
        format!("\n{json}\n]")
    } else {
        format!(",\n{json}\n]")
    }
}
