//! Batch export
//!
//! Moves everything in the accumulator into the batch file for the same
//! identity, then resets the accumulator. The merged batch is staged in a
//! temporary file and renamed into place, so the batch file on disk is always
//! either the previous array or the merged one. The accumulator is only reset
//! after the rename.

use crate::accumulator::Accumulator;
use crate::errors::{IngestError, IngestResult};
use crate::layout::{fsync_dir, Identity, Layout};
use serde::de::IgnoredAny;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Outcome of one export-and-reset.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub identity: Identity,
    pub batch_path: PathBuf,
    pub exported: usize,
    pub created: bool,
}

/// Export the accumulator into its batch file and reset it.
///
/// Returns `None` without touching anything when the accumulator is empty.
pub fn export_and_reset(
    accumulator: &mut Accumulator,
    layout: &Layout,
) -> IngestResult<Option<ExportReport>> {
    let identity = *accumulator.identity();
    let content = accumulator.contents()?;
    let exported = serde_json::from_slice::<Vec<IgnoredAny>>(&content)
        .map_err(|e| IngestError::corrupt(accumulator.path(), e.to_string()))?
        .len();
    if exported == 0 {
        return Ok(None);
    }

    fs::create_dir_all(layout.batch_dir())
        .map_err(|e| IngestError::io("creating batch directory", e))?;

    let batch_path = layout.batch_path(&identity);
    let existing = read_existing(&batch_path)?;
    let created = existing.is_none();
    let merged = merge_arrays(existing.as_deref(), &content, &batch_path)?;

    write_atomic(&batch_path, &layout.batch_staging_path(&identity), &merged)?;
    accumulator.reset()?;

    info!(
        batch = %batch_path.display(),
        %identity,
        exported,
        created,
        "exported accumulator into batch file"
    );
    Ok(Some(ExportReport {
        identity,
        batch_path,
        exported,
        created,
    }))
}

fn read_existing(path: &Path) -> IngestResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IngestError::io("reading batch file", e)),
    }
}

/// Splice the accumulator's elements onto the end of the batch array.
///
/// An absent or empty batch array is replaced by the accumulator verbatim.
fn merge_arrays(existing: Option<&[u8]>, accumulated: &[u8], batch_path: &Path) -> IngestResult<Vec<u8>> {
    let Some(existing) = existing else {
        return Ok(accumulated.to_vec());
    };

    let body = existing.trim_ascii_end();
    let Some((&b']', head)) = body.split_last() else {
        return Err(IngestError::corrupt_batch(batch_path, "trailing byte is not ']'"));
    };
    let Some((&b'[', inner)) = head.trim_ascii_start().split_first() else {
        return Err(IngestError::corrupt_batch(batch_path, "leading byte is not '['"));
    };
    if inner.trim_ascii().is_empty() {
        return Ok(accumulated.to_vec());
    }

    let tail = accumulated.strip_prefix(b"[").ok_or_else(|| {
        IngestError::internal("accumulator content does not start with '['")
    })?;

    let mut merged = Vec::with_capacity(head.len() + 2 + tail.len());
    merged.extend_from_slice(head);
    merged.extend_from_slice(b",\n");
    merged.extend_from_slice(tail);
    Ok(merged)
}

fn write_atomic(target: &Path, staging: &Path, bytes: &[u8]) -> IngestResult<()> {
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(staging)
            .map_err(|e| IngestError::io("creating batch staging file", e))?;
        file.write_all(bytes)
            .map_err(|e| IngestError::io("writing batch staging file", e))?;
        file.sync_all()
            .map_err(|e| IngestError::io("syncing batch staging file", e))?;
    }

    fs::rename(staging, target).map_err(|e| IngestError::io("renaming batch file", e))?;
    if let Some(parent) = target.parent() {
        fsync_dir(parent).map_err(|e| IngestError::io("syncing batch directory", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn parse(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn absent_batch_takes_accumulator_verbatim() {
        let acc = b"[\n{\"a\":1}\n]";
        let merged = merge_arrays(None, acc, Path::new("b.json")).unwrap();
        assert_eq!(merged, acc);
    }

    #[test]
    fn existing_batch_gets_elements_appended() {
        let batch = b"[\n\"a\",\n\"b\"\n]";
        let acc = b"[\n\"c\",\n\"d\"\n]";
        let merged = merge_arrays(Some(&batch[..]), acc, Path::new("b.json")).unwrap();
        assert_eq!(parse(&merged), json!(["a", "b", "c", "d"]));
    }

    #[test]
    fn empty_batch_array_is_replaced() {
        let acc = b"[\n\"c\"\n]";
        let merged = merge_arrays(Some(&b"[ ]\n"[..]), acc, Path::new("b.json")).unwrap();
        assert_eq!(parse(&merged), json!(["c"]));
    }

    #[test]
    fn trailing_newline_on_batch_is_tolerated() {
        let merged =
            merge_arrays(Some(&b"[\"a\"]\n"[..]), b"[\n\"b\"\n]", Path::new("b.json")).unwrap();
        assert_eq!(parse(&merged), json!(["a", "b"]));
    }

    #[test]
    fn truncated_batch_is_rejected() {
        let err = merge_arrays(Some(&b"[\"a\","[..]), b"[\n\"b\"\n]", Path::new("b.json")).unwrap_err();
        assert!(matches!(err, IngestError::CorruptBatch { .. }));
    }
}
