//! Outbound delivery of exported batch files
//!
//! After an export the pipeline signals a [`BatchSink`]. The sink is picked
//! once at startup from [`DeliveryMode`]:
//!
//! - `Retain` leaves the batch file for an external consumer.
//! - `Drain` runs a bounded pool of jobs that claim the batch file, log every
//!   record and delete the file.

use crate::config::{DeliveryConfig, DeliveryMode};
use crate::errors::{IngestError, IngestResult, SafeLock};
use crate::layout::{Identity, Layout};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Serialises writers of one identity's batch file: the exporter replacing
/// it and a delivery job claiming it.
pub type BatchGuard = Arc<Mutex<()>>;

/// Signal that a batch file holds exported records.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReady {
    pub identity: Identity,
    pub path: PathBuf,
}

/// Receiver of export signals. Implementations must not block the caller.
pub trait BatchSink: Send + Sync {
    fn batch_ready(&self, batch: BatchReady);
}

/// Leaves batch files where they are.
#[derive(Debug, Default)]
pub struct RetainSink;

impl BatchSink for RetainSink {
    fn batch_ready(&self, batch: BatchReady) {
        info!(
            path = %batch.path.display(),
            identity = %batch.identity,
            "batch file ready for external consumer"
        );
    }
}

/// Drains batch files on a bounded worker pool.
pub struct DrainSink {
    layout: Layout,
    guard: BatchGuard,
    runtime: Handle,
    permits: Arc<Semaphore>,
    jobs: Mutex<JoinSet<()>>,
}

impl DrainSink {
    pub fn new(layout: Layout, guard: BatchGuard, runtime: Handle, concurrency: usize) -> Self {
        Self {
            layout,
            guard,
            runtime,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            jobs: Mutex::new(JoinSet::new()),
        }
    }

    /// Wait for every job spawned so far to finish.
    pub async fn wait_idle(&self) {
        let mut jobs = match self.jobs.safe_lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(e) => {
                error!("delivery job set unavailable: {e}");
                return;
            }
        };
        while jobs.join_next().await.is_some() {}
    }
}

impl BatchSink for DrainSink {
    fn batch_ready(&self, batch: BatchReady) {
        let layout = self.layout.clone();
        let guard = self.guard.clone();
        let permits = self.permits.clone();

        let job = async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let identity = batch.identity;
            let outcome =
                tokio::task::spawn_blocking(move || drain_batch(&layout, &guard, &identity)).await;
            match outcome {
                Ok(Ok(delivered)) => {
                    info!(%identity, delivered, "batch delivery finished")
                }
                Ok(Err(e)) => error!(%identity, "batch delivery failed: {e}"),
                Err(e) => error!(%identity, "batch delivery job panicked: {e}"),
            }
        };

        match self.jobs.safe_lock() {
            Ok(mut jobs) => {
                while jobs.try_join_next().is_some() {}
                jobs.spawn_on(job, &self.runtime);
            }
            Err(e) => error!("could not schedule batch delivery: {e}"),
        }
    }
}

/// Claim, log and delete the batch file for `identity`.
///
/// Returns the number of records delivered; a missing batch file means an
/// earlier job already took it and yields 0. On failure the claimed file is
/// left in place.
pub fn drain_batch(layout: &Layout, guard: &Mutex<()>, identity: &Identity) -> IngestResult<usize> {
    let claimed = {
        let _batch = guard.safe_lock()?;
        let source = layout.batch_path(identity);
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
        let claimed = layout.claimed_batch_path(identity, &stamp);
        match fs::rename(&source, &claimed) {
            Ok(()) => claimed,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(IngestError::io("claiming batch file", e)),
        }
    };

    let bytes = fs::read(&claimed).map_err(|e| IngestError::io("reading batch file", e))?;
    let records: Vec<serde_json::Value> = serde_json::from_slice(&bytes)
        .map_err(|e| IngestError::corrupt_batch(&claimed, e.to_string()))?;

    for record in &records {
        info!(target: "telemetry::delivery", %identity, %record, "telemetry record");
    }

    fs::remove_file(&claimed).map_err(|e| IngestError::io("deleting batch file", e))?;
    info!(path = %claimed.display(), "batch file deleted");
    Ok(records.len())
}

/// The sink chosen at startup.
pub enum Delivery {
    Retain(RetainSink),
    Drain(DrainSink),
}

impl Delivery {
    pub fn from_config(
        config: &DeliveryConfig,
        layout: Layout,
        guard: BatchGuard,
        runtime: Handle,
    ) -> Self {
        match config.mode {
            DeliveryMode::Retain => Delivery::Retain(RetainSink),
            DeliveryMode::Drain => Delivery::Drain(DrainSink::new(
                layout,
                guard,
                runtime,
                config.concurrency,
            )),
        }
    }

    pub async fn wait_idle(&self) {
        if let Delivery::Drain(sink) = self {
            sink.wait_idle().await;
        }
    }
}

impl BatchSink for Delivery {
    fn batch_ready(&self, batch: BatchReady) {
        match self {
            Delivery::Retain(sink) => sink.batch_ready(batch),
            Delivery::Drain(sink) => sink.batch_ready(batch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn layout_in(dir: &std::path::Path) -> Layout {
        let layout = Layout::new(dir.join("log"), dir.join("batch"));
        fs::create_dir_all(layout.batch_dir()).unwrap();
        layout
    }

    #[test]
    fn drain_deletes_batch_and_counts_records() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        let identity = Identity::generate();
        fs::write(layout.batch_path(&identity), b"[\n{\"a\":1},\n{\"a\":2}\n]").unwrap();

        let guard = Mutex::new(());
        assert_eq!(drain_batch(&layout, &guard, &identity).unwrap(), 2);
        assert!(!layout.batch_path(&identity).exists());
        assert_eq!(fs::read_dir(layout.batch_dir()).unwrap().count(), 0);
    }

    #[test]
    fn drain_without_batch_file_is_a_noop() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        let guard = Mutex::new(());
        assert_eq!(drain_batch(&layout, &guard, &Identity::generate()).unwrap(), 0);
    }

    #[test]
    fn corrupt_batch_is_left_claimed() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        let identity = Identity::generate();
        fs::write(layout.batch_path(&identity), b"[{\"a\":1},").unwrap();

        let guard = Mutex::new(());
        let err = drain_batch(&layout, &guard, &identity).unwrap_err();
        assert!(matches!(err, IngestError::CorruptBatch { .. }));
        assert_eq!(fs::read_dir(layout.batch_dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn drain_sink_runs_jobs_to_completion() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        let identity = Identity::generate();
        let path = layout.batch_path(&identity);
        fs::write(&path, b"[\n\"x\"\n]").unwrap();

        let sink = DrainSink::new(
            layout.clone(),
            Arc::new(Mutex::new(())),
            Handle::current(),
            2,
        );
        sink.batch_ready(BatchReady {
            identity,
            path: path.clone(),
        });
        sink.wait_idle().await;

        assert!(!path.exists());
    }
}
