//! Ingest pipeline
//!
//! One incoming event is one critical section: append, threshold check and,
//! when the threshold is reached, export-and-reset all run under the
//! accumulator mutex. The delivery signal is sent after the mutex is released.

use crate::accumulator::Accumulator;
use crate::config::IngestorConfig;
use crate::coordinator::LockCoordinator;
use crate::delivery::{BatchGuard, BatchReady, BatchSink};
use crate::errors::{IngestResult, SafeLock};
use crate::exporter::{export_and_reset, ExportReport};
use crate::layout::{Identity, Layout};
use crate::log_event::LogEvent;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::error;

/// Result of a single ingest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub identity: Identity,
    /// Elements left in the accumulator after this ingest.
    pub pending: usize,
    pub exported: Option<ExportReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub identity: Identity,
    pub accumulator_path: PathBuf,
    pub pending: usize,
    pub threshold: usize,
}

pub struct IngestPipeline {
    accumulator: Mutex<Accumulator>,
    identity: Identity,
    layout: Layout,
    threshold: usize,
    batch_guard: BatchGuard,
    sink: Arc<dyn BatchSink>,
}

impl IngestPipeline {
    pub fn new(
        accumulator: Accumulator,
        layout: Layout,
        threshold: usize,
        batch_guard: BatchGuard,
        sink: Arc<dyn BatchSink>,
    ) -> Self {
        Self {
            identity: *accumulator.identity(),
            accumulator: Mutex::new(accumulator),
            layout,
            threshold: threshold.max(1),
            batch_guard,
            sink,
        }
    }

    /// Acquire an accumulator for this process and build the pipeline on it.
    pub fn open(
        config: &IngestorConfig,
        batch_guard: BatchGuard,
        sink: Arc<dyn BatchSink>,
    ) -> IngestResult<Self> {
        let (accumulator, _identity) = Self::coordinator(config).acquire()?;
        Ok(Self::new(
            accumulator,
            config.layout(),
            config.threshold,
            batch_guard,
            sink,
        ))
    }

    /// Like [`IngestPipeline::open`] but only over accumulators already on
    /// disk. `None` means every one of them is held by another instance.
    pub fn open_existing(
        config: &IngestorConfig,
        batch_guard: BatchGuard,
        sink: Arc<dyn BatchSink>,
    ) -> IngestResult<Option<Self>> {
        let found = Self::coordinator(config).acquire_existing()?;
        Ok(found.map(|(accumulator, _identity)| {
            Self::new(
                accumulator,
                config.layout(),
                config.threshold,
                batch_guard,
                sink,
            )
        }))
    }

    fn coordinator(config: &IngestorConfig) -> LockCoordinator {
        LockCoordinator::new(config.layout()).with_sync_on_append(config.sync_on_append)
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Persist one event, exporting when the threshold is reached.
    pub fn ingest(&self, event: &LogEvent) -> IngestResult<IngestReceipt> {
        let receipt = self.ingest_locked(event).inspect_err(|e| {
            error!(
                identity = %self.identity,
                event = %event.summary(),
                "error while appending event: {e}"
            )
        })?;
        if let Some(report) = &receipt.exported {
            self.signal(report);
        }
        Ok(receipt)
    }

    /// Export whatever is pending regardless of the threshold.
    pub fn flush(&self) -> IngestResult<Option<ExportReport>> {
        let report = {
            let mut accumulator = self.accumulator.safe_lock()?;
            self.export(&mut accumulator)?
        };
        if let Some(report) = &report {
            self.signal(report);
        }
        Ok(report)
    }

    /// Authoritative element count from a full re-read of the accumulator.
    pub fn count(&self) -> IngestResult<usize> {
        self.accumulator.safe_lock()?.count()
    }

    pub fn status(&self) -> IngestResult<PipelineStatus> {
        let accumulator = self.accumulator.safe_lock()?;
        Ok(PipelineStatus {
            identity: self.identity,
            accumulator_path: accumulator.path().to_path_buf(),
            pending: accumulator.len(),
            threshold: self.threshold,
        })
    }

    /// Release the accumulator lock. Later ingests fail with `NoActiveLock`.
    pub fn close(&self) -> IngestResult<()> {
        self.accumulator.safe_lock()?.release()
    }

    fn ingest_locked(&self, event: &LogEvent) -> IngestResult<IngestReceipt> {
        let mut accumulator = self.accumulator.safe_lock()?;
        accumulator.append(event)?;
        let exported = if accumulator.len() >= self.threshold {
            self.export(&mut accumulator)?
        } else {
            None
        };
        Ok(IngestReceipt {
            identity: self.identity,
            pending: accumulator.len(),
            exported,
        })
    }

    fn export(&self, accumulator: &mut Accumulator) -> IngestResult<Option<ExportReport>> {
        let _batch = self.batch_guard.safe_lock()?;
        export_and_reset(accumulator, &self.layout)
    }

    fn signal(&self, report: &ExportReport) {
        self.sink.batch_ready(BatchReady {
            identity: report.identity,
            path: report.batch_path.clone(),
        });
    }
}
