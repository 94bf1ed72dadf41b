// src/tests/test_utils.rs
// Shared fixtures for the crate's unit tests

use crate::delivery::{BatchReady, BatchSink};
use crate::layout::Layout;
use crate::log_event::LogEvent;
use std::sync::Mutex;
use tempfile::TempDir;

/// Temporary log/batch directories that live as long as the value.
pub struct TestDirs {
    pub root: TempDir,
    pub layout: Layout,
}

impl TestDirs {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        let layout = Layout::new(root.path().join("log"), root.path().join("batch"));
        Self { root, layout }
    }
}

pub fn sample_event(i: usize) -> LogEvent {
    LogEvent::new(format!("event {i}"))
        .with_timestamp(format!("2024-01-01T00:00:{:02}Z", i % 60))
        .with_application("checkout")
        .with_correlation_id(format!("corr-{i}"))
}

/// Sink that remembers every signal it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub signals: Mutex<Vec<BatchReady>>,
}

impl RecordingSink {
    pub fn taken(&self) -> Vec<BatchReady> {
        self.signals.lock().unwrap().clone()
    }
}

impl BatchSink for RecordingSink {
    fn batch_ready(&self, batch: BatchReady) {
        self.signals.lock().unwrap().push(batch);
    }
}
