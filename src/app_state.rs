use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::pipeline::IngestPipeline;

/// Shared state handed to every HTTP handler.
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<IngestPipeline>) -> Self {
        Self {
            pipeline,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
