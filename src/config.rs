// config.rs
// Purpose: Typed runtime configuration for the ingestor

use crate::errors::{IngestError, IngestResult};
use crate::layout::Layout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_THRESHOLD: usize = 50;
pub const DEFAULT_DELIVERY_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestorConfig {
    /// Directory holding accumulator files.
    pub log_dir: PathBuf,
    /// Directory holding batch files.
    pub batch_dir: PathBuf,
    /// Element count that triggers an export.
    pub threshold: usize,
    /// fsync the accumulator after every append.
    pub sync_on_append: bool,
    pub delivery: DeliveryConfig,
    pub server: ServerConfig,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("log"),
            batch_dir: PathBuf::from("batch"),
            threshold: DEFAULT_THRESHOLD,
            sync_on_append: false,
            delivery: DeliveryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl IngestorConfig {
    pub fn layout(&self) -> Layout {
        Layout::new(&self.log_dir, &self.batch_dir)
    }

    pub fn validate(&self) -> IngestResult<()> {
        if self.threshold == 0 {
            return Err(IngestError::config("threshold must be at least 1"));
        }
        if self.delivery.concurrency == 0 {
            return Err(IngestError::config("delivery.concurrency must be at least 1"));
        }
        if self.log_dir.as_os_str().is_empty() {
            return Err(IngestError::config("log_dir cannot be empty"));
        }
        if self.batch_dir.as_os_str().is_empty() {
            return Err(IngestError::config("batch_dir cannot be empty"));
        }
        if self.log_dir == self.batch_dir {
            return Err(IngestError::config("log_dir and batch_dir must differ"));
        }
        Ok(())
    }
}

/// How exported batch files are handed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Leave batch files for an external consumer.
    Retain,
    /// Log every record and delete the batch file.
    Drain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    pub concurrency: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Drain,
            concurrency: DEFAULT_DELIVERY_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
