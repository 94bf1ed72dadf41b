//! Library root for the `telemetry_ingestor` crate
//!
//! Events are appended to a JSON-array accumulator file this process holds an
//! exclusive lock on. When the accumulator reaches the configured threshold
//! its records move into a per-identity batch file and the accumulator is
//! reset.

// Core error handling
pub mod errors;

// Record and file layout
pub mod layout;
pub mod log_event;

// Locked accumulator, export and ingest
pub mod accumulator;
pub mod coordinator;
pub mod exporter;
pub mod pipeline;

// Outbound delivery of batch files
pub mod delivery;

// Configuration & CLI
pub mod cli;
pub mod config;
pub mod config_loader;

// Web server interface
pub mod api_errors;
pub mod app_state;
pub mod web;

#[cfg(test)]
mod tests {
    pub mod accumulator;
    pub mod coordinator;
    pub mod test_utils;
}

pub use accumulator::Accumulator;
pub use coordinator::LockCoordinator;
pub use errors::{IngestError, IngestResult};
pub use layout::{Identity, Layout};
pub use log_event::LogEvent;
pub use pipeline::{IngestPipeline, IngestReceipt};
