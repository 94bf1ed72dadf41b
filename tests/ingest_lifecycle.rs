//! End-to-end behaviour of the accumulator across exports, restarts and
//! competing instances.

use serde_json::Value;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use telemetry_ingestor::config::{DeliveryConfig, DeliveryMode, IngestorConfig};
use telemetry_ingestor::delivery::{BatchGuard, Delivery, RetainSink};
use telemetry_ingestor::{IngestPipeline, Layout, LockCoordinator, LogEvent};

fn config_in(dir: &TempDir, threshold: usize, mode: DeliveryMode) -> IngestorConfig {
    IngestorConfig {
        log_dir: dir.path().join("log"),
        batch_dir: dir.path().join("batch"),
        threshold,
        delivery: DeliveryConfig {
            mode,
            concurrency: 2,
        },
        ..IngestorConfig::default()
    }
}

fn event(i: usize) -> LogEvent {
    LogEvent::new(format!("event-{i}")).with_span(format!("span-{i}"))
}

fn batch_messages(path: &std::path::Path) -> Vec<String> {
    let batch: Vec<Value> = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
    batch
        .iter()
        .map(|e| e["message"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn exports_accumulate_in_one_batch_file_in_order() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir, 4, DeliveryMode::Retain);
    let pipeline =
        IngestPipeline::open(&config, Arc::new(Mutex::new(())), Arc::new(RetainSink)).unwrap();

    for i in 0..9 {
        pipeline.ingest(&event(i)).unwrap();
    }

    let batch = config.layout().batch_path(&pipeline.identity());
    let expected: Vec<String> = (0..8).map(|i| format!("event-{i}")).collect();
    assert_eq!(batch_messages(&batch), expected);
    assert_eq!(pipeline.count().unwrap(), 1);
}

#[test]
fn restart_resumes_the_same_identity() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir, 3, DeliveryMode::Retain);

    let identity = {
        let pipeline =
            IngestPipeline::open(&config, Arc::new(Mutex::new(())), Arc::new(RetainSink)).unwrap();
        for i in 0..5 {
            pipeline.ingest(&event(i)).unwrap();
        }
        pipeline.identity()
    };

    let pipeline =
        IngestPipeline::open(&config, Arc::new(Mutex::new(())), Arc::new(RetainSink)).unwrap();
    assert_eq!(pipeline.identity(), identity);
    assert_eq!(pipeline.status().unwrap().pending, 2);

    let receipt = pipeline.ingest(&event(5)).unwrap();
    assert_eq!(receipt.exported.unwrap().exported, 3);

    let expected: Vec<String> = (0..6).map(|i| format!("event-{i}")).collect();
    assert_eq!(
        batch_messages(&config.layout().batch_path(&identity)),
        expected
    );
}

#[test]
fn flush_only_opens_accumulators_already_on_disk() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir, 50, DeliveryMode::Retain);
    let open_existing = || {
        IngestPipeline::open_existing(&config, Arc::new(Mutex::new(())), Arc::new(RetainSink))
            .unwrap()
    };

    assert!(open_existing().is_none());

    let server =
        IngestPipeline::open(&config, Arc::new(Mutex::new(())), Arc::new(RetainSink)).unwrap();
    server.ingest(&event(0)).unwrap();
    assert!(open_existing().is_none());
    assert_eq!(config.layout().accumulator_candidates().unwrap().len(), 1);

    let identity = server.identity();
    drop(server);
    let flusher = open_existing().unwrap();
    assert_eq!(flusher.identity(), identity);
    assert_eq!(flusher.flush().unwrap().unwrap().exported, 1);
}

#[test]
fn concurrent_instances_get_distinct_accumulators() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::new(dir.path().join("log"), dir.path().join("batch"));
    let coordinator = LockCoordinator::new(layout.clone());

    {
        let (_seed, _) = coordinator.acquire().unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = coordinator.clone();
            std::thread::spawn(move || coordinator.acquire().unwrap())
        })
        .collect();
    let held: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut identities: Vec<_> = held.iter().map(|(_, id)| *id).collect();
    identities.sort_by_key(|id| *id.as_uuid());
    identities.dedup();
    assert_eq!(identities.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drain_delivery_removes_exported_batches() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir, 2, DeliveryMode::Drain);
    let guard: BatchGuard = Arc::new(Mutex::new(()));
    let delivery = Arc::new(Delivery::from_config(
        &config.delivery,
        config.layout(),
        guard.clone(),
        tokio::runtime::Handle::current(),
    ));
    let pipeline = Arc::new(IngestPipeline::open(&config, guard, delivery.clone()).unwrap());

    let worker = pipeline.clone();
    tokio::task::spawn_blocking(move || {
        for i in 0..6 {
            worker.ingest(&event(i)).unwrap();
        }
    })
    .await
    .unwrap();
    delivery.wait_idle().await;

    assert!(!config.layout().batch_path(&pipeline.identity()).exists());
    let leftovers = fs::read_dir(config.layout().batch_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
    assert_eq!(pipeline.count().unwrap(), 0);
}
