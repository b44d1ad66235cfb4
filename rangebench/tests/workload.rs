use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rangebench::client::{InMemoryClient, InMemoryFactory};
use rangebench::generator::RangeSpec;
use rangebench::reporter::{MemoryReporter, Outcome, UnitId};
use rangebench::{Error, RunConfig, WorkloadManager};

const MIB: u64 = 1024 * 1024;

fn catalog_client() -> InMemoryClient {
    InMemoryClient::new()
        .with_object("a", 2_000_000)
        .with_object("b", 500)
        .with_latency(Duration::from_millis(1))
}

fn run_config(processes: usize, threads: usize, duration: Duration) -> RunConfig {
    RunConfig {
        processes,
        threads,
        duration,
        ..RunConfig::new("bench")
    }
}

fn units(processes: usize, threads: usize) -> impl Iterator<Item = UnitId> {
    (0..processes).flat_map(move |process| (0..threads).map(move |unit| UnitId { process, unit }))
}

#[test]
fn empty_catalog_starts_no_workers() {
    let factory = Arc::new(InMemoryFactory::new(InMemoryClient::new()));
    let reporter = Arc::new(MemoryReporter::new());
    let manager = WorkloadManager::new(
        run_config(2, 3, Duration::from_secs(5)),
        factory.clone(),
        reporter.clone(),
    );

    let start = Instant::now();
    let result = manager.run();

    assert!(matches!(result, Err(Error::ListingEmpty { .. })));
    // only the listing client was ever created
    assert_eq!(factory.connect_attempts(), 1);
    assert!(reporter.records().is_empty());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn runs_processes_times_threads_units_until_deadline() {
    let client = catalog_client();
    let reporter = Arc::new(MemoryReporter::new());
    let duration = Duration::from_secs(1);
    let manager = WorkloadManager::new(
        run_config(2, 3, duration),
        Arc::new(InMemoryFactory::new(client)),
        reporter.clone(),
    );

    let start = Instant::now();
    let report = manager.run().unwrap();

    assert!(start.elapsed() >= duration);
    assert_eq!(report.keys, 2);
    assert_eq!(report.processes_started, 2);
    assert_eq!(report.processes_crashed, 0);
    assert_eq!(report.units.units_started, 6);
    assert_eq!(report.units.units_abandoned, 0);
    assert_eq!(report.units.units_terminated, 0);

    for unit in units(2, 3) {
        let records = reporter.records_of(unit);
        assert!(records.len() > 1, "unit {unit} reported {} lines", records.len());
        assert!(records.iter().all(|r| r.outcome == Outcome::Success));
    }
}

#[test]
fn sequential_ranges_read_the_head_of_every_key() {
    let client = catalog_client();
    let config = RunConfig {
        range: Some(RangeSpec {
            length: MIB,
            random_offset: false,
        }),
        ..run_config(1, 2, Duration::from_millis(300))
    };
    let manager = WorkloadManager::new(
        config,
        Arc::new(InMemoryFactory::new(client.clone())),
        Arc::new(MemoryReporter::new()),
    );

    manager.run().unwrap();

    let requests = client.requests();
    assert!(!requests.is_empty());
    for request in &requests {
        assert_eq!(request.range.unwrap().to_string(), "bytes=0-1048576");
    }
    let keys: HashSet<_> = requests.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, HashSet::from(["a", "b"]));
}

#[test]
fn random_ranges_stay_within_representative_size() {
    let client = InMemoryClient::new()
        .with_object("a", 2_000_000)
        .with_object("b", 3_000_000)
        .with_latency(Duration::from_millis(1));
    let config = RunConfig {
        range: Some(RangeSpec {
            length: MIB,
            random_offset: true,
        }),
        ..run_config(1, 2, Duration::from_millis(300))
    };
    let manager = WorkloadManager::new(
        config,
        Arc::new(InMemoryFactory::new(client.clone())),
        Arc::new(MemoryReporter::new()),
    );

    manager.run().unwrap();

    let requests = client.requests();
    assert!(!requests.is_empty());
    for request in &requests {
        let range = request.range.unwrap();
        assert!(range.end < 2_000_000);
        assert_eq!(range.end - range.start + 1, MIB);
    }
}

#[test]
fn failing_storage_terminates_every_unit_after_one_retry() {
    let client = catalog_client().fail_always();
    let reporter = Arc::new(MemoryReporter::new());
    let duration = Duration::from_millis(500);
    let manager = WorkloadManager::new(
        run_config(2, 3, duration),
        Arc::new(InMemoryFactory::new(client.clone())),
        reporter.clone(),
    );

    let start = Instant::now();
    let report = manager.run().unwrap();

    // processes keep running until the deadline even without any active unit
    assert!(start.elapsed() >= duration);
    assert_eq!(report.units.units_started, 6);
    assert_eq!(report.units.units_terminated, 6);

    for unit in units(2, 3) {
        let outcomes: Vec<_> = reporter
            .records_of(unit)
            .iter()
            .map(|r| r.outcome)
            .collect();
        assert_eq!(outcomes, [Outcome::Failure, Outcome::RetryFailure]);
    }
    assert_eq!(client.requests().len(), 12);
}

#[test]
fn transient_failures_are_retried_once() {
    let client = catalog_client().fail_first(1);
    let reporter = Arc::new(MemoryReporter::new());
    let manager = WorkloadManager::new(
        run_config(1, 1, Duration::from_millis(200)),
        Arc::new(InMemoryFactory::new(client)),
        reporter.clone(),
    );

    let report = manager.run().unwrap();

    assert_eq!(report.units.units_terminated, 0);
    let outcomes: Vec<_> = reporter.records().iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes[..2], [Outcome::Failure, Outcome::RetrySuccess]);
    assert!(outcomes[2..].iter().all(|o| *o == Outcome::Success));
}
