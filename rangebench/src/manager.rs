//! Top-level orchestration of a run.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::catalog::KeyCatalog;
use crate::client::SharedFactory;
use crate::error::{Error, Result};
use crate::generator::{RangeSpec, RequestGenerator, SizeSource};
use crate::process::{ProcessReport, WorkerProcess};
use crate::reporter::Reporter;

/// Immutable parameters of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    /// The bucket to read from.
    pub bucket: String,
    /// Only objects below this prefix are read.
    pub prefix: String,
    /// Number of worker processes.
    pub processes: usize,
    /// Number of worker units per process.
    pub threads: usize,
    /// How long units keep issuing requests.
    pub duration: Duration,
    /// Range reads, or `None` to read whole objects.
    pub range: Option<RangeSpec>,
    /// Where the object size for range arithmetic comes from.
    pub size_source: SizeSource,
}

impl RunConfig {
    /// Creates a configuration with one process running one unit for 60 seconds.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            processes: 1,
            threads: 1,
            duration: Duration::from_secs(60),
            range: None,
            size_source: SizeSource::Representative,
        }
    }

    /// Checks for values the workload cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::InvalidConfig("bucket must not be empty".into()));
        }
        if self.processes == 0 {
            return Err(Error::InvalidConfig("processes must be at least 1".into()));
        }
        if self.threads == 0 {
            return Err(Error::InvalidConfig("threads must be at least 1".into()));
        }
        // The S3 client rejects single-byte ranges.
        if let Some(range) = self.range
            && range.length < 2
        {
            return Err(Error::InvalidConfig(
                "range length must be at least 2 bytes".into(),
            ));
        }
        Ok(())
    }
}

/// What happened during a run.
///
/// This only counts processes and units. Request latencies are reported line by line and never
/// aggregated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Number of entries in the key catalog.
    pub keys: usize,
    /// Processes that were started.
    pub processes_started: usize,
    /// Processes that panicked.
    pub processes_crashed: usize,
    /// Unit counts summed over all processes that finished.
    pub units: ProcessReport,
    /// Wall time from starting the first process until the last one was joined.
    pub elapsed: Duration,
}

/// Loads the key catalog and runs the worker processes.
#[derive(Debug)]
pub struct WorkloadManager {
    config: Arc<RunConfig>,
    factory: SharedFactory,
    reporter: Arc<dyn Reporter>,
}

impl WorkloadManager {
    /// Creates a manager.
    pub fn new(config: RunConfig, factory: SharedFactory, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            reporter,
        }
    }

    /// Executes the run and blocks until all processes have finished.
    ///
    /// Fails before any worker is started if the configuration is invalid, the catalog is empty or
    /// cannot be loaded, or random ranges do not fit into the assumed object size. Once processes
    /// run, failures are contained in the units and processes that hit them.
    pub fn run(&self) -> Result<RunReport> {
        self.config.validate()?;

        let catalog = self.load_catalog()?;
        let generator = self.generator(&catalog)?;

        tracing::info!(
            processes = self.config.processes,
            threads = self.config.threads,
            duration = ?self.config.duration,
            "starting worker processes"
        );

        let start = Instant::now();
        let shutdown = CancellationToken::new();
        let handles = self.start_processes(&catalog, generator, &shutdown, WorkerProcess::spawn)?;

        let mut report = RunReport {
            keys: catalog.len(),
            processes_started: handles.len(),
            ..Default::default()
        };

        for (index, handle) in handles {
            match handle.join() {
                Ok(units) => {
                    report.units.units_started += units.units_started;
                    report.units.units_abandoned += units.units_abandoned;
                    report.units.units_terminated += units.units_terminated;
                    report.units.units_crashed += units.units_crashed;
                }
                Err(_) => {
                    tracing::error!(process = index, "worker process crashed");
                    report.processes_crashed += 1;
                }
            }
        }
        report.elapsed = start.elapsed();

        tracing::info!(
            units = report.units.units_started,
            abandoned = report.units.units_abandoned,
            terminated = report.units.units_terminated,
            crashed_processes = report.processes_crashed,
            "all worker processes finished"
        );
        Ok(report)
    }

    /// Starts all processes through `spawn`.
    ///
    /// If a process cannot be started, the ones already running are shut down and joined before
    /// the error is returned.
    fn start_processes<F>(
        &self,
        catalog: &KeyCatalog,
        generator: RequestGenerator,
        shutdown: &CancellationToken,
        mut spawn: F,
    ) -> Result<Vec<(usize, JoinHandle<ProcessReport>)>>
    where
        F: FnMut(WorkerProcess) -> io::Result<JoinHandle<ProcessReport>>,
    {
        let mut handles = Vec::with_capacity(self.config.processes);
        for index in 0..self.config.processes {
            let process = WorkerProcess::new(
                index,
                &self.config,
                catalog.clone(),
                generator,
                Arc::clone(&self.factory),
                Arc::clone(&self.reporter),
            )
            .with_shutdown(shutdown.clone());

            match spawn(process) {
                Ok(handle) => handles.push((index, handle)),
                Err(error) => {
                    tracing::error!(
                        process = index,
                        error = &error as &dyn std::error::Error,
                        "failed to start worker process, shutting down the run"
                    );
                    shutdown.cancel();
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    return Err(error.into());
                }
            }
        }

        Ok(handles)
    }

    fn load_catalog(&self) -> Result<KeyCatalog> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async {
            let client = self.factory.connect().await.map_err(Error::Connect)?;
            let catalog =
                KeyCatalog::load(&*client, &self.config.bucket, &self.config.prefix).await?;

            tracing::info!(keys = catalog.len(), bucket = %self.config.bucket, "loaded key catalog");
            Ok::<_, Error>(catalog)
        })
    }

    fn generator(&self, catalog: &KeyCatalog) -> Result<RequestGenerator> {
        let assumed_size = catalog.first().size;

        if let Some(range) = self.config.range
            && self.config.size_source == SizeSource::Representative
            && !range.fits(assumed_size)
        {
            return Err(Error::RangeExceedsObject {
                length: range.length,
                size: assumed_size,
            });
        }

        Ok(RequestGenerator::new(
            self.config.range,
            self.config.size_source,
            assumed_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::ObjectKey;
    use crate::client::{InMemoryClient, InMemoryFactory};
    use crate::reporter::MemoryReporter;

    use super::*;

    fn manager(config: RunConfig, client: InMemoryClient) -> WorkloadManager {
        WorkloadManager::new(
            config,
            Arc::new(InMemoryFactory::new(client)),
            Arc::new(MemoryReporter::new()),
        )
    }

    #[test]
    fn rejects_invalid_config() {
        let client = InMemoryClient::new().with_object("a", 10);

        let config = RunConfig {
            threads: 0,
            ..RunConfig::new("bench")
        };
        assert!(matches!(
            manager(config, client.clone()).run(),
            Err(Error::InvalidConfig(_))
        ));

        assert!(matches!(
            manager(RunConfig::new(""), client).run(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn random_range_must_fit_representative_size() {
        let client = InMemoryClient::new().with_object("a", 1000).with_object("b", 1_000_000);
        let config = RunConfig {
            range: Some(RangeSpec {
                length: 1000,
                random_offset: true,
            }),
            ..RunConfig::new("bench")
        };

        let result = manager(config, client).run();
        assert!(matches!(
            result,
            Err(Error::RangeExceedsObject {
                length: 1000,
                size: 1000
            })
        ));
    }

    #[test]
    fn per_key_sizing_skips_representative_check() {
        let client = InMemoryClient::new()
            .with_object("a", 1000)
            .with_latency(Duration::from_millis(1));
        let config = RunConfig {
            duration: Duration::from_millis(50),
            range: Some(RangeSpec {
                length: 1000,
                random_offset: true,
            }),
            size_source: SizeSource::PerKey,
            ..RunConfig::new("bench")
        };

        let report = manager(config, client).run().unwrap();
        assert_eq!(report.units.units_started, 1);
    }

    #[test]
    fn failed_process_start_shuts_down_started_processes() {
        let client = InMemoryClient::new()
            .with_object("a", 10)
            .with_latency(Duration::from_millis(1));
        let reporter = Arc::new(MemoryReporter::new());
        let config = RunConfig {
            processes: 3,
            duration: Duration::from_secs(60),
            ..RunConfig::new("bench")
        };
        let manager = WorkloadManager::new(
            config,
            Arc::new(InMemoryFactory::new(client)),
            reporter.clone(),
        );
        let catalog = KeyCatalog::from_entries(vec![ObjectKey::new("a", 10)]).unwrap();
        let generator = manager.generator(&catalog).unwrap();
        let shutdown = CancellationToken::new();

        let mut spawned = 0;
        let start = Instant::now();
        let result = manager.start_processes(&catalog, generator, &shutdown, |process| {
            spawned += 1;
            if spawned == 2 {
                return Err(io::Error::other("thread limit reached"));
            }
            process.spawn()
        });

        assert!(matches!(result, Err(Error::Runtime(_))));
        assert!(shutdown.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(30));

        // the started process was joined, so nothing reports anymore
        let reported = reporter.records().len();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(reporter.records().len(), reported);
    }

    #[test]
    fn listing_client_failure_is_fatal() {
        let factory = InMemoryFactory::new(InMemoryClient::new().with_object("a", 10))
            .fail_connects(1);
        let manager = WorkloadManager::new(
            RunConfig::new("bench"),
            Arc::new(factory),
            Arc::new(MemoryReporter::new()),
        );

        assert!(matches!(manager.run(), Err(Error::Connect(_))));
    }
}
