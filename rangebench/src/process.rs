//! Worker processes, each running a fixed set of worker units.
//!
//! A process runs on its own OS thread with a dedicated multi-threaded runtime, so processes never
//! compete for the same scheduler. Every unit receives its own client; creating it is retried up
//! to [`CLIENT_CONNECT_ATTEMPTS`] times before the unit is given up. Units that terminate are not
//! replaced.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catalog::KeyCatalog;
use crate::client::{BoxedClient, ClientFactory, SharedFactory};
use crate::generator::RequestGenerator;
use crate::manager::RunConfig;
use crate::reporter::{Reporter, UnitId};
use crate::worker::{UnitContext, UnitExit, WorkerUnit};

/// How often creating a client is attempted before its unit is abandoned.
pub const CLIENT_CONNECT_ATTEMPTS: usize = 10;

/// What happened to the units of a process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Units that received a client and started.
    pub units_started: usize,
    /// Units given up because no client could be created.
    pub units_abandoned: usize,
    /// Units that stopped early after a failed retry.
    pub units_terminated: usize,
    /// Units whose task panicked.
    pub units_crashed: usize,
}

/// A group of worker units sharing one runtime.
#[derive(Debug)]
pub struct WorkerProcess {
    index: usize,
    threads: usize,
    duration: Duration,
    catalog: KeyCatalog,
    generator: RequestGenerator,
    factory: SharedFactory,
    reporter: Arc<dyn Reporter>,
    shutdown: CancellationToken,
}

impl WorkerProcess {
    /// Creates the process with index `index`, running `config.threads` units.
    pub fn new(
        index: usize,
        config: &RunConfig,
        catalog: KeyCatalog,
        generator: RequestGenerator,
        factory: SharedFactory,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            index,
            threads: config.threads,
            duration: config.duration,
            catalog,
            generator,
            factory,
            reporter,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stops the process before its deadline once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Starts the process on a dedicated thread and runtime.
    pub fn spawn(self) -> io::Result<thread::JoinHandle<ProcessReport>> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name(format!("worker-{}", self.index))
            .worker_threads(self.threads.max(1))
            .enable_all()
            .build()?;

        thread::Builder::new()
            .name(format!("process-{}", self.index))
            .spawn(move || runtime.block_on(self.run()))
    }

    /// Runs all units until the deadline or shutdown and waits for them to finish.
    #[tracing::instrument(level = "info", skip_all, fields(process = self.index))]
    pub async fn run(self) -> ProcessReport {
        let mut report = ProcessReport::default();
        let deadline = Instant::now() + self.duration;
        let cancel = self.shutdown.child_token();

        let context = UnitContext {
            catalog: self.catalog,
            generator: self.generator,
            reporter: self.reporter,
            deadline,
            cancel: cancel.clone(),
        };

        let mut units = JoinSet::new();
        for unit in 0..self.threads {
            let id = UnitId {
                process: self.index,
                unit,
            };

            let Some(client) = connect_with_retry(&*self.factory, id).await else {
                report.units_abandoned += 1;
                continue;
            };

            let unit = WorkerUnit::new(id, client, context.clone(), rand::random());
            units.spawn(unit.run());
            report.units_started += 1;
        }

        tracing::info!(
            units = report.units_started,
            abandoned = report.units_abandoned,
            "worker process started"
        );

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = cancel.cancelled() => tracing::info!("worker process shut down before deadline"),
        }
        cancel.cancel();

        while let Some(result) = units.join_next().await {
            match result {
                Ok(UnitExit::Stopped) => {}
                Ok(UnitExit::Terminated) => report.units_terminated += 1,
                Err(error) => {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        "worker unit crashed"
                    );
                    report.units_crashed += 1;
                }
            }
        }

        tracing::info!(
            terminated = report.units_terminated,
            crashed = report.units_crashed,
            "worker process finished"
        );
        report
    }
}

/// Creates a client, retrying up to [`CLIENT_CONNECT_ATTEMPTS`] times.
async fn connect_with_retry(factory: &dyn ClientFactory, unit: UnitId) -> Option<BoxedClient> {
    for attempt in 1..=CLIENT_CONNECT_ATTEMPTS {
        match factory.connect().await {
            Ok(client) => return Some(client),
            Err(error) => tracing::warn!(
                %unit,
                attempt,
                error = &error as &dyn std::error::Error,
                "unable to create client"
            ),
        }
    }

    tracing::warn!(
        %unit,
        "abandoning worker unit after {CLIENT_CONNECT_ATTEMPTS} failed client creations"
    );
    None
}
