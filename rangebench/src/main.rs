//! Runs a GET / range-GET workload against an S3-compatible bucket.
//!
//! See the [`rangebench`] library for how the workload behaves and [`rangebench::config`] for all
//! configuration options.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use argh::FromArgs;
use yansi::Paint;

use rangebench::WorkloadManager;
use rangebench::client::S3ClientFactory;
use rangebench::config::Config;
use rangebench::observability::init_tracing;
use rangebench::reporter::StdoutReporter;

/// Load generator for GET and range-GET requests against object storage
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.logging);
    tracing::debug!(?config);

    yansi::whenever(yansi::Condition::TTY_AND_COLOR);

    let run_config = config.run_config();
    println!(
        "{} {} {} {} {} {} {} {:?}",
        "Bucket name:".bold(),
        run_config.bucket,
        "Procs:".bold(),
        run_config.processes,
        "Threads/proc:".bold(),
        run_config.threads,
        "Run time:".bold(),
        run_config.duration,
    );

    let factory = Arc::new(S3ClientFactory::new(config.client_config()));
    let manager = WorkloadManager::new(run_config, factory, Arc::new(StdoutReporter::new()));
    let report = manager.run()?;

    println!(
        "{} ({} keys, {} units)",
        "All workers finished. End of the workload".bold(),
        report.keys,
        report.units.units_started
    );

    Ok(())
}
