//! Logging setup for the binary.

use std::env;
use std::io::IsTerminal;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::{LogFormat, Logging};

/// Installs the global tracing subscriber, writing to stderr.
pub fn init_tracing(logging: &Logging) {
    let (level, env_filter) = parse_rust_log(logging.level);

    let format = match logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let layer = match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Simplified => layer.with_ansi(false).compact().boxed(),
        LogFormat::Pretty | LogFormat::Auto => layer.boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(level))
        .with(env_filter)
        .init();
}

/// Resolves the effective level filter and per-crate directives.
///
/// A `RUST_LOG` that parses as a plain level overrides the configured level. Anything else is used
/// literally as a filter directive.
fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<Level>() {
            Ok(level) => LevelFilter::from(level),
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        rangebench=TRACE,\
        ",
    );

    (level, env_filter)
}
