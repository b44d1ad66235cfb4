//! Configuration for rangebench.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `RB__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `RB__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `RB__BUCKET=bench-data` sets the bucket to read from
//! - `RB__RANGE__ENABLED=true` enables range reads
//! - `RB__TARGET__TYPE=gateway` reads through a gateway instead of the store
//!
//! # YAML Configuration File
//!
//! ```yaml
//! bucket: bench-data
//! processes: 8
//! threads: 4
//! duration: 5m
//!
//! range:
//!   enabled: true
//!   length: 1 MiB
//!   random: true
//!
//! target:
//!   type: gateway
//!   endpoint: http://localhost:9000
//! ```

use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::thread::available_parallelism;
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::client::S3ClientConfig;
use crate::generator::{RangeSpec, SizeSource};
use crate::manager::RunConfig;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "RB__";

/// The secret access key of the storage service.
///
/// Only ever held inside a [`SecretBox`], and printed as `SecretKey(***)` in debug output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    /// The key as passed to request signing.
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

impl Zeroize for SecretKey {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl CloneableSecret for SecretKey {}
impl SerializableSecret for SecretKey {}

/// The service requests are sent to.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    /// The object store itself (type `"s3"`).
    ///
    /// Without static keys, credentials are resolved from `AWS_ACCESS_KEY_ID` /
    /// `AWS_SECRET_ACCESS_KEY`, the shared profile, or instance metadata.
    ///
    /// ```yaml
    /// target:
    ///   type: s3
    ///   region: eu-west-1
    /// ```
    S3 {
        /// Region of the bucket.
        ///
        /// # Environment Variable
        ///
        /// `RB__TARGET__REGION`
        region: String,

        /// Custom endpoint, for example of an S3-compatible store.
        ///
        /// # Default
        ///
        /// `None` (the AWS endpoint of `region`)
        endpoint: Option<String>,

        /// Static access key id.
        ///
        /// # Environment Variable
        ///
        /// `RB__TARGET__ACCESS_KEY`
        access_key: Option<String>,

        /// Static secret access key.
        ///
        /// # Environment Variable
        ///
        /// `RB__TARGET__SECRET_KEY`
        secret_key: Option<SecretBox<SecretKey>>,
    },

    /// An S3-compatible gateway in front of the store (type `"gateway"`).
    ///
    /// Requests use path-style addressing. Credentials are resolved from the environment.
    ///
    /// ```yaml
    /// target:
    ///   type: gateway
    ///   endpoint: http://gateway.local:9000
    /// ```
    Gateway {
        /// Gateway URL.
        ///
        /// # Environment Variable
        ///
        /// `RB__TARGET__ENDPOINT`
        endpoint: String,

        /// Region used for request signing.
        ///
        /// # Default
        ///
        /// `us-east-1`
        #[serde(default = "default_region")]
        region: String,
    },
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

/// Range read configuration.
///
/// Used in: [`Config::range`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Range {
    /// Read byte ranges instead of whole objects.
    ///
    /// # Default
    ///
    /// `false`
    ///
    /// # Environment Variable
    ///
    /// `RB__RANGE__ENABLED`
    pub enabled: bool,

    /// Number of bytes per range read.
    ///
    /// Without [`random`](Self::random) offsets, every request reads `bytes=0-<length>`.
    ///
    /// # Default
    ///
    /// `1 MiB`
    ///
    /// # Environment Variable
    ///
    /// `RB__RANGE__LENGTH`
    pub length: ByteSize,

    /// Read at uniformly random offsets instead of the head of the object.
    ///
    /// # Default
    ///
    /// `false`
    ///
    /// # Environment Variable
    ///
    /// `RB__RANGE__RANDOM`
    pub random: bool,

    /// Which object size random offsets are computed against.
    ///
    /// `representative` applies the size of the first listed object to every key, `per_key` uses
    /// the size of the selected key.
    ///
    /// # Default
    ///
    /// `representative`
    ///
    /// # Environment Variable
    ///
    /// `RB__RANGE__OBJECT_SIZE`
    pub object_size: SizeSource,
}

impl Default for Range {
    fn default() -> Self {
        Self {
            enabled: false,
            length: ByteSize::mib(1),
            random: false,
            object_size: SizeSource::Representative,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// Reads and writes a [`LevelFilter`] by its name, such as `"debug"` or `"off"`.
mod level_name {
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::level_filters::LevelFilter;

    pub fn serialize<S: Serializer>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(level)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LevelFilter, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, keeping stdout for report lines.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `RB__LOGGING__LEVEL`
    #[serde(with = "level_name")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `RB__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct.
///
/// See individual field documentation for defaults and environment variables.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// The bucket to read from. Required.
    ///
    /// # Environment Variable
    ///
    /// `RB__BUCKET`
    pub bucket: String,

    /// Only objects below this prefix are listed and read.
    ///
    /// # Default
    ///
    /// `""` (the whole bucket)
    ///
    /// # Environment Variable
    ///
    /// `RB__PREFIX`
    pub prefix: String,

    /// Number of worker processes.
    ///
    /// # Default
    ///
    /// The number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `RB__PROCESSES`
    pub processes: usize,

    /// Number of concurrent worker units per process.
    ///
    /// # Default
    ///
    /// `1`
    ///
    /// # Environment Variable
    ///
    /// `RB__THREADS`
    pub threads: usize,

    /// How long requests are issued.
    ///
    /// # Default
    ///
    /// `60s`
    ///
    /// # Environment Variable
    ///
    /// `RB__DURATION`
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Range read configuration. See [`Range`].
    pub range: Range,

    /// The service to send requests to. See [`Target`].
    pub target: Target,

    /// Timeout the storage client applies to each request.
    ///
    /// # Default
    ///
    /// `None` (requests may block indefinitely)
    ///
    /// # Environment Variable
    ///
    /// `RB__REQUEST_TIMEOUT`
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Logging configuration. See [`Logging`].
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            processes: available_parallelism().map_or(1, NonZeroUsize::get),
            threads: 1,
            duration: Duration::from_secs(60),
            range: Range::default(),
            target: Target::S3 {
                region: default_region(),
                endpoint: None,
                access_key: None,
                secret_key: None,
            },
            request_timeout: None,
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment.
    ///
    /// Later sources override earlier ones.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// The parameters of the workload.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            processes: self.processes,
            threads: self.threads,
            duration: self.duration,
            range: self.range.enabled.then_some(RangeSpec {
                length: self.range.length.as_u64(),
                random_offset: self.range.random,
            }),
            size_source: self.range.object_size,
        }
    }

    /// The settings for the storage clients.
    pub fn client_config(&self) -> S3ClientConfig {
        let mut config = S3ClientConfig {
            bucket: self.bucket.clone(),
            request_timeout: self.request_timeout,
            ..Default::default()
        };

        match &self.target {
            Target::S3 {
                region,
                endpoint,
                access_key,
                secret_key,
            } => {
                config.region = region.clone();
                config.endpoint = endpoint.clone();
                config.path_style = endpoint.is_some();
                config.access_key = access_key.clone();
                config.secret_key = secret_key
                    .as_ref()
                    .map(|secret| secret.expose_secret().reveal().to_owned());
            }
            Target::Gateway { endpoint, region } => {
                config.region = region.clone();
                config.endpoint = Some(endpoint.clone());
                config.path_style = true;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.threads, 1);
            assert_eq!(config.duration, Duration::from_secs(60));
            assert!(config.processes >= 1);
            assert!(!config.range.enabled);
            assert_eq!(config.range.length, ByteSize::mib(1));
            assert_eq!(config.range.object_size, SizeSource::Representative);
            assert_eq!(config.request_timeout, None);
            assert!(matches!(config.target, Target::S3 { .. }));

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RB__BUCKET", "bench");
            jail.set_env("RB__PROCESSES", "2");
            jail.set_env("RB__THREADS", "3");
            jail.set_env("RB__DURATION", "5s");
            jail.set_env("RB__RANGE__ENABLED", "true");
            jail.set_env("RB__RANGE__LENGTH", "4096");
            jail.set_env("RB__RANGE__RANDOM", "true");
            jail.set_env("RB__RANGE__OBJECT_SIZE", "per_key");
            jail.set_env("RB__TARGET__TYPE", "s3");
            jail.set_env("RB__TARGET__REGION", "eu-west-1");
            jail.set_env("RB__TARGET__ACCESS_KEY", "AKIA");
            jail.set_env("RB__TARGET__SECRET_KEY", "hunter2");
            jail.set_env("RB__LOGGING__LEVEL", "debug");
            jail.set_env("RB__LOGGING__FORMAT", "json");

            let config = Config::load(None).unwrap();
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);

            let Target::S3 {
                region,
                access_key,
                secret_key,
                ..
            } = &dbg!(&config).target
            else {
                panic!("expected s3 target");
            };
            assert_eq!(region, "eu-west-1");
            assert_eq!(access_key.as_deref(), Some("AKIA"));
            assert_eq!(
                secret_key.as_ref().unwrap().expose_secret().reveal(),
                "hunter2"
            );

            let run = config.run_config();
            assert_eq!(run.bucket, "bench");
            assert_eq!(run.processes, 2);
            assert_eq!(run.threads, 3);
            assert_eq!(run.duration, Duration::from_secs(5));
            assert_eq!(
                run.range,
                Some(RangeSpec {
                    length: 4096,
                    random_offset: true
                })
            );
            assert_eq!(run.size_source, SizeSource::PerKey);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            bucket: bench
            duration: 2m
            request_timeout: 30s
            range:
                enabled: true
                length: 2 MiB
            target:
                type: gateway
                endpoint: http://localhost:9000
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            let Target::Gateway { endpoint, region } = &dbg!(&config).target else {
                panic!("expected gateway target");
            };
            assert_eq!(endpoint, "http://localhost:9000");
            assert_eq!(region, "us-east-1");
            assert_eq!(config.duration, Duration::from_secs(120));
            assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));

            let run = config.run_config();
            assert_eq!(
                run.range,
                Some(RangeSpec {
                    length: 2 * 1024 * 1024,
                    random_offset: false
                })
            );

            let client = config.client_config();
            assert_eq!(client.bucket, "bench");
            assert_eq!(client.endpoint.as_deref(), Some("http://localhost:9000"));
            assert!(client.path_style);
            assert_eq!(client.request_timeout, Some(Duration::from_secs(30)));

            Ok(())
        });
    }

    #[test]
    fn configured_with_env_and_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            bucket: from-yaml
            threads: 4
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("RB__BUCKET", "from-env");

            let config = Config::load(Some(tempfile.path())).unwrap();

            // Env should overwrite the yaml config
            assert_eq!(config.bucket, "from-env");
            assert_eq!(config.threads, 4);

            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_log_level() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RB__LOGGING__LEVEL", "chatty");

            assert!(Config::load(None).is_err());

            Ok(())
        });
    }

    #[test]
    fn secret_key_is_redacted() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RB__TARGET__SECRET_KEY", "hunter2");

            let config = Config::load(None).unwrap();
            assert!(!format!("{config:?}").contains("hunter2"));
            assert_eq!(config.client_config().secret_key.as_deref(), Some("hunter2"));

            Ok(())
        });
    }
}
