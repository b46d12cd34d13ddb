//! Configuration for the load tester.
//!
//! Configuration is loaded from the following sources, with later sources overriding earlier ones:
//!
//! 1. Defaults
//! 2. YAML configuration file (specified via `-c` or `--config`)
//! 3. Environment variables (prefixed with `LOADTEST__`)
//! 4. Command line flags of the `run` command
//!
//! Environment variables use double underscores (`__`) to denote nested structures, for example
//! `LOADTEST__REMOTE=http://electric:3000` or `LOADTEST__LOGGING__LEVEL=debug`.
//!
//! ```yaml
//! remote: http://localhost:3000
//! duration: 1m
//! output_dir: results
//!
//! workloads:
//!   - name: sync
//!     mode: sync
//!     users: 100
//!     spawn_rate: 10
//!     shape_size: 100
//!     num_rows: 100000
//!
//!   - name: live
//!     mode: live
//!     users: 500
//!     spawn_rate: 50
//!     shape_size: 10
//!     num_shapes: 1000
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use shapesync_types::UpperBound;
use tracing::level_filters::LevelFilter;

use crate::workload::{Workload, WorkloadError};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "LOADTEST__";

/// Top-level load test configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the shape API, without the `/v1/shape` path.
    pub remote: String,

    /// How long the workloads run.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Directory to write JSON reports to. Nothing is written if unset.
    pub output_dir: Option<PathBuf>,

    /// Log verbosity and format.
    pub logging: Logging,

    /// Workloads to run concurrently.
    pub workloads: Vec<WorkloadConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: "http://localhost:3000".to_owned(),
            duration: Duration::from_secs(60),
            output_dir: None,
            logging: Logging::default(),
            workloads: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, the optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("failed to load configuration")?;

        Ok(config)
    }

    /// Builds the configured workloads.
    ///
    /// If `only` is non-empty, only workloads with one of the given names are built. Workload
    /// names must be unique, since they name the report files.
    pub fn build_workloads(&self, only: &[String]) -> Result<Vec<Workload>> {
        let mut names = HashSet::new();
        for workload in &self.workloads {
            if !names.insert(workload.name.as_str()) {
                bail!("duplicate workload name `{}`", workload.name);
            }
        }

        self.workloads
            .iter()
            .filter(|w| only.is_empty() || only.contains(&w.name))
            .map(|w| w.build().with_context(|| format!("invalid workload `{}`", w.name)))
            .collect()
    }
}

/// Configuration of a single workload.
#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadConfig {
    /// Name of the workload in output and report file names.
    pub name: String,

    /// Table the shapes are defined on.
    #[serde(default = "default_table")]
    pub table: String,

    /// Number of simulated users.
    pub users: usize,

    /// Users started per second during ramp-up.
    #[serde(default = "default_spawn_rate")]
    pub spawn_rate: f64,

    /// Minimum time between the starts of two consecutive iterations of a user.
    #[serde(default = "default_pacing", with = "humantime_serde")]
    pub pacing: Duration,

    /// Number of rows per shape.
    pub shape_size: u64,

    /// Sync or live mode with its identifier space.
    #[serde(flatten)]
    pub mode: ModeConfig,

    /// Overrides whether filters include their upper identifier.
    #[serde(default)]
    pub upper_bound: Option<UpperBound>,

    /// Seed for reproducible shape selection.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl WorkloadConfig {
    /// Builds the runtime workload.
    pub fn build(&self) -> Result<Workload, WorkloadError> {
        let mut builder = Workload::builder(&self.name)
            .table(&self.table)
            .users(self.users)
            .spawn_rate(self.spawn_rate)
            .pacing(self.pacing);

        builder = match self.mode {
            ModeConfig::Sync { num_rows } => builder.sync(self.shape_size, num_rows),
            ModeConfig::Live { num_shapes } => builder.live(self.shape_size, num_shapes),
        };
        if let Some(upper_bound) = self.upper_bound {
            builder = builder.upper_bound(upper_bound);
        }
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }

        builder.build()
    }
}

fn default_table() -> String {
    "issue".to_owned()
}

fn default_spawn_rate() -> f64 {
    1.0
}

fn default_pacing() -> Duration {
    Duration::from_secs(1)
}

/// Scenario of a workload, selected by the `mode` field.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ModeConfig {
    /// Every iteration loads a new shape from the beginning.
    Sync {
        /// Number of rows in the table.
        num_rows: u64,
    },
    /// Every user loads one shape and then long-polls it.
    Live {
        /// Number of shapes the table is partitioned into.
        num_shapes: u64,
    },
}

/// Controls the output format of logs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// [`LogFormat::Pretty`] when stderr is a terminal, otherwise [`LogFormat::Simplified`].
    Auto,
    /// Colored, multi-line output.
    Pretty,
    /// Plain single-line output.
    Simplified,
    /// JSON lines.
    Json,
}

/// Logging configuration. Logs are always written to stderr.
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum level of log messages.
    ///
    /// `RUST_LOG` takes precedence if set.
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Output format.
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

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
