//! Machine-readable summaries of a load test run.
//!
//! Reports are written as one pretty-printed JSON file per workload, named
//! `{name}-{users}-{spawn_rate}-{index}.json` where `index` is the workload's position in the run,
//! so that runs with different user counts can be kept side by side in the same output directory.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use sketches_ddsketch::DDSketch;

use crate::loadtest::{RequestMetrics, WorkloadMetrics};
use crate::workload::{Workload, WorkloadMode};

/// The outcome of a complete load test run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// One report per workload, in configuration order.
    pub workloads: Vec<WorkloadReport>,
    /// Set if a live client failed to load its shape and all users were stopped.
    pub stopped_early: bool,
}

/// Summary of a single workload.
#[derive(Debug, Serialize)]
pub struct WorkloadReport {
    /// Name of the workload.
    pub name: String,
    /// Scenario run by the users.
    pub mode: WorkloadMode,
    /// Table the shapes were requested for.
    pub table: String,
    /// Configured number of users.
    pub users: usize,
    /// Configured users started per second.
    pub spawn_rate: f64,
    /// Users actually started before the run ended.
    pub users_started: usize,
    /// Configured run duration in seconds.
    pub duration_secs: f64,
    /// Requests loading a shape from the beginning.
    pub initial: OperationReport,
    /// Live requests following a loaded shape.
    pub live: OperationReport,
}

/// Summary of one kind of request.
#[derive(Debug, Serialize)]
pub struct OperationReport {
    /// Successful requests.
    pub requests: u64,
    /// Failed requests.
    pub failures: u64,
    /// Successful requests per second over the configured duration.
    pub ops_per_sec: f64,
    /// Response bytes received.
    pub bytes: u64,
    /// Shape log messages received.
    pub messages: u64,
    /// Latency of successful requests, if there were any.
    pub latency: Option<Latency>,
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Serialize)]
pub struct Latency {
    /// Average latency.
    pub avg_ms: f64,
    /// Median latency.
    pub p50_ms: f64,
    /// 90th percentile latency.
    pub p90_ms: f64,
    /// 99th percentile latency.
    pub p99_ms: f64,
}

impl Latency {
    fn from_sketch(sketch: &DDSketch) -> Option<Self> {
        let count = sketch.count();
        if count == 0 {
            return None;
        }

        let ms = |secs: f64| secs * 1000.0;
        let quantile = |q| sketch.quantile(q).ok().flatten().map(ms);

        Some(Self {
            avg_ms: ms(sketch.sum()? / count as f64),
            p50_ms: quantile(0.5)?,
            p90_ms: quantile(0.9)?,
            p99_ms: quantile(0.99)?,
        })
    }
}

impl OperationReport {
    fn new(metrics: &RequestMetrics, duration: Duration) -> Self {
        let requests = metrics.timing.count() as u64;
        Self {
            requests,
            failures: metrics.failures,
            ops_per_sec: requests as f64 / duration.as_secs_f64(),
            bytes: metrics.bytes,
            messages: metrics.messages,
            latency: Latency::from_sketch(&metrics.timing),
        }
    }
}

impl WorkloadReport {
    pub(crate) fn new(workload: &Workload, metrics: &WorkloadMetrics, duration: Duration) -> Self {
        Self {
            name: workload.name.clone(),
            mode: workload.mode,
            table: workload.table.clone(),
            users: workload.users,
            spawn_rate: workload.spawn_rate,
            users_started: metrics.users_started,
            duration_secs: duration.as_secs_f64(),
            initial: OperationReport::new(&metrics.initial, duration),
            live: OperationReport::new(&metrics.live, duration),
        }
    }

    /// The file name of this report within the output directory.
    ///
    /// `index` is the position of the workload within the run.
    pub fn file_name(&self, index: usize) -> String {
        format!("{}-{}-{}-{index}.json", self.name, self.users, self.spawn_rate)
    }
}

/// Writes one JSON file per workload into `dir`, creating it if needed.
///
/// Returns the paths of all written files.
pub fn write_reports(dir: &Path, report: &RunReport) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    report
        .workloads
        .iter()
        .enumerate()
        .map(|(index, workload)| {
            let path = dir.join(workload.file_name(index));
            let file = File::create(&path)
                .with_context(|| format!("failed to create report {}", path.display()))?;
            serde_json::to_writer_pretty(BufWriter::new(file), workload)
                .with_context(|| format!("failed to write report {}", path.display()))?;
            Ok(path)
        })
        .collect()
}
