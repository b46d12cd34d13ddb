//! Run workloads concurrently against a shape API and print metrics.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};
use sketches_ddsketch::DDSketch;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use yansi::Paint;

use crate::http::{HttpRemote, RequestError, ShapeRequest, ShapeResponse};
use crate::report::{RunReport, WorkloadReport};
use crate::workload::{User, Workload, WorkloadMode};

/// Runs the given workloads concurrently against the remote.
///
/// Every workload ramps up its users at its spawn rate and keeps them running until `duration`
/// has elapsed. Afterwards, metrics are printed per workload and in total.
///
/// If a live user cannot load its shape, all users of all workloads are stopped and the returned
/// report is marked as [stopped early](RunReport::stopped_early).
pub async fn run(
    remote: HttpRemote,
    workloads: Vec<Workload>,
    duration: Duration,
) -> Result<RunReport> {
    let remote = Arc::new(remote);
    let stop = CancellationToken::new();

    tracing::info!(workloads = workloads.len(), ?duration, "starting load test");

    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message("Running load test:");
    bar.enable_steady_tick(Duration::from_millis(100));

    // run the workloads concurrently
    let tasks: Vec<_> = workloads
        .into_iter()
        .map(|workload| {
            let remote = Arc::clone(&remote);
            tokio::spawn(run_workload(remote, workload, duration, stop.clone()))
        })
        .collect();

    let finished_tasks = futures::future::join_all(tasks).await;
    bar.finish_and_clear();

    let mut total_metrics = WorkloadMetrics::default();
    let mut reports = Vec::with_capacity(finished_tasks.len());
    for task in finished_tasks {
        let (workload, metrics) = task.context("workload task failed")?;

        println!();
        println!(
            "{} {} (mode: {:?}, table: {}, users: {}/{})",
            "## Workload".bold(),
            workload.name.bold().blue(),
            workload.mode,
            workload.table,
            metrics.users_started.bold(),
            workload.users,
        );
        print_metrics(&metrics, duration);

        total_metrics.merge(&metrics);
        reports.push(WorkloadReport::new(&workload, &metrics, duration));
    }

    println!();
    println!("{}", "## TOTALS".bold());
    print_metrics(&total_metrics, duration);
    println!();

    let stopped_early = stop.is_cancelled();
    if stopped_early {
        println!("{}", "RUN STOPPED EARLY".bold().red());
    }

    Ok(RunReport {
        workloads: reports,
        stopped_early,
    })
}

async fn run_workload(
    remote: Arc<HttpRemote>,
    mut workload: Workload,
    duration: Duration,
    stop: CancellationToken,
) -> (Workload, WorkloadMetrics) {
    let env = Arc::new(UserEnv {
        remote,
        workload: workload.name.clone(),
        table: workload.table.clone(),
        pacing: workload.pacing,
        deadline: tokio::time::Instant::now() + duration,
        stop,
        metrics: Arc::new(Mutex::new(WorkloadMetrics::default())),
    });

    let interval = workload.spawn_interval();
    let mut users = Vec::with_capacity(workload.users);

    for id in 0..workload.users {
        if id > 0 && env.until_stopped(tokio::time::sleep(interval)).await.is_none() {
            break;
        }
        if env.is_stopped() {
            break;
        }

        let user = workload.spawn_user(id);
        env.metrics.lock().unwrap().users_started += 1;
        tracing::debug!(workload = %env.workload, user = id, "starting user");

        let task = match workload.mode {
            WorkloadMode::Sync => tokio::spawn(run_sync_user(Arc::clone(&env), user)),
            WorkloadMode::Live => tokio::spawn(run_live_user(Arc::clone(&env), user)),
        };
        users.push(task);
    }

    // users exit on their own once the deadline passes or the run is stopped
    futures::future::join_all(users).await;

    let metrics = std::mem::take(&mut *env.metrics.lock().unwrap());
    (workload, metrics)
}

/// Everything a user task needs, shared by all users of a workload.
struct UserEnv {
    remote: Arc<HttpRemote>,
    workload: String,
    table: String,
    pacing: Duration,
    deadline: tokio::time::Instant,
    stop: CancellationToken,
    metrics: Arc<Mutex<WorkloadMetrics>>,
}

impl UserEnv {
    fn is_stopped(&self) -> bool {
        self.stop.is_cancelled() || tokio::time::Instant::now() >= self.deadline
    }

    /// Drives `future` until it completes, the deadline passes or the run is stopped.
    async fn until_stopped<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            output = future => Some(output),
            _ = sleep_until(self.deadline) => None,
            _ = self.stop.cancelled() => None,
        }
    }

    /// Waits for the rest of the pacing interval of an iteration that began at `started`.
    ///
    /// Returns `false` if the user should exit.
    async fn pace(&self, started: Instant) -> bool {
        let wait = self.pacing.saturating_sub(started.elapsed());
        self.until_stopped(tokio::time::sleep(wait)).await.is_some() && !self.is_stopped()
    }

    async fn fetch(&self, request: &ShapeRequest) -> Option<Result<ShapeResponse, RequestError>> {
        self.until_stopped(self.remote.fetch(&self.table, request))
            .await
    }
}

async fn run_sync_user(env: Arc<UserEnv>, mut user: User) {
    loop {
        let started = Instant::now();
        let filter = user.next_filter();
        let request = ShapeRequest::initial(filter.to_string());

        let Some(result) = env.fetch(&request).await else {
            break;
        };
        match result {
            Ok(response) => {
                let mut metrics = env.metrics.lock().unwrap();
                metrics.initial.record(started.elapsed(), &response);
            }
            Err(err) => {
                tracing::error!(
                    workload = %env.workload,
                    user = user.id,
                    %filter,
                    error = &err as &dyn std::error::Error,
                    "client could not load shape"
                );
                env.metrics.lock().unwrap().initial.failures += 1;
            }
        }

        if !env.pace(started).await {
            break;
        }
    }
}

async fn run_live_user(env: Arc<UserEnv>, mut user: User) {
    let started = Instant::now();
    let filter = user.next_filter().to_string();

    let Some(result) = env.fetch(&ShapeRequest::initial(filter.as_str())).await else {
        return;
    };
    let handle = match result.and_then(|response| Ok((response.handle()?, response))) {
        Ok((handle, response)) => {
            env.metrics
                .lock()
                .unwrap()
                .initial
                .record(started.elapsed(), &response);
            handle
        }
        Err(err) => {
            tracing::error!(
                workload = %env.workload,
                user = user.id,
                %filter,
                error = &err as &dyn std::error::Error,
                "client could not load shape, stopping all users"
            );
            env.metrics.lock().unwrap().initial.failures += 1;
            env.stop.cancel();
            return;
        }
    };
    tracing::debug!(
        workload = %env.workload,
        user = user.id,
        shape_id = %handle.shape_id,
        offset = %handle.offset,
        "shape loaded, switching to live mode"
    );

    if !env.pace(started).await {
        return;
    }

    let mut request = ShapeRequest::live(&handle, filter);
    loop {
        let started = Instant::now();

        let Some(result) = env.fetch(&request).await else {
            break;
        };
        match result {
            Ok(response) => {
                env.metrics
                    .lock()
                    .unwrap()
                    .live
                    .record(started.elapsed(), &response);
                if let Some(offset) = response.last_offset {
                    request.advance(offset);
                }
            }
            Err(err) => {
                tracing::error!(
                    workload = %env.workload,
                    user = user.id,
                    offset = %request.offset(),
                    error = &err as &dyn std::error::Error,
                    "request failed"
                );
                env.metrics.lock().unwrap().live.failures += 1;
            }
        }

        if !env.pace(started).await {
            break;
        }
    }
}

fn print_metrics(metrics: &WorkloadMetrics, duration: Duration) {
    print_requests("INITIAL", &metrics.initial, duration);
    print_requests("LIVE", &metrics.live, duration);
}

fn print_requests(label: &str, metrics: &RequestMetrics, duration: Duration) {
    let sketch = &metrics.timing;
    if sketch.count() > 0 {
        print!(
            "{} ({} ops",
            format!("{label}:").bold().green(),
            sketch.count().bold()
        );
        if metrics.failures > 0 {
            print!(
                ", {}",
                format!("{} FAILURES", metrics.failures).bold().red()
            )
        }
        println!(")");

        print_ops(sketch, duration);
        print_throughput(metrics.bytes, duration);
        println!(
            "  messages: {} ({:.1} per response)",
            metrics.messages.bold(),
            metrics.messages as f64 / sketch.count() as f64
        );
        print_percentiles(sketch, Duration::from_secs_f64);
    } else if metrics.failures > 0 {
        println!(
            "{}",
            format!("{} {label} FAILURES", metrics.failures)
                .bold()
                .red()
        );
    }
}

fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let quantile = |q| map(sketch.quantile(q).ok().flatten().unwrap_or_default());

    let avg = map(sketch.sum().unwrap_or_default() / sketch.count() as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

fn print_ops(sketch: &DDSketch, duration: Duration) {
    let ops = sketch.count();
    let ops_ps = ops as f64 / duration.as_secs_f64();
    print!("  {:.2} operations/s", ops_ps.bold());
}

fn print_throughput(total: u64, duration: Duration) {
    let throughput = (total as f64 / duration.as_secs_f64()) as u64;
    println!(", {:.2}/s", ByteSize::b(throughput).bold());
}

/// Metrics of one kind of shape request.
#[derive(Default)]
pub(crate) struct RequestMetrics {
    /// Latency of successful requests in seconds.
    pub(crate) timing: DDSketch,
    pub(crate) bytes: u64,
    pub(crate) messages: u64,
    pub(crate) failures: u64,
}

impl RequestMetrics {
    fn record(&mut self, elapsed: Duration, response: &ShapeResponse) {
        self.timing.add(elapsed.as_secs_f64());
        self.bytes += response.bytes;
        self.messages += response.messages;
    }

    fn merge(&mut self, other: &RequestMetrics) {
        // all sketches share the default config, which cannot fail to merge
        self.timing.merge(&other.timing).ok();
        self.bytes += other.bytes;
        self.messages += other.messages;
        self.failures += other.failures;
    }
}

#[derive(Default)]
pub(crate) struct WorkloadMetrics {
    /// Requests at offset `-1`: every sync iteration and the first request of live users.
    pub(crate) initial: RequestMetrics,
    /// Live requests following a loaded shape.
    pub(crate) live: RequestMetrics,
    pub(crate) users_started: usize,
}

impl WorkloadMetrics {
    fn merge(&mut self, other: &WorkloadMetrics) {
        self.initial.merge(&other.initial);
        self.live.merge(&other.live);
        self.users_started += other.users_started;
    }
}
