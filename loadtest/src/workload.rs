//! A module for defining a [`Workload`] of simulated users hitting a shape API.

use std::num::NonZeroUsize;
use std::thread::available_parallelism;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use shapesync_types::{InvalidRangeError, RangeFilter, ShapeRange, UpperBound};

/// Errors that can occur when building a [`Workload`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum WorkloadError {
    /// The name cannot be used as part of a report file name.
    #[error("workload name {0:?} must be non-empty and must not contain path separators")]
    InvalidName(String),

    /// The spawn rate is negative, infinite or NaN.
    #[error("spawn rate {0} must be a finite, non-negative number")]
    InvalidSpawnRate(f64),

    /// The identifier space or shape size is invalid.
    #[error(transparent)]
    Range(#[from] InvalidRangeError),
}

/// The scenario a workload's users run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadMode {
    /// Every iteration loads a freshly drawn shape from the beginning of its log.
    Sync,
    /// Every user loads one shape, then long-polls it for changes.
    Live,
}

/// A builder for creating a [`Workload`].
#[derive(Debug)]
pub struct WorkloadBuilder {
    name: String,
    table: String,
    users: usize,
    spawn_rate: f64,
    pacing: Duration,
    seed: u64,

    mode: WorkloadMode,
    shape_size: u64,
    /// Rows in sync mode, shapes in live mode.
    space: u64,
    upper_bound: Option<UpperBound>,
}

impl WorkloadBuilder {
    /// The table shapes are requested for.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// The number of simulated users.
    pub fn users(mut self, users: usize) -> Self {
        self.users = users;
        self
    }

    /// The number of users started per second.
    ///
    /// A rate of zero starts all users at once.
    pub fn spawn_rate(mut self, spawn_rate: f64) -> Self {
        self.spawn_rate = spawn_rate;
        self
    }

    /// The minimum duration of one user iteration, including the wait after the request.
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Seeds the RNG that draws shapes, making runs reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sync mode: shapes of `shape_size` rows anywhere within `num_rows` rows.
    pub fn sync(mut self, shape_size: u64, num_rows: u64) -> Self {
        self.mode = WorkloadMode::Sync;
        self.shape_size = shape_size;
        self.space = num_rows;
        self
    }

    /// Live mode: one of `num_shapes` consecutive shapes of `shape_size` rows each.
    pub fn live(mut self, shape_size: u64, num_shapes: u64) -> Self {
        self.mode = WorkloadMode::Live;
        self.shape_size = shape_size;
        self.space = num_shapes;
        self
    }

    /// Overrides whether filters include their upper identifier.
    ///
    /// Sync mode defaults to [`UpperBound::Inclusive`], live mode to [`UpperBound::Exclusive`].
    pub fn upper_bound(mut self, upper_bound: UpperBound) -> Self {
        self.upper_bound = Some(upper_bound);
        self
    }

    /// Creates the workload instance.
    pub fn build(self) -> Result<Workload, WorkloadError> {
        if !is_valid_name(&self.name) {
            return Err(WorkloadError::InvalidName(self.name));
        }
        if !self.spawn_rate.is_finite() || self.spawn_rate < 0.0 {
            return Err(WorkloadError::InvalidSpawnRate(self.spawn_rate));
        }

        let range = match self.mode {
            WorkloadMode::Sync => ShapeRange::new(
                self.shape_size,
                self.space,
                self.upper_bound.unwrap_or(UpperBound::Inclusive),
            )?,
            WorkloadMode::Live => ShapeRange::aligned(
                self.shape_size,
                self.space,
                self.upper_bound.unwrap_or(UpperBound::Exclusive),
            )?,
        };

        Ok(Workload {
            name: self.name,
            table: self.table,
            mode: self.mode,
            users: self.users,
            spawn_rate: self.spawn_rate,
            pacing: self.pacing,

            rng: SmallRng::seed_from_u64(self.seed),
            range,
        })
    }
}

/// Names end up in report file names, so they must form a single path component.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Specification of a load test that can be run against a shape API.
#[derive(Debug)]
pub struct Workload {
    /// Name of the workload for identification in output and reports.
    pub(crate) name: String,
    /// The table shapes are requested for.
    pub(crate) table: String,
    /// The scenario run by each user.
    pub(crate) mode: WorkloadMode,
    /// The number of simulated users.
    pub(crate) users: usize,
    /// Users started per second.
    pub(crate) spawn_rate: f64,
    /// Minimum duration of one user iteration.
    pub(crate) pacing: Duration,

    /// Seeds the per-user RNGs.
    rng: SmallRng,
    /// The identifier space shapes are drawn from.
    range: ShapeRange,
}

impl Workload {
    /// Constructs a new workload builder with the given name.
    pub fn builder(name: impl Into<String>) -> WorkloadBuilder {
        WorkloadBuilder {
            name: name.into(),
            table: "issue".to_owned(),
            users: available_parallelism().map_or(1, NonZeroUsize::get),
            spawn_rate: 1.0,
            pacing: Duration::from_secs(1),
            seed: rand::random(),

            mode: WorkloadMode::Sync,
            shape_size: 100,
            space: 100_000,
            upper_bound: None,
        }
    }

    /// The identifier space shapes are drawn from.
    pub fn range(&self) -> &ShapeRange {
        &self.range
    }

    /// Creates the next simulated user.
    ///
    /// Each user draws shapes from its own RNG, seeded from the workload's RNG.
    pub(crate) fn spawn_user(&mut self, id: usize) -> User {
        User {
            id,
            rng: SmallRng::seed_from_u64(self.rng.next_u64()),
            range: self.range,
        }
    }

    /// The delay between starting two consecutive users.
    ///
    /// Rates too small to express as a delay never start a second user.
    pub(crate) fn spawn_interval(&self) -> Duration {
        if self.spawn_rate > 0.0 {
            Duration::try_from_secs_f64(self.spawn_rate.recip()).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}

/// A simulated client of the shape API.
#[derive(Debug)]
pub(crate) struct User {
    pub(crate) id: usize,
    rng: SmallRng,
    range: ShapeRange,
}

impl User {
    /// Draws the filter for the next shape request.
    pub(crate) fn next_filter(&mut self) -> RangeFilter {
        self.range.sample(&mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use shapesync_types::Placement;

    use super::*;

    #[test]
    fn mode_selects_bound_and_placement() {
        let sync = Workload::builder("sync").sync(10, 1000).build().unwrap();
        assert_eq!(sync.mode, WorkloadMode::Sync);
        assert_eq!(sync.range().upper_bound(), UpperBound::Inclusive);
        assert_eq!(sync.range().placement(), Placement::Anywhere);
        assert_eq!(sync.range().total_size(), 1000);

        let live = Workload::builder("live").live(10, 50).build().unwrap();
        assert_eq!(live.mode, WorkloadMode::Live);
        assert_eq!(live.range().upper_bound(), UpperBound::Exclusive);
        assert_eq!(live.range().placement(), Placement::Aligned);
        assert_eq!(live.range().total_size(), 500);

        let live = Workload::builder("live")
            .live(10, 50)
            .upper_bound(UpperBound::Inclusive)
            .build()
            .unwrap();
        assert_eq!(live.range().upper_bound(), UpperBound::Inclusive);
    }

    #[test]
    fn rejects_invalid_range() {
        let err = Workload::builder("broken").sync(11, 10).build().unwrap_err();
        assert_eq!(
            err,
            WorkloadError::Range(InvalidRangeError::ShapeExceedsTotal {
                shape_size: 11,
                total_size: 10
            })
        );
    }

    #[test]
    fn rejects_invalid_spawn_rate() {
        for rate in [-1.0, f64::INFINITY, f64::NEG_INFINITY] {
            let err = Workload::builder("w").spawn_rate(rate).build().unwrap_err();
            assert_eq!(err, WorkloadError::InvalidSpawnRate(rate));
        }

        let err = Workload::builder("w").spawn_rate(f64::NAN).build().unwrap_err();
        assert!(matches!(err, WorkloadError::InvalidSpawnRate(rate) if rate.is_nan()));
    }

    #[test]
    fn rejects_names_unfit_for_file_names() {
        for name in ["", ".", "..", "sync/live", "..\\sync"] {
            let err = Workload::builder(name).build().unwrap_err();
            assert_eq!(err, WorkloadError::InvalidName(name.to_owned()));
        }

        assert!(Workload::builder("sync-1.5_large").build().is_ok());
    }

    #[test]
    fn users_are_reproducible_from_seed() {
        let draw = |seed| {
            let mut workload = Workload::builder("seeded")
                .seed(seed)
                .sync(10, 1_000_000)
                .build()
                .unwrap();
            (0..4)
                .map(|id| workload.spawn_user(id).next_filter())
                .collect::<Vec<_>>()
        };

        assert_eq!(draw(5), draw(5));
        assert_ne!(draw(5), draw(6));
    }

    #[test]
    fn live_users_draw_aligned_shapes() {
        let mut workload = Workload::builder("live").live(25, 40).build().unwrap();
        let mut user = workload.spawn_user(0);

        for _ in 0..100 {
            let filter = user.next_filter();
            assert_eq!(filter.start() % 25, 0);
            assert!(filter.to_string().contains("id<'"));
        }
    }

    #[test]
    fn spawn_interval() {
        let workload = Workload::builder("w").spawn_rate(4.0).build().unwrap();
        assert_eq!(workload.spawn_interval(), Duration::from_millis(250));

        let workload = Workload::builder("w").spawn_rate(0.0).build().unwrap();
        assert_eq!(workload.spawn_interval(), Duration::ZERO);

        let workload = Workload::builder("w").spawn_rate(1e-20).build().unwrap();
        assert_eq!(workload.spawn_interval(), Duration::MAX);
    }
}
