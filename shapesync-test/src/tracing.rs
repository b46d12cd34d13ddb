//! Logging for tests.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

/// Workspace crates whose logs are captured at full verbosity.
const WORKSPACE_CRATES: &[&str] = &["loadtest", "shapesync_test", "shapesync_types"];

/// Initialize the logger for a test.
///
/// Logs go to the output captured by the Rust test runner, so they only show up for failing tests
/// or with `--nocapture`. Workspace crates log at `TRACE`, everything else at `WARN`. Setting
/// `RUST_LOG` replaces this filter entirely.
///
/// Calling this more than once is fine; later calls have no effect.
///
/// ```
/// shapesync_test::tracing::init();
/// ```
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(test_filter())
        .with_test_writer()
        .with_target(true)
        .compact()
        .try_init()
        .ok();
}

fn test_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    WORKSPACE_CRATES
        .iter()
        .filter_map(|name| format!("{name}=TRACE").parse::<Directive>().ok())
        .fold(EnvFilter::new("WARN"), EnvFilter::add_directive)
}
