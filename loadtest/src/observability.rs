//! Log setup for the load tester binary.

use std::env;
use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::{LogFormat, Logging};

/// Installs the global `tracing` subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more than once has no
/// effect.
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
        LogFormat::Json => layer.json().flatten_event(true).boxed(),
        LogFormat::Simplified => layer.with_ansi(false).compact().boxed(),
        LogFormat::Auto | LogFormat::Pretty => layer.pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(level))
        .with(env_filter)
        .try_init()
        .ok();
}

/// Returns the effective maximum level and the per-crate filter.
///
/// `RUST_LOG` is used as the level if it parses as one. Otherwise it is used literally as the
/// filter if the user knows which overrides they want to run.
fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        hyper_util=WARN,\
        reqwest=WARN,\
        loadtest=TRACE,\
        shapesync_types=TRACE,\
        ",
    );

    (level, env_filter)
}
