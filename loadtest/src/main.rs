//! Command line interface of the shape sync load tester.
//!
//! - `loadtest run -c config.yaml` runs the configured workloads, see [`loadtest::config`].
//! - `loadtest filter` prints random shape filters, for trying out queries by hand.
//! - `loadtest ids` prints row identifiers matching the filters, for seeding the table under test.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use argh::FromArgs;
use loadtest::config::{Config, Logging};
use loadtest::http::HttpRemote;
use loadtest::{observability, report};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use shapesync_types::id::{self, MAX_DIGITS};
use shapesync_types::{ShapeRange, UpperBound};

/// Load tester for shape sync APIs
#[derive(Debug, FromArgs)]
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Filter(FilterCommand),
    Ids(IdsCommand),
}

/// run the configured workloads against a shape API
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// base URL of the shape API, overrides the configuration
    #[argh(option)]
    remote: Option<String>,

    /// how long to run, for example `30s` or `5m`
    #[argh(option, from_str_fn(parse_duration))]
    duration: Option<Duration>,

    /// directory to write JSON reports to
    #[argh(option)]
    output_dir: Option<PathBuf>,

    /// only run the workload with this name, can be repeated
    #[argh(option, short = 'w')]
    workload: Vec<String>,
}

/// print random shape filters
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "filter")]
struct FilterCommand {
    /// number of rows per shape
    #[argh(option)]
    shape_size: u64,

    /// number of rows in the table, or the number of shapes with `--aligned`
    #[argh(option)]
    total_size: u64,

    /// exclude the upper identifier from the range
    #[argh(switch)]
    exclusive: bool,

    /// partition the table into `--total-size` shapes of `--shape-size` rows
    #[argh(switch)]
    aligned: bool,

    /// seed for reproducible output
    #[argh(option)]
    seed: Option<u64>,

    /// number of filters to print
    #[argh(option, default = "1")]
    count: usize,
}

/// print row identifiers for seeding the table under test
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "ids")]
struct IdsCommand {
    /// number of identifiers to print
    #[argh(option)]
    count: u64,

    /// row index of the first identifier
    #[argh(option, default = "0")]
    start: u64,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Args = argh::from_env();

    match args.command {
        Command::Run(command) => run(command).await,
        Command::Filter(command) => {
            observability::init_tracing(&Logging::default());
            filter(command)
        }
        Command::Ids(command) => ids(command),
    }
}

async fn run(command: RunCommand) -> Result<()> {
    let mut config = Config::load(command.config.as_deref())?;
    if let Some(remote) = command.remote {
        config.remote = remote;
    }
    if let Some(duration) = command.duration {
        config.duration = duration;
    }
    if let Some(output_dir) = command.output_dir {
        config.output_dir = Some(output_dir);
    }

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    if config.workloads.is_empty() {
        bail!("no workloads configured");
    }
    let workloads = config.build_workloads(&command.workload)?;
    if workloads.is_empty() {
        bail!("no configured workload is named {:?}", command.workload);
    }

    let remote = HttpRemote::new(config.remote.as_str());
    let run_report = loadtest::run(remote, workloads, config.duration).await?;

    if let Some(output_dir) = &config.output_dir {
        for path in report::write_reports(output_dir, &run_report)? {
            tracing::info!(path = %path.display(), "wrote report");
        }
    }

    if run_report.stopped_early {
        bail!("a live client could not load its shape, all users were stopped");
    }
    Ok(())
}

fn filter(command: FilterCommand) -> Result<()> {
    let upper = if command.exclusive {
        UpperBound::Exclusive
    } else {
        UpperBound::Inclusive
    };
    let range = if command.aligned {
        ShapeRange::aligned(command.shape_size, command.total_size, upper)
    } else {
        ShapeRange::new(command.shape_size, command.total_size, upper)
    }
    .context("invalid shape range")?;

    let seed = command.seed.unwrap_or_else(rand::random);
    tracing::debug!(seed, ?range, "drawing filters");

    let mut rng = SmallRng::seed_from_u64(seed);
    for _ in 0..command.count {
        println!("{}", range.sample(&mut rng));
    }

    Ok(())
}

fn ids(command: IdsCommand) -> Result<()> {
    let end = command
        .start
        .checked_add(command.count)
        .context("identifier range overflows")?;
    let width = id::digits(end);
    if width > MAX_DIGITS {
        bail!("row index {end} needs more than {MAX_DIGITS} identifier digits");
    }

    for value in command.start..end {
        println!("{}", id::format_id(value, width));
    }

    Ok(())
}
