use std::{
    fmt::{self, Display},
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    str::FromStr,
};

use clap::{Args, Parser, Subcommand};
use jemallocator::Jemalloc;
use once_cell::sync::Lazy;
use promdelta::{
    compare::{self, Thresholds},
    gcp_monitoring::{self, CloudMonitoring},
    ingest::{self, Family},
    labels::LabelSet,
    reduce,
    render::{self, Format, Mode},
    snapshot::SnapshotMap,
};
use promdelta_retry::RealClock;
use regex::Regex;
use tokio::runtime::Builder;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("a --project-id must be specified for {0}")]
    MissingProjectId(Format),
    #[error("a --timestamp must be specified for {0}")]
    MissingTimestamp(Format),
    #[error("Failed to ingest dump: {0}")]
    Ingest(#[from] ingest::Error),
    #[error("Failed to reduce dump: {0}")]
    Reduce(#[from] reduce::Error),
    #[error("Failed to render output: {0}")]
    Render(#[from] render::Error),
    #[error("Failed to push to Cloud Monitoring: {0}")]
    Monitoring(#[from] gcp_monitoring::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// How a run ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Clean,
    Breached(usize),
}

#[derive(Default, Clone, Debug)]
struct CliKeyValues {
    inner: LabelSet,
}

impl CliKeyValues {
    #[cfg(test)]
    fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }
}

impl Display for CliKeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        for (k, v) in &self.inner {
            write!(f, "{k}={v},")?;
        }
        Ok(())
    }
}

impl FromStr for CliKeyValues {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        // Pairs are separated by ',' and hold exactly one '='. Keys and
        // values are trimmed and a pair with an empty side is dropped.
        static RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^([^=]*)=([^=]*)$").expect("Invalid regex pattern provided"));

        let mut labels = LabelSet::new();

        for pair in input.split(',') {
            let Some(cap) = RE.captures(pair) else {
                if !pair.trim().is_empty() {
                    debug!("ignoring malformed label pair {pair:?}");
                }
                continue;
            };
            let key = cap[1].trim();
            let value = cap[2].trim();
            if key.is_empty() || value.is_empty() {
                continue;
            }
            labels.insert(key.to_string(), value.to_string());
        }

        Ok(Self { inner: labels })
    }
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Output every series of one dump, averaging histograms
    Single(SingleCommand),
    /// Compare two dumps and report the percent change of every series
    Compare(CompareCommand),
}

#[derive(Args)]
struct SingleCommand {
    /// metrics dump to parse
    #[clap(long)]
    file: PathBuf,
    #[command(flatten)]
    args: MetricArgs,
}

#[derive(Args)]
struct CompareCommand {
    /// old metrics dump to parse
    #[clap(long)]
    old_file: PathBuf,
    /// new metrics dump to parse
    #[clap(long)]
    new_file: PathBuf,
    /// percent change, in either direction, above which a series is flagged
    /// as a warning
    #[clap(long)]
    warn: Option<f64>,
    /// percent change, in either direction, above which a series fails the
    /// run
    #[clap(long)]
    error: Option<f64>,
    /// percent increase above which a series fails the run
    #[clap(long)]
    max_increase: Option<f64>,
    #[command(flatten)]
    args: MetricArgs,
}

// Arguments shared by both subcommands
#[derive(Args)]
struct MetricArgs {
    /// comma separated list of families to include in the results
    #[clap(long, value_delimiter = ',')]
    metrics: Vec<String>,
    /// minimum number of histogram counts for a histogram to show up
    #[clap(long, default_value_t = reduce::DEFAULT_MIN_HISTOGRAM_COUNT)]
    min_histogram_counts: u64,
    /// prefix to strip from family names
    #[clap(long, default_value_t = reduce::DEFAULT_TRIM_PREFIX.to_string())]
    trim_prefix_histogram_counts: String,
    /// format to output the metrics in
    #[clap(long, value_enum, default_value_t = Format::Plain)]
    format: Format,
    /// labels to attach to every series, format KEY=VAL,KEY2=VAL e.g.
    /// Test=ci-scale-test,ClusterFlavor=gke
    #[clap(long)]
    labels: Option<CliKeyValues>,
    /// Google Cloud project to push metrics to e.g. stackrox-ci
    #[clap(long)]
    project_id: Option<String>,
    /// seconds since the epoch UTC
    #[clap(long, default_value_t = 0)]
    timestamp: i64,
}

impl MetricArgs {
    fn validate(&self) -> Result<(), Error> {
        let project_id = self.project_id.as_deref().unwrap_or_default();
        if self.format == Format::GcpMonitoring && project_id.is_empty() {
            return Err(Error::MissingProjectId(self.format));
        }
        if matches!(self.format, Format::GcpMonitoring | Format::Influxdb) && self.timestamp == 0 {
            return Err(Error::MissingTimestamp(self.format));
        }
        Ok(())
    }

    fn reduce_config(&self) -> reduce::Config {
        reduce::Config {
            include: self
                .metrics
                .iter()
                .map(|m| m.trim())
                .filter(|m| !m.is_empty())
                .map(ToString::to_string)
                .collect(),
            trim_prefix: self.trim_prefix_histogram_counts.clone(),
            min_histogram_count: self.min_histogram_counts,
        }
    }

    fn extra_labels(&self) -> LabelSet {
        self.labels
            .as_ref()
            .map(|labels| labels.inner.clone())
            .unwrap_or_default()
    }
}

fn run_single<W: Write>(cmd: &SingleCommand, out: W) -> Result<Outcome, Error> {
    let args = &cmd.args;
    args.validate()?;

    let config = args.reduce_config();
    let families = ingest::read_file(&cmd.file)?;
    let snapshot = SnapshotMap::from_families(&families, &config)?;
    info!("reduced {} series from {}", snapshot.len(), cmd.file.display());

    let extra = args.extra_labels();
    if args.format == Format::GcpMonitoring {
        let project_id = args.project_id.as_deref().unwrap_or_default();
        push(project_id, &families, &config, &snapshot, &extra, args.timestamp)?;
    } else {
        render::snapshot(args.format, &snapshot, &extra, args.timestamp, out)?;
    }
    Ok(Outcome::Clean)
}

fn run_compare<W: Write>(cmd: &CompareCommand, out: W) -> Result<Outcome, Error> {
    let args = &cmd.args;
    args.validate()?;
    if !matches!(args.format, Format::Plain | Format::Csv) {
        return Err(render::Error::UnsupportedFormat {
            format: args.format,
            mode: Mode::Compare,
        }
        .into());
    }

    let config = args.reduce_config();
    let old = SnapshotMap::from_families(&ingest::read_file(&cmd.old_file)?, &config)?;
    let new = SnapshotMap::from_families(&ingest::read_file(&cmd.new_file)?, &config)?;
    debug!("comparing {} old series against {} new", old.len(), new.len());

    let thresholds = Thresholds {
        warn_at: cmd.warn,
        error_at: cmd.error,
        max_increase: cmd.max_increase,
    };
    let comparison = compare::compare(&old, &new, &thresholds);
    render::comparison(args.format, &comparison, &args.extra_labels(), out)?;

    match comparison.breaches() {
        0 => Ok(Outcome::Clean),
        breaches => Ok(Outcome::Breached(breaches)),
    }
}

fn push(
    project_id: &str,
    families: &[Family],
    config: &reduce::Config,
    snapshot: &SnapshotMap,
    extra: &LabelSet,
    timestamp: i64,
) -> Result<(), Error> {
    let runtime = Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    runtime.block_on(async {
        let backend = CloudMonitoring::connect(project_id).await?;
        let created = gcp_monitoring::create_descriptors(&backend, families, config).await?;
        info!("created {created} metric descriptors");

        let policy = gcp_monitoring::write_policy();
        gcp_monitoring::push(&backend, snapshot, extra, timestamp, &policy, &RealClock).await?;
        Ok::<(), Error>(())
    })
}

/// Print a clap error and pick the exit code. --help and --version arrive
/// here too and are not failures.
fn usage_exit(err: &clap::Error) -> ExitCode {
    if let Err(print_err) = err.print() {
        error!("failed to print usage: {print_err}");
    }
    if err.use_stderr() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish()
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => return usage_exit(&err),
    };

    let stdout = io::stdout();
    let res = match &cli.command {
        Commands::Single(cmd) => run_single(cmd, stdout.lock()),
        Commands::Compare(cmd) => run_compare(cmd, stdout.lock()),
    };

    match res {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Breached(breaches)) => {
            error!("{breaches} series breached an error threshold");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
