use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use ridestats::parse::DocumentKind;
use ridestats::{
    format_summary, load_activity, Activity, ElevationSource, FixedZone, MergeStrategy,
    OffsetPolicy, Params, TimezoneResolver, TzfLookup,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod plot;

use plot::{render_chart_guard, ChartKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Ride summary and channel charts from TCX/GPX files", long_about = None)]
struct Cli {
    /// One .tcx course document and optionally one .gpx track log
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Functional threshold power in watts
    #[arg(long, env = "RIDESTATS_FTP")]
    ftp: Option<f64>,

    /// Seconds represented by one sample when scoring training stress
    #[arg(long)]
    sample_interval: Option<f64>,

    /// How the ride's UTC offset is chosen
    #[arg(long, value_enum)]
    offset_policy: Option<OffsetPolicyOpt>,

    /// How course and track samples are paired
    #[arg(long, value_enum)]
    merge: Option<MergeOpt>,

    /// Largest accepted time gap (seconds) between paired samples
    #[arg(long)]
    merge_tolerance: Option<f64>,

    /// Which document supplies the elevation channel
    #[arg(long, value_enum)]
    elevation_source: Option<ElevationOpt>,

    /// IANA zone to use instead of looking one up from the ride's position
    #[arg(long)]
    timezone: Option<String>,

    /// JSON file with analysis parameters (flags take precedence)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Output PNG chart path (defaults next to the course document)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG chart path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable chart generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Print the summary as JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Write the aligned sample streams to a CSV file
    #[arg(long, value_hint = ValueHint::FilePath)]
    csv: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OffsetPolicyOpt {
    AtInstant,
    Legacy,
}

impl From<OffsetPolicyOpt> for OffsetPolicy {
    fn from(value: OffsetPolicyOpt) -> Self {
        match value {
            OffsetPolicyOpt::AtInstant => OffsetPolicy::AtInstant,
            OffsetPolicyOpt::Legacy => OffsetPolicy::Legacy,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MergeOpt {
    Timestamp,
    Positional,
}

impl From<MergeOpt> for MergeStrategy {
    fn from(value: MergeOpt) -> Self {
        match value {
            MergeOpt::Timestamp => MergeStrategy::Timestamp,
            MergeOpt::Positional => MergeStrategy::Positional,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ElevationOpt {
    Auto,
    Course,
    Track,
}

impl From<ElevationOpt> for ElevationSource {
    fn from(value: ElevationOpt) -> Self {
        match value {
            ElevationOpt::Auto => ElevationSource::Auto,
            ElevationOpt::Course => ElevationSource::Course,
            ElevationOpt::Track => ElevationSource::Track,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let (course_path, track_path) = classify_inputs(&cli.inputs)?;
    let params = build_params(&cli)?;
    debug!("analysis parameters: {:?}", params);

    let resolver = match cli.timezone.as_deref() {
        Some(zone) => {
            info!("using timezone override {}", zone);
            TimezoneResolver::new(FixedZone(zone.to_string()))
        }
        None => TimezoneResolver::new(TzfLookup::new()),
    };

    let activity = load_activity(&course_path, track_path.as_deref(), &params, &resolver)
        .with_context(|| format!("failed to analyze {}", course_path.display()))?;

    if cli.json {
        let json = serde_json::to_string_pretty(activity.summary())?;
        println!("{}", json);
    } else {
        print!("{}", format_summary(&activity));
    }
    io::stdout().flush()?;

    if let Some(path) = cli.csv.as_ref() {
        write_streams_csv(&activity, path)?;
        info!("wrote sample streams to {}", path.display());
    }

    if !cli.no_plot {
        for (path, kind) in chart_targets(&cli, &course_path) {
            match render_chart_guard(&activity, &path, kind) {
                Ok(()) => info!("wrote chart to {}", path.display()),
                Err(err) => warn!("failed to render chart {}: {}", path.display(), err),
            }
        }
    }

    Ok(())
}

/// Splits the positional inputs into the course document and an optional
/// track document by extension.
fn classify_inputs(inputs: &[PathBuf]) -> Result<(PathBuf, Option<PathBuf>)> {
    let mut course = None;
    let mut track = None;
    for path in inputs {
        match DocumentKind::from_path(path) {
            Some(DocumentKind::Course) => {
                if course.replace(path.clone()).is_some() {
                    bail!("more than one .tcx course document supplied");
                }
            }
            Some(DocumentKind::Track) => {
                if track.replace(path.clone()).is_some() {
                    bail!("more than one .gpx track document supplied");
                }
            }
            None => bail!("unsupported input {} (expected .tcx or .gpx)", path.display()),
        }
    }
    let course = course.ok_or_else(|| anyhow!("a .tcx course document is required"))?;
    Ok((course, track))
}

fn build_params(cli: &Cli) -> Result<Params> {
    let mut params = match cli.config.as_ref() {
        Some(path) => load_config(path)?,
        None => Params::default(),
    };
    if let Some(ftp) = cli.ftp {
        params.ftp_w = ftp;
    }
    if let Some(interval) = cli.sample_interval {
        params.sample_interval_s = interval;
    }
    if let Some(policy) = cli.offset_policy {
        params.offset_policy = policy.into();
    }
    if let Some(merge) = cli.merge {
        params.merge = merge.into();
    }
    if let Some(tolerance) = cli.merge_tolerance {
        params.merge_tolerance_s = tolerance;
    }
    if let Some(source) = cli.elevation_source {
        params.elevation_source = source.into();
    }
    params.validate()?;
    Ok(params)
}

fn load_config(path: &Path) -> Result<Params> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn chart_targets(cli: &Cli, course_path: &Path) -> Vec<(PathBuf, ChartKind)> {
    let mut targets = Vec::new();
    if let Some(path) = cli.png.as_ref() {
        targets.push((path.clone(), ChartKind::Png));
    }
    if let Some(path) = cli.svg.as_ref() {
        targets.push((path.clone(), ChartKind::Svg));
    }
    if targets.is_empty() {
        targets.push((course_path.with_extension("png"), ChartKind::Png));
    }
    targets
}

fn write_streams_csv(activity: &Activity, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_stream_rows(activity, &mut writer)
}

fn write_stream_rows<W: Write>(activity: &Activity, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "time",
        "distance_mi",
        "elevation_ft",
        "speed_mph",
        "heart_rate_bpm",
        "cadence_rpm",
        "power_w",
        "latitude",
        "longitude",
        "temperature_f",
    ])?;

    let streams = activity.streams();
    let optional = |channel: Option<&[f64]>, i: usize| {
        channel
            .map(|values| format!("{:.6}", values[i]))
            .unwrap_or_default()
    };

    for i in 0..streams.len() {
        writer.write_record([
            streams.time()[i].to_rfc3339(),
            format!("{:.4}", streams.distance_mi()[i]),
            format!("{:.1}", streams.elevation_ft()[i]),
            format!("{:.1}", streams.speed_mph()[i]),
            streams.heart_rate_bpm()[i].to_string(),
            streams.cadence_rpm()[i].to_string(),
            streams.power_w()[i].to_string(),
            optional(streams.latitude(), i),
            optional(streams.longitude(), i),
            optional(streams.temperature_f(), i),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
