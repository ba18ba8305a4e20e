//! trackseg CLI - Debug tool for staypoint/tripleg segmentation
//!
//! Usage:
//!   trackseg-cli staypoints <folder> [--output <file>] [--config <file>]
//!   trackseg-cli segment <folder> [--output <file>] [--config <file>]
//!
//! Every GPX file in the folder is treated as the trace of one user. The tool
//! prints what was detected per user and can write the result tables as JSON.

use clap::{Parser, Subcommand};
use gpx::{read, Gpx};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use geo::Point;
use trackseg::{
    generate_staypoints, generate_triplegs, Diagnostic, DistanceMetric, Positionfix,
    Positionfixes, Staypoint, StaypointConfig, StaypointMethod, Tripleg, TriplegConfig,
    TriplegMethod, UserId,
};

#[derive(Parser)]
#[command(name = "trackseg-cli")]
#[command(about = "Debug tool for staypoint and tripleg segmentation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args)]
struct Thresholds {
    /// JSON file with `staypoints` and `triplegs` sections; flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Staypoint method
    #[arg(long)]
    method: Option<String>,

    /// Distance metric ("haversine" or "euclidean")
    #[arg(long)]
    distance_metric: Option<String>,

    /// Staypoint distance threshold (meters for haversine)
    #[arg(long)]
    dist_threshold: Option<f64>,

    /// Minimum staypoint duration in minutes
    #[arg(long)]
    time_threshold: Option<f64>,

    /// Maximum tracking gap in minutes
    #[arg(long)]
    gap_threshold: Option<f64>,

    /// Also evaluate the last open staypoint window
    #[arg(long)]
    include_last: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect staypoints only
    Staypoints {
        /// Folder containing GPX files
        folder: PathBuf,

        /// Write the results as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        thresholds: Thresholds,
    },

    /// Detect staypoints, then triplegs between them
    Segment {
        /// Folder containing GPX files
        folder: PathBuf,

        /// Write the results as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Tripleg segmentation method
        #[arg(long)]
        tripleg_method: Option<String>,

        #[command(flatten)]
        thresholds: Thresholds,
    },
}

/// Layout of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    staypoints: StaypointConfig,
    triplegs: TriplegConfig,
}

#[derive(Serialize)]
struct Report<'a> {
    positionfixes: &'a [Positionfix],
    staypoints: &'a [Staypoint],
    #[serde(skip_serializing_if = "Option::is_none")]
    triplegs: Option<&'a [Tripleg]>,
    diagnostics: Vec<String>,
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Staypoints {
            folder,
            output,
            thresholds,
        } => run_staypoints(&folder, output.as_deref(), &thresholds, cli.verbose),
        Commands::Segment {
            folder,
            output,
            tripleg_method,
            thresholds,
        } => run_segment(
            &folder,
            output.as_deref(),
            tripleg_method.as_deref(),
            &thresholds,
            cli.verbose,
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Merge the config file and the command-line overrides.
fn load_configs(
    thresholds: &Thresholds,
    tripleg_method: Option<&str>,
) -> Result<(StaypointConfig, TriplegConfig), String> {
    let file = match &thresholds.config {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
            serde_json::from_str::<ConfigFile>(&content).map_err(|e| e.to_string())?
        }
        None => ConfigFile::default(),
    };

    let mut staypoints = file.staypoints;
    let mut triplegs = file.triplegs;

    if let Some(method) = &thresholds.method {
        staypoints.method = method.parse::<StaypointMethod>().map_err(|e| e.to_string())?;
    }
    if let Some(metric) = &thresholds.distance_metric {
        staypoints.distance_metric = metric.parse::<DistanceMetric>().map_err(|e| e.to_string())?;
    }
    if let Some(value) = thresholds.dist_threshold {
        staypoints.dist_threshold = value;
    }
    if let Some(value) = thresholds.time_threshold {
        staypoints.time_threshold = value;
    }
    if let Some(value) = thresholds.gap_threshold {
        staypoints.gap_threshold = value;
        triplegs.gap_threshold = value;
    }
    if thresholds.include_last {
        staypoints.include_last = true;
    }
    if let Some(method) = tripleg_method {
        triplegs.method = method.parse::<TriplegMethod>().map_err(|e| e.to_string())?;
    }

    staypoints.validate().map_err(|e| e.to_string())?;
    triplegs.validate().map_err(|e| e.to_string())?;
    Ok((staypoints, triplegs))
}

/// Load all GPX files of a folder as one positionfix table, one user per file.
fn load_gpx_folder(folder: &Path, verbose: bool) -> Result<(Positionfixes, Vec<String>), String> {
    println!("\n{}", "=".repeat(60));
    println!("Loading GPX files from: {}", folder.display());
    println!("{}", "=".repeat(60));

    let mut paths: Vec<PathBuf> = fs::read_dir(folder)
        .map_err(|e| format!("Error reading folder: {}", e))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "gpx"))
        .collect();
    paths.sort();

    let mut rows = Vec::new();
    let mut names = Vec::new();

    for path in &paths {
        if verbose {
            println!("\n  Processing: {}", path.display());
        }
        let user_id = names.len() as UserId;
        match parse_gpx_file(path, user_id, rows.len() as i64) {
            Ok(fixes) => {
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown")
                    .to_string();
                println!("  [OK] user {} = {} - {} positionfixes", user_id, name, fixes.len());
                rows.extend(fixes);
                names.push(name);
            }
            Err(e) => {
                eprintln!("  [ERR] Failed to parse {}: {}", path.display(), e);
            }
        }
    }

    println!("\nLoaded {} users, {} positionfixes", names.len(), rows.len());
    let pfs = Positionfixes::new(rows).map_err(|e| e.to_string())?;
    Ok((pfs, names))
}

/// Parse a single GPX file into positionfixes. Points without a timestamp are skipped.
fn parse_gpx_file(path: &Path, user_id: UserId, first_id: i64) -> Result<Vec<Positionfix>, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let reader = BufReader::new(file);
    let gpx: Gpx = read(reader).map_err(|e| e.to_string())?;

    let mut fixes = Vec::new();
    for track in &gpx.tracks {
        for segment in &track.segments {
            for pt in &segment.points {
                let Some(time) = &pt.time else {
                    continue;
                };
                let stamp = time.format().map_err(|e| e.to_string())?;
                let tracked_at = DateTime::parse_from_rfc3339(&stamp)
                    .map_err(|e| e.to_string())?
                    .with_timezone(&Utc);

                let location = Point::new(pt.point().x(), pt.point().y());
                let mut fix = Positionfix::new(
                    first_id + fixes.len() as i64,
                    user_id,
                    tracked_at,
                    location,
                );
                fix.elevation = pt.elevation;
                fixes.push(fix);
            }
        }
    }

    if fixes.is_empty() {
        return Err("No timestamped track points found".to_string());
    }
    Ok(fixes)
}

/// Run staypoint detection
fn run_staypoints(
    folder: &Path,
    output: Option<&Path>,
    thresholds: &Thresholds,
    verbose: bool,
) -> Result<(), String> {
    let (mut config, _) = load_configs(thresholds, None)?;
    config.print_progress = verbose;
    let (pfs, names) = load_gpx_folder(folder, verbose)?;

    println!("\n{}", "=".repeat(60));
    println!("STAYPOINT DETECTION");
    println!("{}", "=".repeat(60));
    print_staypoint_config(&config);

    let out = generate_staypoints(&pfs, &config).map_err(|e| e.to_string())?;
    print_diagnostics(&out.diagnostics);
    print_staypoints(&out.staypoints, &names, verbose);

    if let Some(path) = output {
        write_report(
            path,
            &Report {
                positionfixes: out.positionfixes.rows(),
                staypoints: &out.staypoints,
                triplegs: None,
                diagnostics: out.diagnostics.iter().map(|d| d.to_string()).collect(),
            },
        )?;
    }
    Ok(())
}

/// Run staypoint detection followed by tripleg segmentation
fn run_segment(
    folder: &Path,
    output: Option<&Path>,
    tripleg_method: Option<&str>,
    thresholds: &Thresholds,
    verbose: bool,
) -> Result<(), String> {
    let (mut stp_config, tpl_config) = load_configs(thresholds, tripleg_method)?;
    stp_config.print_progress = verbose;
    let (pfs, names) = load_gpx_folder(folder, verbose)?;

    println!("\n{}", "=".repeat(60));
    println!("SEGMENTATION");
    println!("{}", "=".repeat(60));
    print_staypoint_config(&stp_config);
    println!("  tripleg method: {}", tpl_config.method);
    println!("  tripleg gap_threshold: {} min", tpl_config.gap_threshold);

    println!("\n[Step 1] Detecting staypoints...");
    let stps = generate_staypoints(&pfs, &stp_config).map_err(|e| e.to_string())?;
    print_staypoints(&stps.staypoints, &names, verbose);

    println!("\n[Step 2] Segmenting triplegs...");
    let tpls = generate_triplegs(&stps.positionfixes, Some(stps.staypoints.as_slice()), &tpl_config)
        .map_err(|e| e.to_string())?;
    print_triplegs(&tpls.triplegs, &names, verbose);

    let diagnostics: Vec<Diagnostic> = stps
        .diagnostics
        .iter()
        .chain(tpls.diagnostics.iter())
        .cloned()
        .collect();
    print_diagnostics(&diagnostics);

    let unlinked = tpls
        .positionfixes
        .iter()
        .filter(|f| f.staypoint_id.is_none() && f.tripleg_id.is_none())
        .count();
    println!("\n{}", "-".repeat(60));
    println!(
        "RESULTS: {} staypoints, {} triplegs, {} of {} positionfixes unlinked",
        stps.staypoints.len(),
        tpls.triplegs.len(),
        unlinked,
        tpls.positionfixes.len()
    );
    println!("{}", "-".repeat(60));

    if let Some(path) = output {
        write_report(
            path,
            &Report {
                positionfixes: tpls.positionfixes.rows(),
                staypoints: &stps.staypoints,
                triplegs: Some(&tpls.triplegs),
                diagnostics: diagnostics.iter().map(|d| d.to_string()).collect(),
            },
        )?;
    }
    Ok(())
}

fn user_name(names: &[String], user_id: UserId) -> &str {
    usize::try_from(user_id)
        .ok()
        .and_then(|i| names.get(i))
        .map(|s| s.as_str())
        .unwrap_or("unknown")
}

fn print_staypoint_config(config: &StaypointConfig) {
    println!("\n[Config]");
    println!("  method: {}", config.method);
    println!("  distance_metric: {}", config.distance_metric);
    println!("  dist_threshold: {}", config.dist_threshold);
    println!("  time_threshold: {} min", config.time_threshold);
    println!("  gap_threshold: {} min", config.gap_threshold);
    println!("  include_last: {}", config.include_last);
}

fn print_staypoints(staypoints: &[Staypoint], names: &[String], verbose: bool) {
    println!("  Found {} staypoints", staypoints.len());
    if !verbose {
        return;
    }
    for stp in staypoints {
        println!(
            "    #{} {} {} -> {} ({} min) at [{:.5}, {:.5}]",
            stp.id,
            user_name(names, stp.user_id),
            stp.started_at.format("%Y-%m-%d %H:%M:%S"),
            stp.finished_at.format("%H:%M:%S"),
            stp.duration().num_minutes(),
            stp.location.y(),
            stp.location.x()
        );
    }
}

fn print_triplegs(triplegs: &[Tripleg], names: &[String], verbose: bool) {
    println!("  Found {} triplegs", triplegs.len());
    if !verbose {
        return;
    }
    for tpl in triplegs {
        println!(
            "    #{} {} {} -> {} ({} positionfixes)",
            tpl.id,
            user_name(names, tpl.user_id),
            tpl.started_at.format("%Y-%m-%d %H:%M:%S"),
            tpl.finished_at.format("%H:%M:%S"),
            tpl.fix_count()
        );
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        println!("  [WARN] {}", diagnostic);
    }
}

fn write_report(path: &Path, report: &Report) -> Result<(), String> {
    let file = File::create(path).map_err(|e| e.to_string())?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report).map_err(|e| e.to_string())?;
    writer.flush().map_err(|e| e.to_string())?;
    println!("\nWrote results to {}", path.display());
    Ok(())
}
