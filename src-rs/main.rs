mod ad;
mod adb;
mod annotate;
mod command;
mod config;
mod controller;
mod error;
mod explore;
mod geometry;
mod logcat;
mod node;
mod phash;
mod report;
mod session;
mod snapshot;
mod task;
#[cfg(test)]
mod testing;
mod unlocatable;
mod window;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{resolve_screen_dir, AuditConfig};
use crate::explore::HASH_CUTOFF;
use crate::logcat::{split_by_tag, LogTags};
use crate::phash::compare_screenshots;
use crate::task::FarOffRequest;

#[derive(Parser, Debug)]
#[command(
    name = "nav-audit",
    version,
    about = "Screen-reader navigation audits for Android screens"
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    /// JSON config file (thresholds, adb, device paths, log tags)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Unlocatable, unlabelled, live-region and coverage audit of an ad screen
    #[command(name = "analyze-ad")]
    AnalyzeAd(AnalyzeAdArgs),
    /// Sequential sweep for far-off and ineffective elements
    #[command(name = "far-off")]
    FarOff(FarOffArgs),
    /// Compare two screenshots by average hash
    #[command(name = "hash-diff")]
    HashDiff(HashDiffArgs),
    /// Check a saved event log for a change in the active window
    #[command(name = "window-changed")]
    WindowChanged(WindowChangedArgs),
    /// Print the merged defect report of a screen
    Report(ReportArgs),
}

#[derive(Args, Debug)]
struct DeviceArgs {
    /// adb device serial (overrides the config)
    #[arg(long)]
    device: Option<String>,
}

#[derive(Args, Debug)]
struct AnalyzeAdArgs {
    /// Screen directory (relative names resolve under NAV_AUDIT_OUT_DIR)
    #[arg(long)]
    screen_dir: PathBuf,
    /// HAR capture of the app's network traffic
    #[arg(long)]
    har: PathBuf,
    #[command(flatten)]
    device: DeviceArgs,
}

#[derive(Args, Debug)]
struct FarOffArgs {
    #[arg(long)]
    screen_dir: PathBuf,
    /// Comma-separated indices into the selected actions (default: all)
    #[arg(long, value_delimiter = ',')]
    actions: Vec<usize>,
    /// Look for this node instead of sweeping
    #[arg(long)]
    target_xpath: Option<String>,
    /// Use jump navigation instead of single steps
    #[arg(long, action = ArgAction::SetTrue)]
    jump: bool,
    /// Navigate backwards
    #[arg(long, action = ArgAction::SetTrue)]
    backward: bool,
    /// Override the far-off step threshold
    #[arg(long)]
    far_off_steps: Option<usize>,
    #[command(flatten)]
    device: DeviceArgs,
}

#[derive(Args, Debug)]
struct HashDiffArgs {
    before: PathBuf,
    after: PathBuf,
    /// Distances below this are ineffective
    #[arg(long, default_value_t = HASH_CUTOFF)]
    cutoff: u32,
}

#[derive(Args, Debug)]
struct WindowChangedArgs {
    /// Saved `adb logcat -v tag` output
    log: PathBuf,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Screen directory
    screen_dir: PathBuf,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut config = AuditConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::AnalyzeAd(args) => command_analyze_ad(args, &mut config),
        Commands::FarOff(args) => command_far_off(args, &mut config),
        Commands::HashDiff(args) => command_hash_diff(args),
        Commands::WindowChanged(args) => command_window_changed(args, &config.tags),
        Commands::Report(args) => command_report(args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "analyze-ad",
            "description": "Touch unlocatable pass + API coverage pass over an ad screen; rewrites the report."
        }),
        json!({
            "name": "far-off",
            "description": "Sequential sweep (or target search); appends far-off/ineffective ratios."
        }),
        json!({
            "name": "hash-diff",
            "description": "Average-hash distance between two screenshots and the effect verdict."
        }),
        json!({
            "name": "window-changed",
            "description": "Run the window-change detector over a saved event log."
        }),
        json!({
            "name": "report",
            "description": "Print a screen's merged defect report."
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn apply_device(config: &mut AuditConfig, args: DeviceArgs) {
    if let Some(serial) = args.device {
        config.adb.serial = Some(serial);
    }
}

fn command_analyze_ad(args: AnalyzeAdArgs, config: &mut AuditConfig) -> Result<()> {
    apply_device(config, args.device);
    let screen_dir = resolve_screen_dir(&args.screen_dir);
    let summary = task::analyze_ad_screen(config, &screen_dir, &args.har)?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn command_far_off(args: FarOffArgs, config: &mut AuditConfig) -> Result<()> {
    apply_device(config, args.device);
    if let Some(steps) = args.far_off_steps {
        config.thresholds.far_off_steps = steps;
    }
    let request = FarOffRequest {
        actions: args.actions,
        target_xpath: args.target_xpath,
        jump_mode: args.jump,
        backward: args.backward,
    };
    let screen_dir = resolve_screen_dir(&args.screen_dir);
    let summary = task::far_off_elements(config, &screen_dir, &request)?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn command_hash_diff(args: HashDiffArgs) -> Result<()> {
    let diff = compare_screenshots(&args.before, &args.after, args.cutoff)
        .context("failed to compare screenshots")?;
    let payload = json!({
        "before": args.before,
        "after": args.after,
        "before_hash": diff.before,
        "after_hash": diff.after,
        "distance": diff.distance,
        "cutoff": diff.cutoff,
        "effect": diff.effect,
    });
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

fn command_window_changed(args: WindowChangedArgs, tags: &LogTags) -> Result<()> {
    let raw = fs::read_to_string(&args.log)
        .with_context(|| format!("failed to read log: {}", args.log.display()))?;
    let logs = split_by_tag(&raw, &tags.all());
    let changed = window::is_window_changed(&logs, &tags.events);
    println!(
        "{}",
        serde_json::to_string(&json!({ "log": args.log, "window_changed": changed }))?
    );
    Ok(())
}

fn command_report(args: ReportArgs) -> Result<()> {
    let screen_dir = resolve_screen_dir(&args.screen_dir);
    let path = snapshot::AddressBook::new(&screen_dir).error_result();
    let merged = report::load_merged(&path)
        .with_context(|| format!("failed to read report: {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&Value::Object(merged))?);
    Ok(())
}
