//! hdfs-backup - Command-line interface for the backup engine.
//!
//! `backup` copies files modified in a time window and prints the minimum date
//! for the next run on stdout. `verify` compares a remote tree with its backup.
//!
//! Exit status: 0 on success, 1 when a backup aborts or a verify pass finds
//! discrepancies, 2 on bad configuration.

mod logger;

use anyhow::Context;
use chrono::{DateTime, Local, TimeZone};
use clap::{Args, Parser, Subcommand};
use hdfs_backup_engine::{
    classify, format_bytes, plan_backup, BackupConfig, BackupDriver, BackupSummary, ByteBudget,
    ChecksumEngine, DateSelector, DiscrepancySink, EngineError, ErrorClass, LocalDirFs, NameFilter,
    NoPreserveSet, PermissionScripts, Phase, ProgressCallback, ProgressUpdate, RemoteFs, RemotePath,
    TimeWindow, VerifyConfig, VerifyDriver, VerifyReport, VerifySource, WebHdfs, BACKUP_PREFIX,
    DEFAULT_BLOCK_SIZE, VERIFY_PREFIX,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

const EXIT_FATAL: i32 = 1;
const EXIT_CONFIG: i32 = 2;

/// hdfs-backup - incremental backup and verification of a remote filesystem
#[derive(Parser, Debug)]
#[command(name = "hdfs-backup")]
#[command(version)]
#[command(about = "Back up a remote filesystem to local disk and verify the copy")]
struct Cli {
    #[command(flatten)]
    remote: RemoteArgs,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

/// Where the remote namespace is served from.
#[derive(Args, Debug, Clone, Default)]
struct RemoteArgs {
    /// WebHDFS endpoint of the namenode, e.g. http://namenode:50070
    #[arg(long, global = true, env = "WEBHDFS_URL", value_name = "URL")]
    webhdfs: Option<String>,

    /// User name sent to WebHDFS
    #[arg(long, global = true, env = "WEBHDFS_USER", value_name = "USER")]
    user: Option<String>,

    /// Serve the remote namespace from a local directory instead of WebHDFS
    #[arg(long, global = true, value_name = "PATH")]
    remote_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy files modified in a time window, oldest first
    Backup(BackupArgs),
    /// Compare remote files with their local copies
    Verify(VerifyArgs),
}

#[derive(Args, Debug, Clone)]
struct BackupArgs {
    /// Remote directory to back up
    #[arg(long, value_name = "PATH")]
    hdfs_path: String,

    /// Local directory mirroring the remote namespace
    #[arg(long, value_name = "PATH")]
    local_path: PathBuf,

    /// Where displaced local copies are moved before being overwritten
    #[arg(long, value_name = "PATH")]
    preserve_path: PathBuf,

    /// File of path substrings that are overwritten without preserving
    #[arg(long, value_name = "FILE")]
    no_preserve: Option<PathBuf>,

    /// File of warehouse table names to skip
    #[arg(long, value_name = "FILE")]
    ignore_tables: Option<PathBuf>,

    /// Log what would be copied without touching local disk
    #[arg(long)]
    dry_run: bool,

    /// Start of the window: yesterday, last-day, last-week or epoch seconds
    #[arg(long, value_name = "DATE")]
    date: DateSelector,

    /// Skip files modified after this epoch time (default: now)
    #[arg(long, value_name = "SECS")]
    max_date: Option<i64>,

    /// Seconds to sleep after each file
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    sleep: u64,

    /// Stop before copying more than this many bytes (0 = unlimited)
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    max_bytes: u64,

    /// Do not re-copy files whose local size and mtime already match
    #[arg(long)]
    skip_unchanged: bool,

    /// Expected remote block size
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u64,

    /// Directory for hdfs-mkdirs.sh and hdfs-chmods.sh
    #[arg(long, value_name = "DIR", default_value = ".")]
    scripts_dir: PathBuf,

    /// Do not write the permission scripts
    #[arg(long)]
    no_scripts: bool,

    /// Append integrity findings to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct VerifyArgs {
    /// Remote directory to verify
    #[arg(
        long,
        value_name = "PATH",
        required_unless_present = "from_file",
        conflicts_with = "from_file"
    )]
    hdfs_path: Option<String>,

    /// File listing remote paths to verify, one per line
    #[arg(long, value_name = "FILE")]
    from_file: Option<PathBuf>,

    /// Local directory mirroring the remote namespace
    #[arg(long, value_name = "PATH")]
    local_path: PathBuf,

    /// File of warehouse table names to skip
    #[arg(long, value_name = "FILE")]
    ignore_tables: Option<PathBuf>,

    /// Skip files modified after this epoch time
    #[arg(long, value_name = "SECS")]
    max_date: Option<i64>,

    /// Expected remote block size; files with another size are skipped
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u64,

    /// Append integrity findings to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

/// CLI implementation of ProgressCallback, writing to stderr
struct CliProgress {
    start_time: Instant,
}

impl CliProgress {
    fn new() -> Self {
        CliProgress {
            start_time: Instant::now(),
        }
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn progress_bar(percent: u64) -> String {
        let filled = (percent.min(100) / 5) as usize;
        format!("[{}{}]", "=".repeat(filled), " ".repeat(20 - filled))
    }
}

impl ProgressCallback for CliProgress {
    fn on_backup_started(&self, run_id: Uuid, candidates: usize, total_bytes: u64) {
        eprintln!("starting backup {}...", run_id);
        eprintln!("  Number of files to backup = {}", candidates);
        eprintln!("  Total bytes to backup = {}", format_bytes(total_bytes));
    }

    fn on_progress(&self, update: &ProgressUpdate) {
        eprintln!(
            "progress: {} copied {}, {}% done, tstamp={}",
            Self::progress_bar(update.percent),
            format_bytes(update.copied_bytes),
            update.percent,
            update.tstamp
        );
    }

    fn on_backup_completed(&self, summary: &BackupSummary) {
        eprintln!();
        eprintln!("backup completed...");
        eprintln!(
            "Summary: {} copied ({}), {} preserved, {} overwritten in place, {} unchanged",
            summary.files_copied,
            format_bytes(summary.bytes_copied),
            summary.preserved,
            summary.preservation_skipped,
            summary.unchanged_skipped
        );
        if summary.checksum_errors > 0 || summary.unverified > 0 {
            eprintln!(
                "Checksums: {} errors, {} not verified",
                summary.checksum_errors, summary.unverified
            );
        }
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));
    }
}

/// Parse arguments, then run the selected command
fn main() {
    let cli = Cli::parse();

    if let Err(e) = logger::init(&cli.log_level) {
        eprintln!("Error: failed to initialize logging: {}", e);
    }

    let exit_code = match &cli.command {
        Command::Backup(args) => match prepare_backup(&cli.remote, args, &Local::now()) {
            Err(e) => exit_code(Phase::Startup, &e),
            Ok(backup) => match execute_backup(&backup) {
                Ok(next_min_date) => {
                    println!("{}", next_min_date);
                    0
                }
                Err(e) => {
                    if let Some(resume) = resume_point(&e, &backup.window) {
                        println!("{}", resume);
                    }
                    exit_code(Phase::Copy, &e)
                }
            },
        },
        Command::Verify(args) => match prepare_verify(&cli.remote, args) {
            Err(e) => exit_code(Phase::Startup, &e),
            Ok(verify) => match execute_verify(&verify) {
                Ok(report) if report.is_clean() => 0,
                Ok(_) => EXIT_FATAL,
                Err(e) => exit_code(Phase::Verification, &e),
            },
        },
    };

    std::process::exit(exit_code);
}

/// Where the scheduler should resume after a failed backup, if the run got far
/// enough to say: the last processed timestamp, or the window start.
fn resume_point(err: &anyhow::Error, window: &TimeWindow) -> Option<i64> {
    err.downcast_ref::<EngineError>().and_then(|e| e.resume_from(window))
}

/// Print the error and pick the exit status.
fn exit_code(phase: Phase, err: &anyhow::Error) -> i32 {
    eprintln!("Error: {:#}", err);

    let engine_error = err.downcast_ref::<EngineError>();
    let class = match engine_error {
        Some(e) => classify(phase, e),
        None if phase == Phase::Startup => ErrorClass::Configuration,
        None => ErrorClass::FatalRun,
    };
    match class {
        ErrorClass::Configuration => EXIT_CONFIG,
        ErrorClass::FatalRun | ErrorClass::TransientPerPath => EXIT_FATAL,
    }
}

fn open_remote(args: &RemoteArgs, block_size: u64) -> anyhow::Result<Box<dyn RemoteFs>> {
    if let Some(dir) = &args.remote_dir {
        let remote = LocalDirFs::new(dir, block_size)?;
        return Ok(Box::new(remote));
    }
    match &args.webhdfs {
        Some(url) => Ok(Box::new(WebHdfs::new(url, args.user.clone())?)),
        None => Err(EngineError::Config(
            "no remote filesystem: pass --webhdfs URL (or WEBHDFS_URL) or --remote-dir PATH"
                .to_string(),
        )
        .into()),
    }
}

fn open_sink(
    prefix: &'static str,
    report: Option<&Path>,
) -> anyhow::Result<DiscrepancySink<Box<dyn Write>>> {
    match report {
        Some(path) => Ok(DiscrepancySink::append_to(prefix, path)?),
        None => Ok(DiscrepancySink::stdout(prefix)),
    }
}

fn describe_epoch(secs: i64) -> String {
    match Local.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.to_rfc2822(),
        None => secs.to_string(),
    }
}

/// A validated backup, ready to run.
struct PreparedBackup {
    config: BackupConfig,
    window: TimeWindow,
    remote: Box<dyn RemoteFs>,
    filter: NameFilter,
    no_preserve: NoPreserveSet,
    engine: ChecksumEngine,
    report: Option<PathBuf>,
}

/// Validate arguments and load every input file. Nothing is copied yet.
fn prepare_backup<Tz: TimeZone>(
    remote_args: &RemoteArgs,
    args: &BackupArgs,
    now: &DateTime<Tz>,
) -> anyhow::Result<PreparedBackup> {
    let mut config = BackupConfig::new(
        RemotePath::new(&args.hdfs_path),
        args.local_path.clone(),
        args.preserve_path.clone(),
        args.date,
    );
    config.ignore_tables_file = args.ignore_tables.clone();
    config.no_preserve_file = args.no_preserve.clone();
    config.dry_run = args.dry_run;
    config.max_date = args.max_date;
    config.sleep = Duration::from_secs(args.sleep);
    config.max_bytes = args.max_bytes;
    config.skip_unchanged = args.skip_unchanged;
    config.block_size = args.block_size;
    config.scripts_dir = (!args.no_scripts).then(|| args.scripts_dir.clone());
    config.validate()?;

    let window = config.window(now)?;
    let filter = config.name_filter()?;
    let no_preserve = config.no_preserve()?;
    let engine = config.checksum_engine()?;
    let remote = open_remote(remote_args, config.block_size)?;

    let root = remote
        .stat(&config.remote_root)
        .with_context(|| format!("cannot read remote path {}", config.remote_root))?;
    if !root.is_dir {
        let reason = format!("{} is not a directory", config.remote_root);
        return Err(EngineError::Config(reason).into());
    }

    Ok(PreparedBackup {
        config,
        window,
        remote,
        filter,
        no_preserve,
        engine,
        report: args.report.clone(),
    })
}

/// Walk, then copy. Returns the minimum date for the next run.
fn execute_backup(backup: &PreparedBackup) -> anyhow::Result<i64> {
    let config = &backup.config;
    let mut sink = open_sink(BACKUP_PREFIX, backup.report.as_deref())?;

    info!("min date = {}", describe_epoch(backup.window.min));
    info!("max date = {}", describe_epoch(backup.window.max));

    let mut scripts = match &config.scripts_dir {
        Some(dir) => Some(PermissionScripts::create(dir)?),
        None => None,
    };
    let remote = &*backup.remote;
    let root = &config.remote_root;
    let (candidates, stats) = match scripts.as_mut() {
        Some(scripts) => plan_backup(remote, &backup.filter, root, backup.window, scripts),
        None => plan_backup(remote, &backup.filter, root, backup.window, &mut ()),
    };
    if let Some(scripts) = scripts {
        scripts.finish().context("failed to write permission scripts")?;
    }
    info!("Skipped {} files due to ignored tables", stats.ignored_tables.count());

    let driver = BackupDriver::new(
        remote,
        &config.local_root,
        &config.preserve_root,
        &backup.no_preserve,
        backup.engine,
        config.options(),
    );
    let progress = CliProgress::new();
    let summary = driver.run(
        &candidates,
        ByteBudget::new(config.max_bytes),
        Some(&progress),
        &mut sink,
    )?;

    Ok(summary.outcome.next_min_date(&backup.window))
}

/// A validated verify pass, ready to run.
struct PreparedVerify {
    config: VerifyConfig,
    source: VerifySource,
    remote: Box<dyn RemoteFs>,
    filter: NameFilter,
    engine: ChecksumEngine,
    report: Option<PathBuf>,
}

fn prepare_verify(remote_args: &RemoteArgs, args: &VerifyArgs) -> anyhow::Result<PreparedVerify> {
    let config = VerifyConfig {
        remote_root: args.hdfs_path.as_ref().map(RemotePath::new),
        from_file: args.from_file.clone(),
        local_root: args.local_path.clone(),
        ignore_tables_file: args.ignore_tables.clone(),
        max_date: args.max_date,
        block_size: args.block_size,
    };
    let source = config.source()?;
    let filter = config.name_filter()?;
    let engine = config.checksum_engine()?;
    let remote = open_remote(remote_args, config.block_size)?;

    Ok(PreparedVerify {
        config,
        source,
        remote,
        filter,
        engine,
        report: args.report.clone(),
    })
}

fn execute_verify(verify: &PreparedVerify) -> anyhow::Result<VerifyReport> {
    let mut sink = open_sink(VERIFY_PREFIX, verify.report.as_deref())?;
    let driver = VerifyDriver::new(
        &*verify.remote,
        &verify.filter,
        &verify.config.local_root,
        verify.engine,
        verify.config.options(),
    );
    let report = driver.verify(&verify.source, &mut sink);

    eprintln!(
        "Verified {} files: {} matched, {} discrepancies, {} without remote checksum",
        report.checked,
        report.matched,
        report.discrepancies.len(),
        report.unverified
    );
    if report.skipped_too_new + report.skipped_block_size + report.remote_errors > 0 {
        eprintln!(
            "Skipped: {} too new, {} non-default block size, {} unreadable",
            report.skipped_too_new, report.skipped_block_size, report.remote_errors
        );
    }
    Ok(report)
}
