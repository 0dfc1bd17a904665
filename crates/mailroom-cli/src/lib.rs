#![forbid(unsafe_code)]
//! Command-line driver for snapshot scoping and scrubbing.
//!
//! Summaries are written to stdout as pretty JSON; logs go to stderr.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use mailroom_share::{
    self as share, ProjectScopeResult, ScrubPreset, ScrubSummary, ShareConfig, ShareError,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Share(#[from] ShareError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(
    name = "mailroom",
    version,
    about = "Scope and scrub Mailroom snapshot databases"
)]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset (overrides MAILROOM_LOG_LEVEL).
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply a scrub preset to a snapshot in place.
    Scrub(ScrubArgs),
    /// Keep only the named projects in a snapshot.
    Scope(ScopeArgs),
    /// Copy a snapshot, then scope and scrub the copy.
    Export(ExportArgs),
    /// Redact secret-shaped text read from a file or stdin.
    Scan(ScanArgs),
}

#[derive(Args, Debug)]
pub struct ScrubArgs {
    pub snapshot: PathBuf,
    #[arg(long)]
    pub preset: Option<String>,
}

#[derive(Args, Debug)]
pub struct ScopeArgs {
    pub snapshot: PathBuf,
    #[arg(long = "project", short = 'p')]
    pub projects: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    pub source: PathBuf,
    #[arg(long, short = 'o')]
    pub output: PathBuf,
    #[arg(long = "project", short = 'p')]
    pub projects: Vec<String>,
    #[arg(long)]
    pub preset: Option<String>,
    /// Skip the scrub pass (scope only).
    #[arg(long = "no-scrub", default_value_t = false)]
    pub no_scrub: bool,
    /// Replace an existing output file.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Input file; reads stdin when omitted.
    pub input: Option<PathBuf>,
    /// Emit `{"replacements": n, "text": ...}` instead of the bare text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct ExportReport {
    pub output: String,
    pub scope: ProjectScopeResult,
    pub scrub: Option<ScrubSummary>,
}

#[derive(Debug, Serialize)]
struct ScanReport<'a> {
    replacements: i64,
    text: &'a str,
}

pub fn run() -> i32 {
    let cli = Cli::parse();
    let config = match ShareConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            let err = CliError::from(err);
            emit_error(&err);
            return err_exit_code(&err);
        }
    };
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match execute(cli, &config, &mut out) {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            err_exit_code(&err)
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

const fn err_exit_code(err: &CliError) -> i32 {
    match err {
        CliError::InvalidArgument(_) | CliError::Share(ShareError::InvalidScrubPreset { .. }) => 2,
        _ => 1,
    }
}

fn emit_error(err: &CliError) {
    eprintln!("error: {err}");
}

/// Run one parsed command, writing its report to `out`.
pub fn execute(cli: Cli, config: &ShareConfig, out: &mut impl Write) -> CliResult<()> {
    match cli.command {
        Commands::Scrub(args) => {
            let preset = resolve_preset(args.preset.as_deref(), config)?;
            let summary = share::scrub_snapshot(&args.snapshot, preset)?;
            write_json(out, &summary)
        }
        Commands::Scope(args) => {
            let projects = resolve_projects(args.projects, config);
            let result = share::apply_project_scope(&args.snapshot, &projects)?;
            write_json(out, &result)
        }
        Commands::Export(args) => {
            let report = export(&args, config)?;
            write_json(out, &report)
        }
        Commands::Scan(args) => scan(&args, out),
    }
}

fn resolve_preset(flag: Option<&str>, config: &ShareConfig) -> CliResult<ScrubPreset> {
    flag.map_or(Ok(config.scrub_preset), |raw| {
        share::normalize_scrub_preset(raw).map_err(CliError::from)
    })
}

fn resolve_projects(flag: Vec<String>, config: &ShareConfig) -> Vec<String> {
    if flag.is_empty() {
        config.projects.clone()
    } else {
        flag
    }
}

fn export(args: &ExportArgs, config: &ShareConfig) -> CliResult<ExportReport> {
    // Validate before touching the filesystem.
    let preset = resolve_preset(args.preset.as_deref(), config)?;
    let scrub = config.scrub && !args.no_scrub;
    if !args.source.exists() {
        return Err(ShareError::SnapshotNotFound {
            path: args.source.display().to_string(),
        }
        .into());
    }
    if same_file(&args.source, &args.output) {
        return Err(CliError::InvalidArgument(
            "output must differ from the source snapshot".to_string(),
        ));
    }
    if args.output.exists() && !args.force {
        return Err(CliError::InvalidArgument(format!(
            "output {} already exists (use --force to replace it)",
            args.output.display()
        )));
    }

    if args.output.exists() {
        std::fs::remove_file(&args.output)?;
    }
    share::create_snapshot(&args.source, &args.output)?;

    let result = (|| {
        let mut snapshot = share::Snapshot::open(&args.output)?;
        let projects = resolve_projects(args.projects.clone(), config);
        let scope = snapshot.apply_scope(&projects)?;
        let scrub = if scrub {
            Some(snapshot.scrub(preset)?)
        } else {
            None
        };
        Ok::<_, ShareError>((scope, scrub))
    })();

    match result {
        Ok((scope, scrub)) => Ok(ExportReport {
            output: args.output.display().to_string(),
            scope,
            scrub,
        }),
        Err(err) => {
            // Never leave a half-processed copy behind.
            let _ = std::fs::remove_file(&args.output);
            Err(err.into())
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn scan(args: &ScanArgs, out: &mut impl Write) -> CliResult<()> {
    let input = match &args.input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let scan = share::scan_for_secrets(&input);
    tracing::info!(replacements = scan.replacements, "scanned input");
    if args.json {
        write_json(
            out,
            &ScanReport {
                replacements: scan.replacements,
                text: &scan.text,
            },
        )
    } else {
        out.write_all(scan.text.as_bytes())?;
        Ok(())
    }
}

fn write_json(out: &mut impl Write, value: &impl Serialize) -> CliResult<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
