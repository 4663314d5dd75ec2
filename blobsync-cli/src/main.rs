//! blobsync - keep large binary dependencies in sync.
//!
//! Thin command-line front end over the `blobsync` library: argument
//! parsing, logging setup, the overwrite prompt, and a progress line.
//! Everything that touches manifests, packs, or the working tree lives in
//! the library.

mod progress;

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use dialoguer::Confirm;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use blobsync::config::{DEFAULT_MAX_RETRIES, DEFAULT_THREADS};
use blobsync::{
    resolve_cache_path, CancelToken, FolderFilter, OverwritePolicy, ProxySettings, SyncConfig,
    SyncError, SyncReport, SyncResult, Syncer,
};

use progress::{format_bytes, StatusLine};

/// Environment variable naming the pack cache directory. An empty value
/// disables the cache.
const CACHE_ENV: &str = "BLOBSYNC_CACHE";

#[derive(Parser)]
#[command(
    name = "blobsync",
    version,
    about = "Download and sync binary dependencies from pack manifests",
    after_help = "\
Environment variables:
  BLOBSYNC_CACHE    Pack cache directory (empty value disables the cache)
  HTTP_PROXY        Proxy for downloads when --proxy is not given"
)]
struct Cli {
    /// Root of the working tree to synchronize
    #[arg(long, default_value = ".", value_name = "DIR")]
    root: PathBuf,

    /// Number of parallel download workers
    #[arg(long, default_value_t = DEFAULT_THREADS, value_name = "N")]
    threads: usize,

    /// Times to retry a failing pack before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES, value_name = "N")]
    max_retries: u32,

    /// Print what would change without touching the tree
    #[arg(long)]
    dry_run: bool,

    /// Skip files under folders with this name (repeatable)
    #[arg(long = "exclude", value_name = "FOLDER")]
    excludes: Vec<String>,

    /// Re-include folders named by --exclude (repeatable)
    #[arg(long = "include", value_name = "FOLDER")]
    includes: Vec<String>,

    /// Ask before overwriting locally modified files
    #[arg(long, conflicts_with = "force")]
    prompt: bool,

    /// Overwrite locally modified files without asking
    #[arg(long)]
    force: bool,

    /// Cache downloaded packs in this directory
    #[arg(long, value_name = "DIR", conflicts_with = "no_cache")]
    cache: Option<PathBuf>,

    /// Do not read or write the pack cache
    #[arg(long)]
    no_cache: bool,

    /// Proxy for downloads, e.g. http://host:3128
    #[arg(long, value_name = "URL")]
    proxy: Option<String>,

    /// Username for the proxy
    #[arg(long, value_name = "USER")]
    proxy_user: Option<String>,

    /// Password for the proxy
    #[arg(long, value_name = "PASS")]
    proxy_password: Option<String>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "blobsync=info",
        1 => "blobsync=debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: &Cli) -> SyncResult<()> {
    let root = cli.root.canonicalize().map_err(|e| SyncError::ReadFailed {
        path: cli.root.clone(),
        source: e,
    })?;

    let overwrite = if cli.force {
        OverwritePolicy::Force
    } else if cli.prompt {
        OverwritePolicy::Prompt
    } else {
        OverwritePolicy::KeepUnchanged
    };

    let config = SyncConfig::new(&root)
        .with_threads(cli.threads)
        .with_max_retries(cli.max_retries)
        .with_overwrite(overwrite)
        .with_filter(FolderFilter::new(&cli.excludes, &cli.includes))
        .with_cache_dir(resolve_cache(cli, &root))
        .with_proxy(resolve_proxy(cli));

    let syncer = Syncer::new(config)?;
    let mut plan = syncer.plan()?;

    if cli.dry_run {
        let changes = plan.changes();
        if changes.is_empty() {
            println!("Dependencies are up to date.");
        } else {
            println!("Files that would change:");
            for change in &changes {
                println!("  {}", change);
            }
        }
        return Ok(());
    }

    if !plan.tampered().is_empty() && overwrite == OverwritePolicy::Prompt {
        println!("The following files have been modified locally:");
        for name in plan.tampered() {
            println!("  {}", name);
        }
        let answer = match Confirm::new()
            .with_prompt("Would you like to overwrite your changes?")
            .default(false)
            .interact()
        {
            Ok(answer) => answer,
            Err(e) => {
                // No usable terminal counts as "no".
                warn!(error = %e, "cannot prompt, keeping modified files");
                false
            }
        };
        plan.resolve_tampered(answer);
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "could not install interrupt handler");
    }

    let mut status = StatusLine::new();
    let result = syncer.apply(plan, &cancel, |snapshot| status.update(snapshot));
    status.finish();

    match result {
        Ok(report) => {
            print_summary(&report);
            Ok(())
        }
        Err(SyncError::TamperedFiles { names }) => {
            println!("The following files are modified and were not updated:");
            for name in &names {
                println!("  {}", name);
            }
            println!("Re-run with --force to overwrite them.");
            Err(SyncError::TamperedFiles { names })
        }
        Err(e) => Err(e),
    }
}

fn resolve_cache(cli: &Cli, root: &Path) -> Option<PathBuf> {
    if cli.no_cache {
        return None;
    }
    if cli.cache.is_some() {
        return cli.cache.clone();
    }
    match env::var_os(CACHE_ENV) {
        // Set-but-empty opts out, same as --no-cache.
        Some(value) if value.is_empty() => None,
        Some(value) => Some(PathBuf::from(value)),
        None => resolve_cache_path(root, None, false),
    }
}

fn resolve_proxy(cli: &Cli) -> Option<ProxySettings> {
    let url = cli
        .proxy
        .clone()
        .or_else(|| env::var("HTTP_PROXY").ok().filter(|v| !v.is_empty()))
        .or_else(|| env::var("http_proxy").ok().filter(|v| !v.is_empty()))?;

    let mut settings = ProxySettings::new(url);
    settings.username = cli.proxy_user.clone();
    settings.password = cli.proxy_password.clone();
    Some(settings)
}

fn print_summary(report: &SyncReport) {
    if report.downloaded == 0 && report.removed == 0 {
        println!("Dependencies are up to date.");
        return;
    }
    if report.downloaded > 0 {
        let mut line = format!(
            "Downloaded {} files ({} fetched",
            report.downloaded,
            format_bytes(report.bytes_fetched)
        );
        if report.bytes_cached > 0 {
            line.push_str(&format!(", {} from cache", format_bytes(report.bytes_cached)));
        }
        line.push_str(").");
        println!("{}", line);
    }
    if report.removed > 0 {
        println!("Removed {} obsolete files.", report.removed);
    }
    if !report.tampered_kept.is_empty() {
        println!(
            "Left {} locally modified files in place.",
            report.tampered_kept.len()
        );
    }
}
