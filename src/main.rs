/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_ops::main
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Entry point for Syn-Syu Ops. Guards package operations
    against insufficient disk space and drives flatpak/fwupd
    updates on behalf of the Syn-Syu orchestrator.

  Security / Safety Notes:
    Operates within user privileges. Executes df, flatpak, and
    fwupdmgr only; reads the manifest, writes logs and the
    failure ledger to operator-controlled paths.

  Dependencies:
    clap for CLI parsing, chrono for session stamps.

  Operational Scope:
    Invoked by the Syn-Syu Bash layer before and during package
    batches, or manually by operators for previews.

  Revision History:
    2025-10-28 COD  Authored Syn-Syu Core runtime.
    2025-11-12 COD  Split disk guard and app runners into Ops.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Structured logging following Synavera cadence
    - Configurable execution via CLI and config file
============================================================*/

mod apps;
mod config;
mod disk;
mod error;
mod failures;
mod logger;
mod metrics;
mod probe;
mod units;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};

use apps::{AppRunner, RunMode, RunOutcome, SystemExecutor};
use config::SynsyuConfig;
use disk::{DiskGuard, DiskSettings, SpaceContext, Verdict};
use error::{Result, SynsyuError};
use failures::{FailureLedger, FailureStage};
use logger::Logger;
use metrics::Manifest;
use probe::SystemProbe;
use units::{format_bytes, ByteStyle};

/// Command-line arguments for Syn-Syu-Ops.
#[derive(Debug, Parser)]
#[command(
    name = "Syn-Syu-Ops",
    version,
    author = "Synavera Systems",
    about = "Disk guard and application update runners for Syn-Syu"
)]
struct Cli {
    /// Override configuration file path.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Override manifest path.
    #[arg(long, value_name = "PATH", global = true)]
    manifest: Option<PathBuf>,
    /// Explicit log file path.
    #[arg(long, value_name = "PATH", global = true)]
    log: Option<PathBuf>,
    /// Explicit failure ledger path.
    #[arg(long, value_name = "PATH", global = true)]
    failures: Option<PathBuf>,
    /// Enable verbose logging to stderr.
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Disk space guards.
    Disk {
        #[command(flatten)]
        overrides: DiskOverrides,
        #[command(subcommand)]
        action: DiskAction,
    },
    /// Application update runners.
    Apps {
        #[command(subcommand)]
        action: AppAction,
    },
    /// Render a byte count the way disk guard logs do.
    FormatBytes {
        value: String,
        /// Print the raw byte count.
        #[arg(long, action = ArgAction::SetTrue)]
        raw: bool,
    },
}

#[derive(Debug, clap::Args)]
struct DiskOverrides {
    /// Disable all disk checks for this invocation.
    #[arg(long, action = ArgAction::SetTrue)]
    no_disk_check: bool,
    /// Baseline free-space margin in bytes.
    #[arg(long, value_name = "BYTES")]
    min_free_bytes: Option<u64>,
    /// Additional free-space margin in MiB.
    #[arg(long, value_name = "MIB")]
    extra_margin_mb: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum DiskAction {
    /// Batch-wide check; exits with the reserved status on shortage.
    Check {
        /// Check a metrics record instead of reading the manifest.
        #[arg(long, value_name = "RECORD")]
        record: Option<String>,
    },
    /// Per-package checks against a previously resolved path.
    Package {
        #[arg(required = true, value_name = "PKG")]
        packages: Vec<String>,
        /// Filesystem path resolved by `disk check`.
        #[arg(long, value_name = "PATH")]
        checked_path: Option<PathBuf>,
    },
    /// Global check followed by per-package checks; prints cleared packages.
    Preflight {
        #[arg(required = true, value_name = "PKG")]
        packages: Vec<String>,
    },
    /// Print the manifest metrics record (`download|build|install|transient|margin|available|path`).
    Metrics,
}

#[derive(Debug, Subcommand)]
enum AppAction {
    /// Update Flatpak applications.
    Flatpak {
        /// List pending updates without applying them.
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Update device firmware through fwupd.
    Fwupd {
        /// List pending updates without applying them.
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("[Syn-Syu-Ops] {}", err);
            err.exit_code()
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Command::FormatBytes { value, raw } = &cli.command {
        println!("{}", format_bytes(value, ByteStyle::from_human_readable(!raw)));
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = SynsyuConfig::load_from_optional_path(cli.config.as_deref())?;
    let manifest_path = cli
        .manifest
        .clone()
        .unwrap_or_else(|| config.manifest_path());

    let session_stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let log_path = cli
        .log
        .clone()
        .unwrap_or_else(|| config.log_dir().join(format!("ops_{session_stamp}.log")));
    let failures_path = cli
        .failures
        .clone()
        .unwrap_or_else(|| config.log_dir().join(format!("failures_{session_stamp}.json")));
    let logger = Logger::new(Some(log_path), cli.verbose)?;
    logger.info("INIT", "Syn-Syu Ops awakening.");

    let mut ledger = FailureLedger::default();
    let result = match cli.command {
        Command::Disk { overrides, action } => {
            apply_overrides(&mut config, &overrides);
            run_disk(&config, &manifest_path, action, &logger, &mut ledger).await
        }
        Command::Apps { action } => run_apps(&config, action, &logger, &mut ledger).await,
        Command::FormatBytes { .. } => Ok(ExitCode::SUCCESS),
    };

    close_session(result, &ledger, &failures_path, &logger)
}

/// Persist failures and seal the log; the command's own error wins over
/// bookkeeping errors, and the log is finalized either way.
fn close_session(
    result: Result<ExitCode>,
    ledger: &FailureLedger,
    failures_path: &Path,
    logger: &Logger,
) -> Result<ExitCode> {
    for entry in ledger.entries() {
        logger.warn(
            "FAILURE",
            format!("{} ({:?}): {}", entry.subject, entry.stage, entry.reason),
        );
    }
    let persisted = ledger.persist(failures_path, logger);
    if let Err(err) = &persisted {
        logger.error("FAILURE", format!("Failed to persist failure ledger: {err}"));
    }
    if let Err(SynsyuError::InsufficientSpace { .. }) = &result {
        logger.error("DISK", "Aborting run: insufficient disk space");
    }
    let finalized = logger.finalize();

    let code = result?;
    persisted?;
    finalized?;
    Ok(code)
}

fn apply_overrides(config: &mut SynsyuConfig, overrides: &DiskOverrides) {
    if overrides.no_disk_check {
        config.disk.check = false;
    }
    if let Some(bytes) = overrides.min_free_bytes {
        config.disk.min_free_bytes = bytes;
    }
    if let Some(mib) = overrides.extra_margin_mb {
        config.disk.extra_margin_mb = mib;
    }
}

async fn run_disk(
    config: &SynsyuConfig,
    manifest_path: &Path,
    action: DiskAction,
    logger: &Logger,
    ledger: &mut FailureLedger,
) -> Result<ExitCode> {
    let guard = DiskGuard::new(
        DiskSettings::from(&config.disk),
        SystemProbe::from(config.disk.probe),
        logger,
    );

    match action {
        DiskAction::Check { record } => {
            let outcome = match record {
                Some(record) => guard.check_record(Some(&record)).await,
                None => guard.check_manifest(manifest_path).await,
            };
            if let Verdict::Insufficient(budget) = outcome.verdict {
                return Err(SynsyuError::InsufficientSpace {
                    required: budget.required,
                    available: budget.available,
                    path: budget.path,
                });
            }
            println!("{}", outcome.context.checked_path.display());
            Ok(ExitCode::SUCCESS)
        }
        DiskAction::Package {
            packages,
            checked_path,
        } => {
            let context = checked_path
                .map(|checked_path| SpaceContext { checked_path })
                .unwrap_or_default();
            let source = load_package_source(manifest_path, logger);
            let mut any_short = false;
            for package in &packages {
                if let Verdict::Insufficient(budget) =
                    guard.check_package(package, &source, &context).await
                {
                    any_short = true;
                    ledger.record(
                        package,
                        FailureStage::DiskSpace,
                        format!(
                            "insufficient disk space: required {} available {} on {}",
                            budget.required,
                            budget.available,
                            budget.path.display()
                        ),
                    );
                }
            }
            Ok(if any_short {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        DiskAction::Preflight { packages } => {
            let source = load_package_source(manifest_path, logger);
            let report = guard
                .preflight(manifest_path, &packages, &source, ledger)
                .await?;
            for package in &report.approved {
                println!("{package}");
            }
            if !report.skipped.is_empty() {
                logger.warn(
                    "DISK",
                    format!(
                        "Skipped for disk space: {}",
                        report.skipped.join(", ")
                    ),
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        DiskAction::Metrics => {
            if let Some(record) = metrics::read_record(manifest_path) {
                println!("{record}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_package_source(manifest_path: &Path, logger: &Logger) -> Option<Manifest> {
    match Manifest::load(manifest_path) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            logger.debug("DISK", format!("Per-package metrics unavailable: {err}"));
            None
        }
    }
}

async fn run_apps(
    config: &SynsyuConfig,
    action: AppAction,
    logger: &Logger,
    ledger: &mut FailureLedger,
) -> Result<ExitCode> {
    let runner = AppRunner::new(&config.apps, SystemExecutor, logger);
    let (label, outcome) = match action {
        AppAction::Flatpak { dry_run } => ("flatpak", runner.flatpak(mode(dry_run), ledger).await?),
        AppAction::Fwupd { dry_run } => ("fwupd", runner.fwupd(mode(dry_run), ledger).await?),
    };

    match &outcome {
        RunOutcome::Preview(lines) => {
            println!("→ {label}: {} pending update(s)", lines.len());
            for line in lines {
                println!("  {line}");
            }
        }
        RunOutcome::UpToDate => println!("→ {label}: no pending updates"),
        RunOutcome::Updated => println!("→ {label}: updates applied"),
        RunOutcome::Unavailable => println!("→ {label}: not installed, skipped"),
        RunOutcome::Disabled => println!("→ {label}: disabled by configuration"),
        RunOutcome::PreviewUnavailable(reason) => {
            eprintln!("→ {label}: could not list updates ({reason})")
        }
        RunOutcome::Failed(reason) => eprintln!("→ {label}: update failed ({reason})"),
    }

    Ok(if outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn mode(dry_run: bool) -> RunMode {
    if dry_run {
        RunMode::DryRun
    } else {
        RunMode::Apply
    }
}
