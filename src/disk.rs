/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_ops::disk
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Guard package operations against running the filesystem
    dry: one batch-wide sufficiency check before any work, and
    a lighter per-package check before each install.

  Security / Safety Notes:
    Read-only. Queries free space via the injected probe; never
    deletes or reserves anything on disk.

  Dependencies:
    crate::metrics for requirements, crate::probe for free
    space, crate::failures for skipped-package records.

  Operational Scope:
    Invoked by the orchestrator ahead of package installation.
    Missing telemetry fails open; confirmed shortage blocks the
    batch (global) or skips the package (per-package).

  Revision History:
    2025-11-12 COD  Authored disk guard.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Fail-open and fail-closed outcomes kept distinct
    - Check path threaded explicitly between checks
    - Component breakdown logged for every shortage
============================================================*/

use std::path::{Path, PathBuf};

use crate::config::DiskConfig;
use crate::error::{Result, SynsyuError};
use crate::failures::{FailureLedger, FailureStage};
use crate::logger::Logger;
use crate::metrics::{read_record, ManifestMetrics, PackageMetrics, PackageMetricsSource};
use crate::probe::FreeSpaceProbe;
use crate::units::ByteStyle;

const CODE: &str = "DISK";
const MIB: u64 = 1024 * 1024;
const DEFAULT_CHECK_PATH: &str = "/";

/// Effective disk guard settings after config and CLI overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSettings {
    pub enabled: bool,
    pub min_free_bytes: u64,
    pub extra_margin_mb: u64,
    pub style: ByteStyle,
}

impl From<&DiskConfig> for DiskSettings {
    fn from(config: &DiskConfig) -> Self {
        Self {
            enabled: config.check,
            min_free_bytes: config.min_free_bytes,
            extra_margin_mb: config.extra_margin_mb,
            style: config.byte_style(),
        }
    }
}

/// Safety margin: baseline bytes plus extra MiB, raised to `declared` when larger.
pub fn compute_margin(min_free_bytes: u64, extra_margin_mb: u64, declared: u64) -> u64 {
    min_free_bytes
        .saturating_add(extra_margin_mb.saturating_mul(MIB))
        .max(declared)
}

/// Requirement versus availability for one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceBudget {
    pub download: u64,
    pub build: u64,
    pub install: u64,
    pub footprint: u64,
    pub margin: u64,
    pub required: u64,
    pub available: u64,
    pub path: PathBuf,
}

impl SpaceBudget {
    pub fn is_sufficient(&self) -> bool {
        self.available >= self.required
    }

    pub fn describe(&self, style: ByteStyle) -> String {
        format!(
            "required {} (download {}, build {}, install {}, peak {}, margin {}), available {} on {}",
            style.render(self.required),
            style.render(self.download),
            style.render(self.build),
            style.render(self.install),
            style.render(self.footprint),
            style.render(self.margin),
            style.render(self.available),
            self.path.display()
        )
    }
}

/// Result of a disk check.
///
/// `FailOpen` means the check could not be performed and work proceeds;
/// `Insufficient` is the only verdict that blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Disabled,
    FailOpen { reason: String },
    NothingToDo,
    Sufficient(SpaceBudget),
    Insufficient(SpaceBudget),
}

impl Verdict {
    pub fn allows_progress(&self) -> bool {
        !matches!(self, Verdict::Insufficient(_))
    }
}

/// State resolved by the global check and consumed by per-package checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceContext {
    pub checked_path: PathBuf,
}

impl Default for SpaceContext {
    fn default() -> Self {
        Self {
            checked_path: PathBuf::from(DEFAULT_CHECK_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalOutcome {
    pub verdict: Verdict,
    pub context: SpaceContext,
}

/// Packages cleared or skipped by [`DiskGuard::preflight`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreflightReport {
    pub approved: Vec<String>,
    pub skipped: Vec<String>,
}

/// Disk sufficiency checks over an injectable free-space probe.
pub struct DiskGuard<'a, P: FreeSpaceProbe> {
    settings: DiskSettings,
    probe: P,
    logger: &'a Logger,
}

impl<'a, P: FreeSpaceProbe> DiskGuard<'a, P> {
    pub fn new(settings: DiskSettings, probe: P, logger: &'a Logger) -> Self {
        Self {
            settings,
            probe,
            logger,
        }
    }

    /// Batch-wide check against the manifest at `manifest_path`.
    pub async fn check_manifest(&self, manifest_path: &Path) -> GlobalOutcome {
        if !self.settings.enabled {
            self.logger.debug(CODE, "Disk check disabled; skipping");
            return GlobalOutcome {
                verdict: Verdict::Disabled,
                context: SpaceContext::default(),
            };
        }
        let record = read_record(manifest_path);
        if record.is_none() {
            self.logger.debug(
                CODE,
                format!("No metrics record readable from {}", manifest_path.display()),
            );
        }
        self.check_record(record.as_deref()).await
    }

    /// Batch-wide check against a Reader record
    /// (`download|build|install|transient|min_free|available|path`).
    pub async fn check_record(&self, record: Option<&str>) -> GlobalOutcome {
        let mut context = SpaceContext::default();
        let verdict = self.evaluate_record(record, &mut context).await;
        GlobalOutcome { verdict, context }
    }

    async fn evaluate_record(&self, record: Option<&str>, context: &mut SpaceContext) -> Verdict {
        if !self.settings.enabled {
            self.logger.debug(CODE, "Disk check disabled; skipping");
            return Verdict::Disabled;
        }

        let record = match record {
            Some(record) if !record.trim().is_empty() => record,
            _ => {
                return self.fail_open(
                    "Manifest metrics unavailable; skipping disk check".to_string(),
                );
            }
        };

        let metrics: ManifestMetrics = match record.parse() {
            Ok(metrics) => metrics,
            Err(malformed) => {
                return self.fail_open(format!(
                    "Manifest size metrics malformed ({malformed}); skipping disk check"
                ));
            }
        };

        let footprint = metrics.transient_size_total;
        if footprint == 0 {
            self.logger.info(
                CODE,
                "Manifest declares no disk footprint; nothing to verify",
            );
            return Verdict::NothingToDo;
        }

        let margin = compute_margin(
            self.settings.min_free_bytes,
            self.settings.extra_margin_mb,
            metrics.min_free_bytes,
        );
        let path = if metrics.space_checked_path.is_empty() {
            PathBuf::from(DEFAULT_CHECK_PATH)
        } else {
            PathBuf::from(&metrics.space_checked_path)
        };

        let available = if metrics.available_space_bytes > 0 {
            metrics.available_space_bytes
        } else {
            match self.probe.available_bytes(&path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    return self.fail_open(format!(
                        "Unable to determine free space on {} ({err}); skipping disk check",
                        path.display()
                    ));
                }
            }
        };

        context.checked_path = path.clone();

        let budget = SpaceBudget {
            download: metrics.download_size_total,
            build: metrics.build_size_total,
            install: metrics.install_size_total,
            footprint,
            margin,
            required: footprint.saturating_add(margin),
            available,
            path,
        };

        if budget.is_sufficient() {
            self.logger.info(
                CODE,
                format!("Disk space sufficient: {}", budget.describe(self.settings.style)),
            );
            Verdict::Sufficient(budget)
        } else {
            self.logger.error(
                CODE,
                format!("Insufficient disk space: {}", budget.describe(self.settings.style)),
            );
            Verdict::Insufficient(budget)
        }
    }

    /// Check a single package before it is installed.
    pub async fn check_package<S: PackageMetricsSource>(
        &self,
        package: &str,
        source: &S,
        context: &SpaceContext,
    ) -> Verdict {
        if !self.settings.enabled {
            return Verdict::Disabled;
        }

        let record = match source.lookup(package) {
            Some(record) if !record.trim().is_empty() => record,
            _ => {
                return self.fail_open(format!(
                    "{package}: no size metrics; skipping per-package disk check"
                ));
            }
        };

        let metrics = PackageMetrics::parse_lenient(&record);
        if metrics.component_total() == 0 {
            return self.fail_open(format!(
                "{package}: no size telemetry; skipping per-package disk check"
            ));
        }

        let margin = compute_margin(self.settings.min_free_bytes, self.settings.extra_margin_mb, 0);
        let footprint = metrics.footprint();
        let path = context.checked_path.clone();

        let available = match self.probe.available_bytes(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                return self.fail_open(format!(
                    "{package}: unable to determine free space on {} ({err}); proceeding",
                    path.display()
                ));
            }
        };

        let budget = SpaceBudget {
            download: metrics.download_size_total,
            build: metrics.build_size_total,
            install: metrics.install_size_total,
            footprint,
            margin,
            required: footprint.saturating_add(margin),
            available,
            path,
        };

        if budget.is_sufficient() {
            self.logger.debug(
                CODE,
                format!("{package}: disk space ok, {}", budget.describe(self.settings.style)),
            );
            Verdict::Sufficient(budget)
        } else {
            self.logger.error(
                CODE,
                format!(
                    "{package}: insufficient disk space, {}",
                    budget.describe(self.settings.style)
                ),
            );
            Verdict::Insufficient(budget)
        }
    }

    /// Run the global check once, then gate each package against the resolved path.
    ///
    /// A global shortage is returned as [`SynsyuError::InsufficientSpace`]; a
    /// per-package shortage records a failure and skips only that package.
    pub async fn preflight<S: PackageMetricsSource>(
        &self,
        manifest_path: &Path,
        packages: &[String],
        source: &S,
        ledger: &mut FailureLedger,
    ) -> Result<PreflightReport> {
        let global = self.check_manifest(manifest_path).await;
        if let Verdict::Insufficient(budget) = global.verdict {
            return Err(SynsyuError::InsufficientSpace {
                required: budget.required,
                available: budget.available,
                path: budget.path,
            });
        }

        let mut report = PreflightReport::default();
        for package in packages {
            let verdict = self.check_package(package, source, &global.context).await;
            if verdict.allows_progress() {
                report.approved.push(package.clone());
                continue;
            }
            if let Verdict::Insufficient(budget) = verdict {
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
            report.skipped.push(package.clone());
        }
        Ok(report)
    }

    fn fail_open(&self, reason: String) -> Verdict {
        self.logger.warn(CODE, &reason);
        Verdict::FailOpen { reason }
    }
}
