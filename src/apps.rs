/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_ops::apps
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Drive flatpak and fwupd updates alongside pacman/AUR work,
    with a dry-run preview mode and failure recording.

  Security / Safety Notes:
    Executes flatpak/fwupdmgr with the invoking user's
    privileges; no escalation is attempted here.

  Dependencies:
    tokio::process for async command execution.

  Operational Scope:
    Called by the orchestrator after package updates, or on
    demand via `synsyu-ops apps`.

  Revision History:
    2025-11-12 COD  Authored flatpak and fwupd runners.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Absent tools are skipped, not treated as failures
    - Every failed apply lands in the failure ledger
    - Flag selection isolated from execution for auditability
============================================================*/

use std::process::Stdio;

use tokio::process::Command;

use crate::config::AppsConfig;
use crate::error::{Result, SynsyuError};
use crate::failures::{FailureLedger, FailureStage};
use crate::logger::Logger;
use crate::probe::map_spawn_error;

const FLATPAK: &str = "flatpak";
const FWUPDMGR: &str = "fwupdmgr";
/// fwupdmgr exits with 2 when there is nothing to do.
const FWUPD_NOTHING_TO_DO: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    DryRun,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Turned off in configuration.
    Disabled,
    /// Tool not installed.
    Unavailable,
    /// Pending updates listed by a dry run.
    Preview(Vec<String>),
    UpToDate,
    Updated,
    /// A dry run could not list updates; nothing was attempted.
    PreviewUnavailable(String),
    Failed(String),
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Executes external update tools.
#[allow(async_fn_in_trait)]
pub trait ToolExecutor {
    async fn execute(&self, program: &str, args: &[&str]) -> Result<ToolOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl ToolExecutor for SystemExecutor {
    async fn execute(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| map_spawn_error(err, program))?;

        Ok(ToolOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Arguments for a flatpak invocation in the given mode.
pub fn flatpak_args(mode: RunMode, config: &AppsConfig) -> Vec<&'static str> {
    let mut args = match mode {
        RunMode::DryRun => vec![
            "remote-ls",
            "--updates",
            "--columns=application,version,origin",
        ],
        RunMode::Apply => {
            let mut args = vec!["update", "--noninteractive"];
            if config.assume_yes {
                args.push("-y");
            }
            args
        }
    };
    if config.flatpak_user {
        args.push("--user");
    }
    args
}

/// Arguments for the fwupdmgr step that inspects or applies updates.
pub fn fwupd_args(mode: RunMode, config: &AppsConfig) -> Vec<&'static str> {
    match mode {
        RunMode::DryRun => vec!["get-updates", "--no-unreported-check"],
        RunMode::Apply => {
            let mut args = vec!["update", "--no-reboot-check"];
            if config.assume_yes {
                args.push("--assume-yes");
            }
            args
        }
    }
}

/// Runs the application update tools and records their failures.
pub struct AppRunner<'a, E: ToolExecutor> {
    config: &'a AppsConfig,
    executor: E,
    logger: &'a Logger,
}

impl<'a, E: ToolExecutor> AppRunner<'a, E> {
    pub fn new(config: &'a AppsConfig, executor: E, logger: &'a Logger) -> Self {
        Self {
            config,
            executor,
            logger,
        }
    }

    pub async fn flatpak(&self, mode: RunMode, ledger: &mut FailureLedger) -> Result<RunOutcome> {
        if !self.config.flatpak {
            self.logger.debug("FLATPAK", "Flatpak updates disabled");
            return Ok(RunOutcome::Disabled);
        }

        let args = flatpak_args(mode, self.config);
        let Some(output) = self.invoke("FLATPAK", FLATPAK, &args).await? else {
            return Ok(RunOutcome::Unavailable);
        };

        let outcome = match (mode, output.status) {
            (RunMode::DryRun, 0) => preview_or_current(&output.stdout),
            (RunMode::DryRun, status) => {
                RunOutcome::PreviewUnavailable(failure_reason(status, &output.stderr))
            }
            (RunMode::Apply, 0) => RunOutcome::Updated,
            (RunMode::Apply, status) => RunOutcome::Failed(failure_reason(status, &output.stderr)),
        };
        Ok(self.settle("FLATPAK", FailureStage::Flatpak, outcome, ledger))
    }

    pub async fn fwupd(&self, mode: RunMode, ledger: &mut FailureLedger) -> Result<RunOutcome> {
        if !self.config.fwupd {
            self.logger.debug("FWUPD", "Firmware updates disabled");
            return Ok(RunOutcome::Disabled);
        }

        if mode == RunMode::Apply && self.config.fwupd_refresh {
            match self.invoke("FWUPD", FWUPDMGR, &["refresh", "--force"]).await? {
                None => return Ok(RunOutcome::Unavailable),
                Some(refresh) if refresh.status != 0 && refresh.status != FWUPD_NOTHING_TO_DO => {
                    self.logger.warn(
                        "FWUPD",
                        format!(
                            "Metadata refresh failed ({}); continuing with cached metadata",
                            failure_reason(refresh.status, &refresh.stderr)
                        ),
                    );
                }
                Some(_) => {}
            }
        }

        let args = fwupd_args(mode, self.config);
        let Some(output) = self.invoke("FWUPD", FWUPDMGR, &args).await? else {
            return Ok(RunOutcome::Unavailable);
        };

        let outcome = match (mode, output.status) {
            (_, FWUPD_NOTHING_TO_DO) => RunOutcome::UpToDate,
            (RunMode::DryRun, 0) => preview_or_current(&output.stdout),
            (RunMode::DryRun, status) => {
                RunOutcome::PreviewUnavailable(failure_reason(status, &output.stderr))
            }
            (RunMode::Apply, 0) => RunOutcome::Updated,
            (RunMode::Apply, status) => RunOutcome::Failed(failure_reason(status, &output.stderr)),
        };
        Ok(self.settle("FWUPD", FailureStage::Fwupd, outcome, ledger))
    }

    /// `Ok(None)` when the tool is not installed.
    async fn invoke(&self, code: &str, program: &str, args: &[&str]) -> Result<Option<ToolOutput>> {
        self.logger
            .debug(code, format!("Running {program} {}", args.join(" ")));
        match self.executor.execute(program, args).await {
            Ok(output) => Ok(Some(output)),
            Err(SynsyuError::CommandMissing { .. }) => {
                self.logger
                    .info(code, format!("{program} not installed; skipping"));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn settle(
        &self,
        code: &str,
        stage: FailureStage,
        outcome: RunOutcome,
        ledger: &mut FailureLedger,
    ) -> RunOutcome {
        match &outcome {
            RunOutcome::Failed(reason) => {
                self.logger.error(code, format!("Update failed: {reason}"));
                ledger.record(code_subject(stage), stage, reason.clone());
            }
            RunOutcome::PreviewUnavailable(reason) => {
                self.logger
                    .warn(code, format!("Could not list pending updates: {reason}"));
            }
            RunOutcome::Preview(lines) => {
                self.logger
                    .info(code, format!("{} pending update(s)", lines.len()));
            }
            RunOutcome::UpToDate => self.logger.info(code, "No pending updates"),
            RunOutcome::Updated => self.logger.info(code, "Updates applied"),
            RunOutcome::Disabled | RunOutcome::Unavailable => {}
        }
        outcome
    }
}

fn code_subject(stage: FailureStage) -> &'static str {
    match stage {
        FailureStage::Flatpak => FLATPAK,
        FailureStage::Fwupd => FWUPDMGR,
        FailureStage::DiskSpace => "disk",
    }
}

fn preview_or_current(stdout: &str) -> RunOutcome {
    let lines: Vec<String> = stdout
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        RunOutcome::UpToDate
    } else {
        RunOutcome::Preview(lines)
    }
}

fn failure_reason(status: i32, stderr: &str) -> String {
    let tail = stderr.lines().last().unwrap_or("").trim();
    if tail.is_empty() {
        format!("exit status {status}")
    } else {
        format!("exit status {status}: {tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted results and remembers every invocation.
    struct ScriptedExecutor {
        results: Mutex<VecDeque<Result<ToolOutput>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(results: Vec<Result<ToolOutput>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ToolExecutor for &ScriptedExecutor {
        async fn execute(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{program} {}", args.join(" ")));
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ToolOutput::default()))
        }
    }

    fn output(status: i32, stdout: &str, stderr: &str) -> Result<ToolOutput> {
        Ok(ToolOutput {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        })
    }

    fn missing(command: &str) -> Result<ToolOutput> {
        Err(SynsyuError::CommandMissing {
            command: command.into(),
        })
    }

    #[test]
    fn flatpak_flags_follow_config() {
        let mut config = AppsConfig::default();
        assert_eq!(
            flatpak_args(RunMode::Apply, &config),
            vec!["update", "--noninteractive", "-y"]
        );
        config.assume_yes = false;
        config.flatpak_user = true;
        assert_eq!(
            flatpak_args(RunMode::Apply, &config),
            vec!["update", "--noninteractive", "--user"]
        );
        assert_eq!(
            flatpak_args(RunMode::DryRun, &config),
            vec![
                "remote-ls",
                "--updates",
                "--columns=application,version,origin",
                "--user"
            ]
        );
    }

    #[test]
    fn fwupd_flags_follow_config() {
        let mut config = AppsConfig::default();
        assert_eq!(
            fwupd_args(RunMode::Apply, &config),
            vec!["update", "--no-reboot-check", "--assume-yes"]
        );
        config.assume_yes = false;
        assert_eq!(
            fwupd_args(RunMode::Apply, &config),
            vec!["update", "--no-reboot-check"]
        );
        assert_eq!(
            fwupd_args(RunMode::DryRun, &config),
            vec!["get-updates", "--no-unreported-check"]
        );
    }

    #[tokio::test]
    async fn flatpak_dry_run_lists_pending_updates() {
        let executor = ScriptedExecutor::new(vec![output(
            0,
            "org.mozilla.firefox\t131.0\tflathub\n\norg.gimp.GIMP\t2.10.38\tflathub\n",
            "",
        )]);
        let config = AppsConfig::default();
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        let runner = AppRunner::new(&config, &executor, &logger);

        let outcome = runner.flatpak(RunMode::DryRun, &mut ledger).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Preview(vec![
                "org.mozilla.firefox\t131.0\tflathub".to_string(),
                "org.gimp.GIMP\t2.10.38\tflathub".to_string(),
            ])
        );
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn flatpak_apply_failure_is_recorded() {
        let executor = ScriptedExecutor::new(vec![output(1, "", "warning\nerror: remote unreachable")]);
        let config = AppsConfig::default();
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        let runner = AppRunner::new(&config, &executor, &logger);

        let outcome = runner.flatpak(RunMode::Apply, &mut ledger).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Failed("exit status 1: error: remote unreachable".into())
        );
        assert!(outcome.is_failure());
        assert_eq!(ledger.entries()[0].stage, FailureStage::Flatpak);
        assert_eq!(ledger.entries()[0].subject, "flatpak");
    }

    #[tokio::test]
    async fn flatpak_dry_run_failure_is_not_recorded() {
        let executor = ScriptedExecutor::new(vec![output(1, "", "error: no remotes configured")]);
        let config = AppsConfig::default();
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        let runner = AppRunner::new(&config, &executor, &logger);

        let outcome = runner.flatpak(RunMode::DryRun, &mut ledger).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::PreviewUnavailable("exit status 1: error: no remotes configured".into())
        );
        assert!(!outcome.is_failure());
        assert!(ledger.is_empty());
        assert!(logger
            .captured()
            .iter()
            .any(|line| line.contains("[WARN] [FLATPAK] Could not list pending updates")));
    }

    #[tokio::test]
    async fn fwupd_dry_run_failure_is_not_recorded() {
        let executor = ScriptedExecutor::new(vec![output(1, "", "Failed to connect to daemon")]);
        let config = AppsConfig::default();
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        let runner = AppRunner::new(&config, &executor, &logger);

        let outcome = runner.fwupd(RunMode::DryRun, &mut ledger).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::PreviewUnavailable("exit status 1: Failed to connect to daemon".into())
        );
        assert!(!outcome.is_failure());
        assert!(ledger.is_empty());
        assert_eq!(executor.calls(), vec!["fwupdmgr get-updates --no-unreported-check"]);
    }

    #[tokio::test]
    async fn missing_tool_is_skipped() {
        let executor = ScriptedExecutor::new(vec![missing("flatpak")]);
        let config = AppsConfig::default();
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        let runner = AppRunner::new(&config, &executor, &logger);

        let outcome = runner.flatpak(RunMode::Apply, &mut ledger).await.unwrap();
        assert_eq!(outcome, RunOutcome::Unavailable);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn disabled_runner_never_executes() {
        let executor = ScriptedExecutor::new(Vec::new());
        let config = AppsConfig {
            fwupd: false,
            ..AppsConfig::default()
        };
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        let runner = AppRunner::new(&config, &executor, &logger);

        let outcome = runner.fwupd(RunMode::Apply, &mut ledger).await.unwrap();
        assert_eq!(outcome, RunOutcome::Disabled);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn fwupd_nothing_to_do_is_success() {
        let executor = ScriptedExecutor::new(vec![
            output(0, "", ""),
            output(FWUPD_NOTHING_TO_DO, "No updatable devices", ""),
        ]);
        let config = AppsConfig::default();
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        let runner = AppRunner::new(&config, &executor, &logger);

        let outcome = runner.fwupd(RunMode::Apply, &mut ledger).await.unwrap();
        assert_eq!(outcome, RunOutcome::UpToDate);
        assert_eq!(
            executor.calls(),
            vec![
                "fwupdmgr refresh --force".to_string(),
                "fwupdmgr update --no-reboot-check --assume-yes".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn fwupd_refresh_failure_only_warns() {
        let executor = ScriptedExecutor::new(vec![
            output(1, "", "Failed to download metadata"),
            output(0, "Successfully installed firmware", ""),
        ]);
        let config = AppsConfig::default();
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        let runner = AppRunner::new(&config, &executor, &logger);

        let outcome = runner.fwupd(RunMode::Apply, &mut ledger).await.unwrap();
        assert_eq!(outcome, RunOutcome::Updated);
        assert!(ledger.is_empty());
        assert!(logger
            .captured()
            .iter()
            .any(|line| line.contains("[WARN] [FWUPD] Metadata refresh failed")));
    }

    #[tokio::test]
    async fn fwupd_dry_run_skips_refresh() {
        let executor = ScriptedExecutor::new(vec![output(0, "Framework Laptop\n  BIOS 3.05\n", "")]);
        let config = AppsConfig::default();
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        let runner = AppRunner::new(&config, &executor, &logger);

        let outcome = runner.fwupd(RunMode::DryRun, &mut ledger).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Preview(ref lines) if lines.len() == 2));
        assert_eq!(
            executor.calls(),
            vec!["fwupdmgr get-updates --no-unreported-check".to_string()]
        );
    }

    #[tokio::test]
    async fn fwupd_apply_failure_is_recorded() {
        let executor = ScriptedExecutor::new(vec![output(0, "", ""), output(1, "", "")]);
        let config = AppsConfig::default();
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        let runner = AppRunner::new(&config, &executor, &logger);

        let outcome = runner.fwupd(RunMode::Apply, &mut ledger).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed("exit status 1".into()));
        assert_eq!(ledger.entries()[0].stage, FailureStage::Fwupd);
    }
}
