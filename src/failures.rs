/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_ops::failures
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Record packages and runners that failed or were skipped so
    the orchestrator can report them at the end of a run.

  Security / Safety Notes:
    Ledger is written to operator-controlled paths; entries hold
    package names and short reasons only.

  Dependencies:
    serde for JSON serialization, chrono for timestamps.

  Operational Scope:
    Fed by the disk guard (skipped packages) and the app runners
    (failed updates); persisted once per session.

  Revision History:
    2025-11-12 COD  Authored failure ledger.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Append-only in memory, single write at session end
    - Every failure carries its stage and reason
============================================================*/

use std::fs::File;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{Result, SynsyuError};
use crate::logger::Logger;

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    DiskSpace,
    Flatpak,
    Fwupd,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub subject: String,
    pub stage: FailureStage,
    pub reason: String,
    pub recorded_at: String,
}

/// In-memory collection of failures for the current session.
#[derive(Debug, Default)]
pub struct FailureLedger {
    entries: Vec<FailureRecord>,
}

impl FailureLedger {
    pub fn record(&mut self, subject: &str, stage: FailureStage, reason: impl Into<String>) {
        self.entries.push(FailureRecord {
            subject: subject.to_string(),
            stage,
            reason: reason.into(),
            recorded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
    }

    pub fn entries(&self) -> &[FailureRecord] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the ledger as pretty JSON. Nothing is written when empty.
    pub fn persist(&self, path: &Path, logger: &Logger) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                SynsyuError::Filesystem(format!(
                    "Failed to create failure ledger directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let file = File::create(path).map_err(|err| {
            SynsyuError::Filesystem(format!(
                "Failed to create failure ledger {}: {err}",
                path.display()
            ))
        })?;
        serde_json::to_writer_pretty(file, &self.entries).map_err(|err| {
            SynsyuError::Serialization(format!(
                "Failed to write failure ledger {}: {err}",
                path.display()
            ))
        })?;
        logger.info(
            "FAILURE",
            format!(
                "Recorded {} failure(s) in {}",
                self.entries.len(),
                path.display()
            ),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ledger_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.json");
        FailureLedger::default()
            .persist(&path, &Logger::capturing())
            .unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn persisted_ledger_round_trips_stage_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("failures.json");
        let logger = Logger::capturing();
        let mut ledger = FailureLedger::default();
        ledger.record("linux", FailureStage::DiskSpace, "insufficient disk space");
        ledger.record("flatpak", FailureStage::Flatpak, "exit status 1".to_string());
        ledger.persist(&path, &logger).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0]["subject"], "linux");
        assert_eq!(written[0]["stage"], "disk_space");
        assert_eq!(written[1]["stage"], "flatpak");
        assert!(logger.captured()[0].contains("Recorded 2 failure(s)"));
    }
}
