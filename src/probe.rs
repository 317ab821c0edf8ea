/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_ops::probe
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Report free filesystem space for the disk guard, either via
    POSIX `df -Pk` or a direct statvfs(3) call.

  Security / Safety Notes:
    Executes `df` with user privileges only. The statvfs path
    uses a single audited unsafe block around the libc call.

  Dependencies:
    tokio::process for async command execution, libc for
    statvfs.

  Operational Scope:
    Injected into the disk guard so tests can substitute fakes
    without touching the real filesystem.

  Revision History:
    2025-11-12 COD  Extracted free-space probing from disk guard.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic command invocation with explicit checks
    - Structured parsing with clear failure modes
============================================================*/

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::{Result, SynsyuError};

/// Source of available-space figures for a filesystem path.
#[allow(async_fn_in_trait)]
pub trait FreeSpaceProbe {
    /// Bytes available to unprivileged users on the filesystem holding `path`.
    async fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// Which probe backs the disk guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    #[default]
    Df,
    Statvfs,
}

/// Queries `df -Pk <path>` and scales the kibibyte `Available` column.
#[derive(Debug, Clone, Copy, Default)]
pub struct DfProbe;

impl FreeSpaceProbe for DfProbe {
    async fn available_bytes(&self, path: &Path) -> Result<u64> {
        let output = Command::new("df")
            .arg("-Pk")
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| map_spawn_error(err, "df"))?;

        if !output.status.success() {
            return Err(SynsyuError::CommandFailure {
                command: format!("df -Pk {}", path.display()),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let kib = parse_df_available(&stdout).ok_or_else(|| {
            SynsyuError::Serialization(format!(
                "Unexpected df output for {}: `{}`",
                path.display(),
                stdout.trim()
            ))
        })?;
        Ok(kib.saturating_mul(1024))
    }
}

/// Calls statvfs(3) directly; `f_bavail * f_frsize`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl FreeSpaceProbe for StatvfsProbe {
    async fn available_bytes(&self, path: &Path) -> Result<u64> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            SynsyuError::Filesystem(format!("Path contains NUL byte: {}", path.display()))
        })?;
        // SAFETY: `c_path` is NUL-terminated and outlives the call; `stat` is a
        // plain C struct that statvfs fully initialises on success.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(SynsyuError::Filesystem(format!(
                "statvfs {} failed: {}",
                path.display(),
                io::Error::last_os_error()
            )));
        }
        #[allow(clippy::unnecessary_cast)]
        let bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
        Ok(bytes)
    }
}

/// Probe selected from configuration.
#[derive(Debug, Clone, Copy)]
pub enum SystemProbe {
    Df(DfProbe),
    Statvfs(StatvfsProbe),
}

impl From<ProbeKind> for SystemProbe {
    fn from(kind: ProbeKind) -> Self {
        match kind {
            ProbeKind::Df => SystemProbe::Df(DfProbe),
            ProbeKind::Statvfs => SystemProbe::Statvfs(StatvfsProbe),
        }
    }
}

impl FreeSpaceProbe for SystemProbe {
    async fn available_bytes(&self, path: &Path) -> Result<u64> {
        match self {
            SystemProbe::Df(probe) => probe.available_bytes(path).await,
            SystemProbe::Statvfs(probe) => probe.available_bytes(path).await,
        }
    }
}

/// Extract the `Available` column (KiB) from POSIX `df -Pk` output.
///
/// Anchored on the capacity column (`NN%`) preceded by three integers, so
/// filesystem names containing spaces do not shift the columns.
fn parse_df_available(stdout: &str) -> Option<u64> {
    let row = stdout.lines().skip(1).find(|line| !line.trim().is_empty())?;
    let tokens: Vec<&str> = row.split_whitespace().collect();
    (4..tokens.len()).find_map(|idx| {
        if !tokens[idx].ends_with('%') {
            return None;
        }
        let numeric = |offset: usize| tokens[idx - offset].parse::<u64>().ok();
        numeric(3)?;
        numeric(2)?;
        numeric(1)
    })
}

pub(crate) fn map_spawn_error(err: io::Error, command: &str) -> SynsyuError {
    if err.kind() == io::ErrorKind::NotFound {
        SynsyuError::CommandMissing {
            command: command.into(),
        }
    } else {
        SynsyuError::Runtime(format!("Failed to spawn {command}: {err}"))
    }
}
