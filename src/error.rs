/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_ops::error
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Centralise Syn-Syu-Ops error types and the exit statuses the
    orchestrator relies on, including the reserved status for
    confirmed insufficient disk space.

  Security / Safety Notes:
    Error contexts expose paths and byte counts only.

  Dependencies:
    thiserror for ergonomic error definitions.

  Operational Scope:
    Used across modules to propagate recoverable failures and
    consolidate exit codes for the binary entry point.

  Revision History:
    2024-11-04 COD  Established shared error definitions.
    2025-11-12 COD  Added insufficient-space status for disk guard.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit error taxonomy with actionable context
    - Fail-open outcomes kept out of the error path
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

/// Exit status reserved for a confirmed shortage of disk space.
///
/// POSIX truncates exit statuses to eight bits, so callers observe
/// `421 & 0xFF` (165), exactly as they would for `exit 421` in the shell layer.
pub const EXIT_INSUFFICIENT_DISK_SPACE: i32 = 421;

/// Result alias for Syn-Syu-Ops operations.
pub type Result<T> = std::result::Result<T, SynsyuError>;

/// Enumerates high-level error domains surfaced by Syn-Syu-Ops.
#[derive(Debug, Error)]
pub enum SynsyuError {
    #[error("Required command `{command}` not found in PATH")]
    CommandMissing { command: String },
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Configuration: {0}")]
    Config(String),
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error(
        "Insufficient disk space on {}: required {required} bytes, available {available} bytes",
        path.display()
    )]
    InsufficientSpace {
        required: u64,
        available: u64,
        path: PathBuf,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SynsyuError {
    /// Raw status byte reported to the parent process.
    pub fn exit_status(&self) -> u8 {
        match self {
            SynsyuError::CommandMissing { .. } => 10,
            SynsyuError::CommandFailure { .. } => 11,
            SynsyuError::Config(_) => 20,
            SynsyuError::Serialization(_) => 31,
            SynsyuError::Filesystem(_) => 40,
            SynsyuError::Runtime(_) => 50,
            SynsyuError::InsufficientSpace { .. } => (EXIT_INSUFFICIENT_DISK_SPACE & 0xFF) as u8,
            SynsyuError::Io(_) => 41,
        }
    }

    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_space_uses_reserved_status() {
        let err = SynsyuError::InsufficientSpace {
            required: 1700,
            available: 1000,
            path: PathBuf::from("/"),
        };
        assert_eq!(err.exit_status(), 165);
        assert_ne!(err.exit_status(), SynsyuError::Runtime("x".into()).exit_status());
        assert!(err.to_string().contains("required 1700 bytes"));
    }
}
