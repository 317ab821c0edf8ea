/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_ops::config
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Load operator configuration for Syn-Syu-Ops: manifest and
    log locations, disk guard margins, and app runner policy.

  Security / Safety Notes:
    Reads a user-owned TOML file only; no secrets are expected
    or stored.

  Dependencies:
    serde + toml for parsing, dirs for XDG locations.

  Operational Scope:
    Consulted once at startup; CLI flags override individual
    values afterwards.

  Revision History:
    2024-11-04 COD  Established configuration loader.
    2025-11-12 COD  Added disk guard and app runner sections.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Safe defaults when the file is absent
    - Explicit failure when an operator-named file is missing
============================================================*/

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, SynsyuError};
use crate::probe::ProbeKind;
use crate::units::ByteStyle;

const APP_DIR: &str = "syn-syu";

/// Root configuration document (`config.toml`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SynsyuConfig {
    pub core: CoreConfig,
    pub disk: DiskConfig,
    pub apps: AppsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub manifest_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

/// Disk guard settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Feature flag; when false every disk check is a no-op success.
    pub check: bool,
    /// Baseline free-space margin in bytes.
    pub min_free_bytes: u64,
    /// Additional margin in MiB.
    pub extra_margin_mb: u64,
    pub human_readable: bool,
    pub probe: ProbeKind,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            check: true,
            min_free_bytes: 0,
            extra_margin_mb: 0,
            human_readable: true,
            probe: ProbeKind::Df,
        }
    }
}

impl DiskConfig {
    pub fn byte_style(&self) -> ByteStyle {
        ByteStyle::from_human_readable(self.human_readable)
    }
}

/// Flatpak and fwupd runner policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppsConfig {
    pub flatpak: bool,
    pub fwupd: bool,
    pub assume_yes: bool,
    pub flatpak_user: bool,
    pub fwupd_refresh: bool,
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            flatpak: true,
            fwupd: true,
            assume_yes: true,
            flatpak_user: false,
            fwupd_refresh: true,
        }
    }
}

impl SynsyuConfig {
    /// Load from an explicit path, or from the XDG default when `None`.
    ///
    /// An absent default file yields defaults; an absent explicit file is an error.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(SynsyuError::Config(format!(
                        "Configuration file {} does not exist",
                        explicit.display()
                    )));
                }
                Self::load(explicit)
            }
            None => match default_config_path() {
                Some(default) if default.exists() => Self::load(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SynsyuError::Config(format!("Failed to read {}: {err}", path.display()))
        })?;
        Self::parse(&raw)
            .map_err(|err| SynsyuError::Config(format!("Invalid {}: {err}", path.display())))
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.core
            .manifest_path
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| state_root().join("manifest.json"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.core
            .log_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| state_root().join("logs"))
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

fn state_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
