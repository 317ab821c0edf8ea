/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_ops::metrics
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Read resource requirements from the Syn-Syu manifest and
    exchange them as pipe-delimited records with the disk guard
    and the Bash orchestrator.

  Security / Safety Notes:
    Read-only access to the operator-controlled manifest path.
    Untrusted numeric fields are clamped, never trusted as-is.

  Dependencies:
    serde_json for manifest parsing.

  Operational Scope:
    Supplies batch-wide metrics for the global disk check and
    per-package metrics for the per-package disk check.

  Revision History:
    2025-11-12 COD  Authored manifest metrics reader.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Records are complete or absent, never partial
    - Negative and non-numeric sizes coerce to zero
    - Strict and lenient parsing kept as separate contracts
============================================================*/

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{Result, SynsyuError};
use crate::units::parse_unsigned;

/// Batch-wide resource metrics declared in the manifest `metadata` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestMetrics {
    pub download_size_total: u64,
    pub build_size_total: u64,
    pub install_size_total: u64,
    pub transient_size_total: u64,
    pub min_free_bytes: u64,
    pub available_space_bytes: u64,
    pub space_checked_path: String,
}

impl ManifestMetrics {
    /// Sum of the download, build, and install footprints.
    pub fn component_total(&self) -> u64 {
        self.download_size_total
            .saturating_add(self.build_size_total)
            .saturating_add(self.install_size_total)
    }

    /// Pipe-delimited record: `download|build|install|transient|min_free|available|path`.
    pub fn to_record(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.download_size_total,
            self.build_size_total,
            self.install_size_total,
            self.transient_size_total,
            self.min_free_bytes,
            self.available_space_bytes,
            self.space_checked_path
        )
    }
}

/// Reason a batch-wide record was rejected by strict parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub field: &'static str,
    pub value: String,
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field `{}` is not an integer: `{}`", self.field, self.value)
    }
}

impl FromStr for ManifestMetrics {
    type Err = MalformedRecord;

    /// Strict parse. Download, build, and install must be integers; an invalid
    /// transient is recomputed; invalid margin/available fields read as zero.
    fn from_str(record: &str) -> std::result::Result<Self, Self::Err> {
        let fields: Vec<&str> = record.trim_end_matches('\n').splitn(7, '|').collect();
        let field = |idx: usize| fields.get(idx).copied().unwrap_or("");

        let strict = |idx: usize, name: &'static str| {
            parse_unsigned(field(idx)).ok_or_else(|| MalformedRecord {
                field: name,
                value: field(idx).to_string(),
            })
        };
        let download_size_total = strict(0, "download_size_total")?;
        let build_size_total = strict(1, "build_size_total")?;
        let install_size_total = strict(2, "install_size_total")?;

        let mut metrics = ManifestMetrics {
            download_size_total,
            build_size_total,
            install_size_total,
            transient_size_total: 0,
            min_free_bytes: parse_unsigned(field(4)).unwrap_or(0),
            available_space_bytes: parse_unsigned(field(5)).unwrap_or(0),
            space_checked_path: field(6).to_string(),
        };
        let derived = metrics.component_total();
        metrics.transient_size_total = parse_unsigned(field(3)).unwrap_or(derived);
        Ok(metrics)
    }
}

/// Per-package resource metrics as reported by a [`PackageMetricsSource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackageMetrics {
    pub download_size_total: u64,
    pub build_size_total: u64,
    pub install_size_total: u64,
    pub transient_size_total: u64,
}

impl PackageMetrics {
    /// Lenient parse of `download|build|install|transient`; each bad field becomes zero.
    pub fn parse_lenient(record: &str) -> Self {
        let mut fields = record
            .trim_end_matches('\n')
            .split('|')
            .map(|field| parse_unsigned(field).unwrap_or(0));
        let mut next = || fields.next().unwrap_or(0);
        PackageMetrics {
            download_size_total: next(),
            build_size_total: next(),
            install_size_total: next(),
            transient_size_total: next(),
        }
    }

    pub fn component_total(&self) -> u64 {
        self.download_size_total
            .saturating_add(self.build_size_total)
            .saturating_add(self.install_size_total)
    }

    /// Peak footprint: the transient figure when reported, else the component sum.
    pub fn footprint(&self) -> u64 {
        if self.transient_size_total > 0 {
            self.transient_size_total
        } else {
            self.component_total()
        }
    }
}

/// External lookup yielding a `download|build|install|transient` record per package.
pub trait PackageMetricsSource {
    fn lookup(&self, package: &str) -> Option<String>;
}

impl<S: PackageMetricsSource> PackageMetricsSource for Option<S> {
    fn lookup(&self, package: &str) -> Option<String> {
        self.as_ref()?.lookup(package)
    }
}

/// A parsed manifest document.
#[derive(Debug, Clone)]
pub struct Manifest {
    root: Map<String, Value>,
}

impl Manifest {
    /// Load and parse the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|err| {
            SynsyuError::Filesystem(format!(
                "Failed to read manifest {}: {err}",
                path.display()
            ))
        })?;
        let value: Value = serde_json::from_str(&data).map_err(|err| {
            SynsyuError::Serialization(format!(
                "Failed to parse manifest {}: {err}",
                path.display()
            ))
        })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            other => Err(SynsyuError::Serialization(format!(
                "Manifest root must be an object, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Extract batch-wide metrics, deriving the transient footprint when absent.
    pub fn metrics(&self) -> ManifestMetrics {
        let empty = Map::new();
        let metadata = self
            .root
            .get("metadata")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let field = |key: &str| metadata.get(key).map(coerce_bytes).unwrap_or(0);

        let mut metrics = ManifestMetrics {
            download_size_total: field("download_size_total"),
            build_size_total: field("build_size_total"),
            install_size_total: field("install_size_total"),
            transient_size_total: field("transient_size_total"),
            min_free_bytes: field("min_free_bytes"),
            available_space_bytes: field("available_space_bytes"),
            space_checked_path: metadata
                .get("space_checked_path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
        if metrics.transient_size_total == 0 {
            metrics.transient_size_total = metrics.component_total();
        }
        metrics
    }
}

impl PackageMetricsSource for Manifest {
    fn lookup(&self, package: &str) -> Option<String> {
        let entry = self
            .root
            .get("packages")
            .and_then(Value::as_object)?
            .get(package)?
            .as_object()?;
        let field = |key: &str| entry.get(key).map(coerce_bytes).unwrap_or(0);
        Some(format!(
            "{}|{}|{}|{}",
            field("download_size_selected"),
            field("build_size_selected"),
            field("installed_size_selected"),
            field("transient_size_selected")
        ))
    }
}

/// Read the manifest and render its batch-wide record; `None` when unreadable.
pub fn read_record(path: &Path) -> Option<String> {
    Manifest::load(path)
        .ok()
        .map(|manifest| manifest.metrics().to_record())
}

/// Clamp a JSON value to a byte count: non-numeric or negative → 0, fractions truncate.
pub fn coerce_bytes(value: &Value) -> u64 {
    let Value::Number(number) = value else {
        return 0;
    };
    if let Some(unsigned) = number.as_u64() {
        return unsigned;
    }
    match number.as_f64() {
        Some(float) if float.is_finite() && float > 0.0 => float.trunc() as u64,
        _ => 0,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn manifest(value: Value) -> Manifest {
        Manifest::from_value(value).unwrap()
    }

    #[test]
    fn transient_is_derived_from_components() {
        for (d, b, i) in [(0u64, 0u64, 0u64), (1000, 500, 200), (7, 0, 3), (1 << 40, 1, 1)] {
            let metrics = manifest(json!({
                "metadata": {
                    "download_size_total": d,
                    "build_size_total": b,
                    "install_size_total": i
                }
            }))
            .metrics();
            assert_eq!(metrics.transient_size_total, d + b + i);
        }
    }

    #[test]
    fn explicit_transient_is_kept() {
        let metrics = manifest(json!({
            "metadata": {
                "download_size_total": 10,
                "build_size_total": 10,
                "transient_size_total": 15
            }
        }))
        .metrics();
        assert_eq!(metrics.transient_size_total, 15);
    }

    #[test]
    fn negative_and_non_numeric_fields_become_zero() {
        let metrics = manifest(json!({
            "metadata": {
                "download_size_total": -5,
                "build_size_total": "1000",
                "install_size_total": null,
                "transient_size_total": -0.5,
                "min_free_bytes": true,
                "available_space_bytes": [1, 2],
                "space_checked_path": 42
            }
        }))
        .metrics();
        assert_eq!(metrics, ManifestMetrics::default());
    }

    #[test]
    fn fractional_sizes_truncate() {
        let metrics = manifest(json!({
            "metadata": { "download_size_total": 10.9, "available_space_bytes": 2048.2 }
        }))
        .metrics();
        assert_eq!(metrics.download_size_total, 10);
        assert_eq!(metrics.available_space_bytes, 2048);
    }

    #[test]
    fn missing_metadata_yields_zero_record() {
        let metrics = manifest(json!({ "packages": {} })).metrics();
        assert_eq!(metrics.to_record(), "0|0|0|0|0|0|");
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert!(Manifest::from_value(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn read_record_handles_missing_and_garbled_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_record(&dir.path().join("absent.json")), None);

        let garbled = dir.path().join("garbled.json");
        std::fs::write(&garbled, "{ not json").unwrap();
        assert_eq!(read_record(&garbled), None);

        let good = dir.path().join("manifest.json");
        let mut file = std::fs::File::create(&good).unwrap();
        write!(
            file,
            r#"{{"metadata":{{"download_size_total":1000,"build_size_total":500,"install_size_total":200,"available_space_bytes":2000,"space_checked_path":"/"}}}}"#
        )
        .unwrap();
        assert_eq!(read_record(&good).as_deref(), Some("1000|500|200|1700|0|2000|/"));
    }

    #[test]
    fn strict_parse_rejects_malformed_components() {
        let err = "10|x|5|15|0|0|/".parse::<ManifestMetrics>().unwrap_err();
        assert_eq!(err.field, "build_size_total");
        assert!("".parse::<ManifestMetrics>().is_err());
        assert!("1|2".parse::<ManifestMetrics>().is_err());
    }

    #[test]
    fn strict_parse_recomputes_bad_transient() {
        let metrics: ManifestMetrics = "10|20|30|oops|5|nope|/srv/a|b".parse().unwrap();
        assert_eq!(metrics.transient_size_total, 60);
        assert_eq!(metrics.min_free_bytes, 5);
        assert_eq!(metrics.available_space_bytes, 0);
        assert_eq!(metrics.space_checked_path, "/srv/a|b");
    }

    #[test]
    fn lenient_parse_zero_fills_each_field() {
        let metrics = PackageMetrics::parse_lenient("500|abc||-3");
        assert_eq!(
            metrics,
            PackageMetrics {
                download_size_total: 500,
                ..PackageMetrics::default()
            }
        );
        assert_eq!(PackageMetrics::parse_lenient("").footprint(), 0);
        assert_eq!(PackageMetrics::parse_lenient("1|2|3").footprint(), 6);
        assert_eq!(PackageMetrics::parse_lenient("1|2|3|50").footprint(), 50);
    }

    #[test]
    fn package_lookup_reads_selected_sizes() {
        let manifest = manifest(json!({
            "packages": {
                "linux": {
                    "download_size_selected": 150,
                    "installed_size_selected": 400,
                    "build_size_selected": -1
                },
                "broken": "not an object"
            }
        }));
        assert_eq!(manifest.lookup("linux").as_deref(), Some("150|0|400|0"));
        assert_eq!(manifest.lookup("broken"), None);
        assert_eq!(manifest.lookup("absent"), None);

        let unloaded: Option<Manifest> = None;
        assert_eq!(unloaded.lookup("linux"), None);
        assert_eq!(Some(manifest).lookup("linux").as_deref(), Some("150|0|400|0"));
    }
}
