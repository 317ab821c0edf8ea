/*============================================================
  Synavera Project: Syn-Syu
  Module: synsyu_ops::units
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Render byte counts for operator-facing log lines and parse
    unsigned integer fields exchanged with the shell layer.

  Security / Safety Notes:
    Pure functions; no I/O performed in this module.

  Dependencies:
    None beyond std.

  Operational Scope:
    Used by the disk guard when describing requirements and by
    the metrics reader when validating pipe records.

  Revision History:
    2025-11-12 COD  Introduced byte formatter for disk guard.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Total functions: malformed input renders as zero
    - Rounding mirrors coreutils numfmt (away from zero)
============================================================*/

const IEC_UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// How byte counts are rendered in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteStyle {
    /// Binary prefixes with a trailing `B`, e.g. `1.5KiB`.
    Iec,
    /// Plain integer followed by `B`.
    Raw,
}

impl ByteStyle {
    pub fn from_human_readable(enabled: bool) -> Self {
        if enabled {
            ByteStyle::Iec
        } else {
            ByteStyle::Raw
        }
    }

    pub fn render(self, bytes: u64) -> String {
        match self {
            ByteStyle::Raw => format!("{bytes}B"),
            ByteStyle::Iec => render_iec(bytes),
        }
    }
}

/// Render a textual byte count; anything that is not an unsigned integer counts as zero.
pub fn format_bytes(raw: &str, style: ByteStyle) -> String {
    style.render(parse_unsigned(raw).unwrap_or(0))
}

/// Parse a strictly unsigned decimal integer (`[0-9]+`), rejecting signs and whitespace.
pub fn parse_unsigned(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u64>().ok()
}

fn render_iec(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < IEC_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{bytes}B");
    }

    if value < 10.0 {
        let rounded = (value * 10.0).ceil() / 10.0;
        if rounded < 10.0 {
            return format!("{rounded:.1}{}", IEC_UNITS[unit]);
        }
        return format!("10{}", IEC_UNITS[unit]);
    }

    let rounded = value.ceil();
    if rounded >= 1024.0 && unit < IEC_UNITS.len() - 1 {
        return format!("1.0{}", IEC_UNITS[unit + 1]);
    }
    format!("{rounded:.0}{}", IEC_UNITS[unit])
}
