//! Human-readable size parsing utilities.

use anyhow::{anyhow, Result};

/// Parses a human-readable size string like "8MiB", "1GB" or "512KiB" into bytes.
///
/// Supports both decimal (KB, MB, GB) and binary (KiB, MiB, GiB) units.
/// Can also parse plain numbers as bytes.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();

    if let Ok(n) = s.parse::<u64>() {
        return Ok(n);
    }

    let split_pos = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| anyhow!("Invalid size format: {}", s))?;

    let (num_str, unit) = s.split_at(split_pos);
    let num: f64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid number: {:?}", num_str))?;

    let unit = unit.trim().to_uppercase();
    let multiplier: u64 = match unit.as_str() {
        "B" => 1,
        "KIB" | "K" => 1 << 10,
        "MIB" | "M" => 1 << 20,
        "GIB" | "G" => 1 << 30,
        "TIB" | "T" => 1 << 40,

        "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "TB" => 1_000_000_000_000,

        _ => {
            return Err(anyhow!(
                "Unknown unit: {}. Supported: B, KB, MB, GB, TB, KiB, MiB, GiB, TiB",
                unit
            ))
        }
    };

    Ok((num * multiplier as f64) as u64)
}

/// Parses a size that must be at least one byte.
pub fn parse_nonzero_size(s: &str) -> Result<u64> {
    match parse_size(s)? {
        0 => Err(anyhow!("Size must be at least one byte")),
        n => Ok(n),
    }
}
