//! Resource unit normalization.

use crate::error::SpawnError;

/// Normalize a size to a number plus a single upper-case suffix.
///
/// A bare number is taken as gigabytes. `GB/MB/KB/TB` and their one-letter
/// forms are accepted in any case, so `8`, `8gb`, `8GB` and `8G` all become `8G`.
pub fn normalize_size(raw: &str) -> Result<String, SpawnError> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let split = compact
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(compact.len());
    let (number, suffix) = compact.split_at(split);

    match number.parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => {}
        _ => {
            return Err(SpawnError::InvalidOptions(format!(
                "'{}' is not a positive size",
                raw
            )));
        }
    }

    let unit = match suffix.to_ascii_uppercase().as_str() {
        "" | "G" | "GB" => "G",
        "K" | "KB" => "K",
        "M" | "MB" => "M",
        "T" | "TB" => "T",
        other => {
            return Err(SpawnError::InvalidOptions(format!(
                "unknown size unit '{}' in '{}'",
                other, raw
            )));
        }
    };
    Ok(format!("{}{}", number, unit))
}

/// Clamp a CPU request to what the host has. An unknown host (0 CPUs) does not clamp.
pub fn clamp_cpus(requested: f64, host_cpus: usize) -> f64 {
    if host_cpus == 0 {
        requested
    } else {
        requested.min(host_cpus as f64)
    }
}

/// CPU count in the local engine's native unit.
pub fn nano_cpus(cpus: f64) -> i64 {
    (cpus * 1e9) as i64
}
