//! Numeric and formatting helpers shared across crates.

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Human-readable duration used in analysis details, e.g. `"12.3 seconds"`.
pub fn format_duration_label(seconds: f64) -> String {
    format!("{:.1} seconds", seconds)
}
