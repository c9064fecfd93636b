//! Human-readable sizes for log output.

const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

/// Render a byte count for the conversion summary, e.g. `304 bytes` or
/// `1.50 KB`. Binary (1024) multiples, two decimals above one KB.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
