//! Byte-quantity and fixed-width string formatting for the meter.

/// Scale a byte count into a quantity below 1000 and its 1024-based
/// unit. 439376 becomes (429.078125, "KiB").
pub fn shorten_bytes(bytes: u64) -> (f64, &'static str) {
    let mut scaled = bytes;
    let mut quantity = bytes as f64;
    let mut unit = "B";

    if scaled >= 1000 {
        scaled /= 1024;
        quantity = bytes as f64 / 1024.0;
        unit = "KiB";
    }
    if scaled >= 1000 {
        scaled /= 1024;
        quantity = bytes as f64 / 1024f64.powi(2);
        unit = "MiB";
    }
    if scaled >= 1000 {
        quantity = bytes as f64 / 1024f64.powi(3);
        unit = "GiB";
    }

    (quantity, unit)
}

/// Truncate `s` to at most `maxlen` characters, marking a cut with a
/// trailing `..`.
pub fn shorten_string(s: &str, maxlen: usize) -> String {
    if s.chars().count() <= maxlen {
        return s.to_string();
    }

    let mut shortened: String = s.chars().take(maxlen).collect();
    if shortened.chars().count() > 2 {
        shortened.pop();
        shortened.pop();
        shortened.push_str("..");
    }
    shortened
}
