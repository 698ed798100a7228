//! Text forms of coordinates and timestamps

use chrono::DateTime;

const FRACTION_DIGITS: usize = 7;

/// Parse decimal degrees into 1e-7 units without going through `f64`.
///
/// Digits beyond the seventh decimal are truncated. Exponent notation falls
/// back to floating point and rounds.
pub fn parse_fixed7(text: &str) -> Option<i32> {
    let text = text.trim();
    if text.contains(['e', 'E']) {
        let value: f64 = text.parse().ok()?;
        let scaled = (value * 1e7).round();
        if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&scaled) {
            return None;
        }
        return Some(scaled as i32);
    }

    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut value: i64 = 0;
    for b in int_part.bytes() {
        value = value.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
        if value > i64::from(i32::MAX) {
            return None;
        }
    }
    let mut scale = 0;
    for b in frac_part.bytes().take(FRACTION_DIGITS) {
        value = value * 10 + i64::from(b - b'0');
        scale += 1;
    }
    for _ in scale..FRACTION_DIGITS {
        value = value.checked_mul(10)?;
    }
    if negative {
        value = -value;
    }
    i32::try_from(value).ok()
}

fn split_fixed7(value: i32) -> (bool, u64, u64) {
    let magnitude = i64::from(value).unsigned_abs();
    (value < 0, magnitude / 10_000_000, magnitude % 10_000_000)
}

/// Shortest form keeping at least one decimal: `538000000` → `53.8`
pub fn write_fixed7(out: &mut String, value: i32) {
    let (negative, int_part, mut frac) = split_fixed7(value);
    let mut width = FRACTION_DIGITS;
    while width > 1 && frac % 10 == 0 {
        frac /= 10;
        width -= 1;
    }
    let sign = if negative { "-" } else { "" };
    out.push_str(&format!("{sign}{int_part}.{frac:0width$}"));
}

/// Always seven decimals: `538000000` → `53.8000000`
pub fn write_fixed7_padded(out: &mut String, value: i32) {
    let (negative, int_part, frac) = split_fixed7(value);
    let sign = if negative { "-" } else { "" };
    out.push_str(&format!("{sign}{int_part}.{frac:07}"));
}

/// Rounded to `decimals` places (at most seven)
pub fn write_fixed7_rounded(out: &mut String, value: i32, decimals: u32) {
    let decimals = decimals.min(FRACTION_DIGITS as u32);
    let divisor = 10u64.pow(FRACTION_DIGITS as u32 - decimals);
    let magnitude = i64::from(value).unsigned_abs();
    let rounded = (magnitude + divisor / 2) / divisor;
    let unit = 10u64.pow(decimals);
    let sign = if value < 0 && rounded != 0 { "-" } else { "" };
    if decimals == 0 {
        out.push_str(&format!("{sign}{rounded}"));
    } else {
        let width = decimals as usize;
        out.push_str(&format!("{sign}{}.{:0width$}", rounded / unit, rounded % unit));
    }
}

pub fn format_fixed7(value: i32) -> String {
    let mut out = String::new();
    write_fixed7(&mut out, value);
    out
}

/// `2010-09-30T19:23:30Z`
pub fn format_timestamp(seconds: i64) -> String {
    match DateTime::from_timestamp(seconds, 0) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => String::from("1970-01-01T00:00:00Z"),
    }
}

pub fn parse_timestamp(text: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|dt| dt.timestamp())
}
