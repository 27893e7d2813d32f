//! Provides parsing and formatting helpers for byte sizes and durations.
//!
//! These are mainly used to read values like "2k" or "5s" from the config and to output sizes
//! in log messages.
use std::time::Duration;

use anyhow::Context;
use regex::{Captures, Regex};

const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

/// Formats a given size in bytes.
///
/// This function determines the ideal unit (ranging from bytes to petabytes) to provide
/// a concise representation.
///
/// # Examples
///
/// ```
/// assert_eq!(peercache::fmt::format_size(0), "0 bytes");
/// assert_eq!(peercache::fmt::format_size(1), "1 byte");
/// assert_eq!(peercache::fmt::format_size(100), "100 bytes");
/// assert_eq!(peercache::fmt::format_size(2 << 10), "2.00 KiB");
/// assert_eq!(peercache::fmt::format_size(87_340), "85.3 KiB");
/// assert_eq!(peercache::fmt::format_size(873_400), "853 KiB");
/// assert_eq!(peercache::fmt::format_size(8_734_000), "8.33 MiB");
/// assert_eq!(peercache::fmt::format_size(8_734_000_000), "8.13 GiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    match size_in_bytes {
        1 => return "1 byte".to_owned(),
        size if size < 1024 => return format!("{} bytes", size),
        _ => (),
    }

    let mut size = size_in_bytes as f64 / 1024.;
    let mut unit = 0;
    while size > 1024. && unit < UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    if size <= 10. {
        format!("{:.2} {}", size, UNITS[unit])
    } else if size <= 100. {
        format!("{:.1} {}", size, UNITS[unit])
    } else {
        format!("{:.0} {}", size, UNITS[unit])
    }
}

/// Parses a byte size like "512", "2k" or "16 M".
///
/// The following (case insensitive) suffixes are supported:
/// * **b**: bytes (which is also the default if no suffix is given)
/// * **k**: KiB (1024 bytes)
/// * **m**: MiB
/// * **g**: GiB
/// * **t**: TiB
///
/// # Examples
///
/// ```
/// assert_eq!(peercache::fmt::parse_size("100").unwrap(), 100);
/// assert_eq!(peercache::fmt::parse_size("100b").unwrap(), 100);
/// assert_eq!(peercache::fmt::parse_size("2k").unwrap(), 2048);
/// assert_eq!(peercache::fmt::parse_size("8 M").unwrap(), 8 * 1024 * 1024);
///
/// // Unknown suffixes, decimals and negative numbers are rejected...
/// assert_eq!(peercache::fmt::parse_size("3 Y").is_err(), true);
/// assert_eq!(peercache::fmt::parse_size("1.2g").is_err(), true);
/// assert_eq!(peercache::fmt::parse_size("-1").is_err(), true);
/// ```
pub fn parse_size(value: impl AsRef<str>) -> anyhow::Result<usize> {
    lazy_static::lazy_static! {
        static ref SIZE: Regex = Regex::new(r"^\s*(\d+)\s*([bBkKmMgGtT]?)\s*$").unwrap();
    }

    let value = value.as_ref();
    let captures = SIZE.captures(value).with_context(|| {
        format!(
            "Cannot parse '{}' as size. Expected a positive number with an optional \
             suffix (b, k, m, g, t).",
            value
        )
    })?;

    let factor: usize = match captures[2].to_ascii_lowercase().as_str() {
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        "t" => 1 << 40,
        _ => 1,
    };

    number(&captures, value)?
        .checked_mul(factor)
        .with_context(|| format!("The size '{}' is too large.", value))
}

/// Parses a duration like "500ms", "5s" or "2 h".
///
/// Supported suffixes are **ms** (also the default), **s**, **m**, **h** and **d** (each in
/// either lower or upper case).
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(peercache::fmt::parse_duration("100 ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(peercache::fmt::parse_duration("100").unwrap(), Duration::from_millis(100));
/// assert_eq!(peercache::fmt::parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(peercache::fmt::parse_duration("3 M").unwrap(), Duration::from_secs(180));
/// assert_eq!(peercache::fmt::parse_duration("1d").unwrap(), Duration::from_secs(86_400));
///
/// assert_eq!(peercache::fmt::parse_duration("3 Y").is_err(), true);
/// assert_eq!(peercache::fmt::parse_duration("-1m").is_err(), true);
/// ```
pub fn parse_duration(value: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref DURATION: Regex =
            Regex::new(r"^\s*(\d+)\s*(ms|s|m|h|d|MS|S|M|H|D)?\s*$").unwrap();
    }

    let value = value.as_ref();
    let captures = DURATION.captures(value).with_context(|| {
        format!(
            "Cannot parse '{}' as duration. Expected a positive number with an optional \
             suffix (ms, s, m, h, d).",
            value
        )
    })?;

    let number = number(&captures, value)? as u64;
    let unit = captures
        .get(2)
        .map(|unit| unit.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    Ok(match unit.as_str() {
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(number * 60),
        "h" => Duration::from_secs(number * 60 * 60),
        "d" => Duration::from_secs(number * 60 * 60 * 24),
        _ => Duration::from_millis(number),
    })
}

/// Formats a duration into a string like "1m 2s 13ms".
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(peercache::fmt::format_duration(Duration::from_millis(13)), "13ms");
/// assert_eq!(peercache::fmt::format_duration(Duration::from_secs(5)), "5s");
/// assert_eq!(peercache::fmt::format_duration(Duration::from_millis(62_013)), "1m 2s 13ms");
/// assert_eq!(peercache::fmt::format_duration(Duration::from_secs(60 * 61)), "1h 1m");
/// assert_eq!(peercache::fmt::format_duration(Duration::from_secs(0)), "0ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    const STEPS: [(u128, &str); 5] = [
        (1000 * 60 * 60 * 24, "d"),
        (1000 * 60 * 60, "h"),
        (1000 * 60, "m"),
        (1000, "s"),
        (1, "ms"),
    ];

    let mut remainder = duration.as_millis();
    let mut parts = Vec::new();
    for (millis, unit) in STEPS {
        let value = remainder / millis;
        if value > 0 {
            parts.push(format!("{}{}", value, unit));
            remainder %= millis;
        }
    }

    if parts.is_empty() {
        "0ms".to_owned()
    } else {
        parts.join(" ")
    }
}

fn number(captures: &Captures, value: &str) -> anyhow::Result<usize> {
    captures[1]
        .parse::<usize>()
        .with_context(|| format!("The number in '{}' is out of range.", value))
}

#[cfg(test)]
mod tests {
    use crate::fmt::{format_size, parse_duration, parse_size};
    use std::time::Duration;

    #[test]
    fn sizes_are_parsed_leniently() {
        assert_eq!(parse_size(" 2k ").unwrap(), 2048);
        assert_eq!(parse_size("2K").unwrap(), 2048);
        assert_eq!(parse_size("1 t").unwrap(), 1 << 40);
        assert_eq!(parse_size("").is_err(), true);
        assert_eq!(parse_size("k").is_err(), true);
        assert_eq!(parse_size("99999999999999999999999").is_err(), true);
    }

    #[test]
    fn durations_are_parsed_leniently() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration(" 250 MS ").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1.5s").is_err(), true);
    }

    #[test]
    fn sizes_are_formatted_with_the_best_unit() {
        assert_eq!(format_size(1023), "1023 bytes");
        assert_eq!(format_size(1024), "1.00 KiB");
        assert_eq!(format_size(1024 * 1024 * 512), "512 MiB");
    }
}
