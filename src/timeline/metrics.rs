//! Parsing of abbreviated engagement counts such as `1.2K` or `3M`.

use regex::Regex;

/// First numeric token with an optional magnitude suffix.
static COUNT_TOKEN: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"(\d[\d,]*(?:\.\d+)?)(?:([KMBkmb])\b)?").unwrap());

/// Parse a human-readable count.
///
/// `K`, `M` and `B` multiply by a thousand, million and billion; fractional
/// values are allowed and rounded. Anything unparseable yields 0.
#[must_use]
pub fn parse_count(text: &str) -> u64 {
    let text = text.trim();
    if text.is_empty() {
        return 0;
    }

    let Some(caps) = COUNT_TOKEN.captures(text) else {
        return 0;
    };
    // The whole string must be the token; labels go through `count_in_label`.
    if caps.get(0).map(|m| m.as_str().len()) != Some(text.len()) {
        return 0;
    }

    scale(&caps[1], caps.get(2).map(|m| m.as_str()))
}

/// Extract the first count found inside an accessibility label,
/// e.g. `"1.2K Likes. Like"`.
#[must_use]
pub fn count_in_label(label: &str) -> u64 {
    COUNT_TOKEN
        .captures(label)
        .map_or(0, |caps| scale(&caps[1], caps.get(2).map(|m| m.as_str())))
}

fn scale(number: &str, suffix: Option<&str>) -> u64 {
    let Ok(value) = number.replace(',', "").parse::<f64>() else {
        return 0;
    };
    let multiplier = match suffix.map(str::to_ascii_uppercase).as_deref() {
        Some("K") => 1e3,
        Some("M") => 1e6,
        Some("B") => 1e9,
        _ => 1.0,
    };
    let scaled = (value * multiplier).round();
    if scaled.is_finite() && scaled > 0.0 {
        scaled as u64
    } else {
        0
    }
}
