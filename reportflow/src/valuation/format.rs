//! Fixed-rounding formatters and a lenient amount parser.
//!
//! Rounding is half away from zero everywhere, so a value always renders the
//! same way regardless of where it is formatted.

/// Rounds to `decimals` places, halves away from zero.
#[must_use]
pub fn round_half_away(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));
    (value * scale).round() / scale
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Formats a dollar amount with thousands separators: `$1,234,567`.
#[must_use]
pub fn format_currency(value: f64, decimals: u32) -> String {
    let rounded = round_half_away(value, decimals);
    let sign = if rounded < 0.0 { "-" } else { "" };
    let text = format!("{:.*}", decimals as usize, rounded.abs());
    match text.split_once('.') {
        Some((int, frac)) => format!("{sign}${}.{frac}", group_thousands(int)),
        None => format!("{sign}${}", group_thousands(&text)),
    }
}

/// Formats a fraction as a percentage with one decimal: `0.155` -> `15.5%`.
#[must_use]
pub fn format_percentage(fraction: f64) -> String {
    format!("{:.1}%", round_half_away(fraction * 100.0, 1))
}

/// Formats a multiple with two decimals: `4.9` -> `4.90x`.
#[must_use]
pub fn format_multiple(value: f64) -> String {
    format!("{:.2}x", round_half_away(value, 2))
}

/// Parses amounts such as `$1,234,567`, `$1.2M`, `(5,000)`, `850k`,
/// `2.5 million` or `15.5%`.
///
/// Suffixes scale the number; a percent sign is dropped without scaling.
/// Returns `None` when no number is present.
#[must_use]
pub fn parse_amount(text: &str) -> Option<f64> {
    let mut s = text.trim();
    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        negative = true;
        s = inner.trim();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.trim_start();
    }
    s = s.strip_prefix('$').unwrap_or(s).trim_start();
    s = s.strip_suffix('%').unwrap_or(s).trim_end();

    let lower = s.to_ascii_lowercase();
    let (number, scale) = [
        ("billion", 1e9),
        ("million", 1e6),
        ("thousand", 1e3),
        ("bn", 1e9),
        ("mm", 1e6),
        ("b", 1e9),
        ("m", 1e6),
        ("k", 1e3),
    ]
    .iter()
    .find_map(|(suffix, scale)| {
        lower
            .strip_suffix(suffix)
            .map(|n| (n.trim_end().to_string(), *scale))
    })
    .unwrap_or((lower, 1.0));

    let cleaned: String = number.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let value = cleaned.parse::<f64>().ok()? * scale;
    value.is_finite().then_some(if negative { -value } else { value })
}
