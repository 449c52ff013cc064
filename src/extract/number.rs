//! Number and line normalization shared by the extractors.

use regex::Regex;
use std::sync::LazyLock;

static COMMA_GROUPS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,3}(,\d{3})+$").unwrap());
static DOT_GROUPS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,3}(\.\d{3})+$").unwrap());

static PICTOGRAPHS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{Extended_Pictographic}\x{FE0F}]").unwrap());
static HORIZONTAL_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\S\r\n]+").unwrap());

/// Parse a human-formatted number.
///
/// Separators are disambiguated by shape: with both `,` and `.` present the
/// commas group thousands; a lone separator groups thousands only when every
/// group after the first has exactly three digits, otherwise a comma is a
/// decimal mark.
pub fn normalize_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '\u{00A0}' | '\'' | '’'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let has_comma = cleaned.contains(',');
    let has_dot = cleaned.contains('.');

    let normalized = if has_comma && has_dot {
        cleaned.replace(',', "")
    } else if has_comma {
        if COMMA_GROUPS.is_match(&cleaned) {
            cleaned.replace(',', "")
        } else {
            cleaned.replace(',', ".")
        }
    } else if has_dot && DOT_GROUPS.is_match(&cleaned) {
        cleaned.replace('.', "")
    } else {
        cleaned
    };

    let digits: String = normalized
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() {
        return None;
    }

    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Strip emoji, collapse horizontal whitespace and fold `²` to `2`.
pub fn normalize_line(line: &str) -> String {
    let without_emoji = PICTOGRAPHS.replace_all(line, "");
    HORIZONTAL_SPACE
        .replace_all(&without_emoji, " ")
        .replace('²', "2")
}
