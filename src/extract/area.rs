use regex::Regex;
use std::sync::LazyLock;

use super::number::{normalize_line, normalize_number};
use super::price::is_price_per_area;

const MIN_PLAUSIBLE_AREA: f64 = 10.0;
const MAX_PLAUSIBLE_AREA: f64 = 500.0;

static AREA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,4}(?:[.,]\d{1,2})?)\s*(?:m2|m²|sqm|sq\s?m|кв\.?\s?м|кв\s?м|м2|м²)").unwrap()
});

/// Living area in square meters.
///
/// Takes the first area mention of each line that is not a unit price,
/// keeps those within the plausible range and returns the largest. Without
/// any line-level hit, the first mention in the whole text is returned
/// unfiltered.
pub fn extract_area(text: &str) -> Option<f64> {
    let best = super::split_lines(text)
        .into_iter()
        .filter(|line| !is_price_per_area(line))
        .filter_map(|line| {
            let normalized = normalize_line(line);
            AREA.captures(&normalized)
                .and_then(|caps| normalize_number(&caps[1]))
        })
        .filter(|v| (MIN_PLAUSIBLE_AREA..=MAX_PLAUSIBLE_AREA).contains(v))
        .fold(None, |best: Option<f64>, v| match best {
            Some(b) if b >= v => Some(b),
            _ => Some(v),
        });

    best.or_else(|| {
        AREA.captures(text)
            .and_then(|caps| normalize_number(&caps[1]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_price_per_area_line() {
        let text = "Новостройка\n$1622 за м²\nПлощадь: 85 м²";
        assert_eq!(extract_area(text), Some(85.0));
    }

    #[test]
    fn test_largest_plausible_wins() {
        let text = "Спальня 14 m2\nTotal 120 sqm\nУчасток 1200 м2";
        assert_eq!(extract_area(text), Some(120.0));
    }

    #[test]
    fn test_decimal_area() {
        assert_eq!(extract_area("62,5 кв.м"), Some(62.5));
    }

    #[test]
    fn test_fallback_is_unfiltered() {
        assert_eq!(extract_area("Участок 1200 м2"), Some(1200.0));
    }

    #[test]
    fn test_no_area() {
        assert_eq!(extract_area("3 комнаты, 5 этаж"), None);
    }
}
