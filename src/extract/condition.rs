use regex::Regex;
use std::sync::LazyLock;

use crate::models::Condition;

/// Phrase groups in priority order. The first group that matches wins.
static CONDITIONS: LazyLock<Vec<(Regex, Condition)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)white\s*frame|бел\w*\s*каркас").unwrap(),
            Condition::WhiteFrame,
        ),
        (
            Regex::new(r"(?i)black\s*frame|ч[её]рн\w*\s*каркас").unwrap(),
            Condition::BlackFrame,
        ),
        (
            Regex::new(r"(?i)renovated|ремонт").unwrap(),
            Condition::Renovated,
        ),
        (
            Regex::new(r"(?i)furnished|мебел|меблирован").unwrap(),
            Condition::Furnished,
        ),
        (
            Regex::new(r"(?i)under\s*construction|строится").unwrap(),
            Condition::UnderConstruction,
        ),
    ]
});

static UNFURNISHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bбез\s+мебел\w*|\bunfurnished\b").unwrap());

pub fn extract_condition(text: &str) -> Option<Condition> {
    let text = UNFURNISHED.replace_all(text, " ");
    CONDITIONS
        .iter()
        .find(|(re, _)| re.is_match(&text))
        .map(|(_, condition)| *condition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_order_wins() {
        // Both furnished and renovated: renovated comes first in the list.
        assert_eq!(
            extract_condition("С мебелью, свежий ремонт"),
            Some(Condition::Renovated)
        );
        assert_eq!(
            extract_condition("Белый каркас, дом строится"),
            Some(Condition::WhiteFrame)
        );
    }

    #[test]
    fn test_english_phrases() {
        assert_eq!(extract_condition("Black frame"), Some(Condition::BlackFrame));
        assert_eq!(
            extract_condition("Fully furnished flat"),
            Some(Condition::Furnished)
        );
        assert_eq!(
            extract_condition("Building under construction"),
            Some(Condition::UnderConstruction)
        );
    }

    #[test]
    fn test_no_condition() {
        assert_eq!(extract_condition("2+1, 85 m2"), None);
    }

    #[test]
    fn test_without_furniture_is_not_furnished() {
        assert_eq!(extract_condition("Квартира без мебели"), None);
        assert_eq!(extract_condition("Unfurnished, 2+1"), None);
        assert_eq!(
            extract_condition("Без мебели, строится"),
            Some(Condition::UnderConstruction)
        );
        assert_eq!(
            extract_condition("Квартира с мебелью"),
            Some(Condition::Furnished)
        );
    }
}
