//! Best-effort address heuristics. These pick lines, they do not parse.

use regex::Regex;
use std::sync::LazyLock;

const MAX_BUILDING_NAME_CHARS: usize = 60;

static STREET_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\bул\b\.?|\bулиц\w*|\bstreet\b|\bst\.|\bпросп\w*|\bave\.|\bavenue\b|\bбульвар\w*|\bпр-т\b|\bрайон\w*)",
    )
    .unwrap()
});
static HOUSE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*\d{1,4}\b").unwrap());

static LETTERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-zА-Яа-яЁё]").unwrap());
static PRICE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\$|usd|₾|gel|€|₽|руб|долл)").unwrap());
static AREA_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(m2|m²|sqm|кв\.?\s?м|м2|м²)").unwrap());
static FLOOR_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)этаж|floor").unwrap());

/// First line that names a street, avenue or district, or ends in `, <number>`.
pub fn pick_address_line(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|line| STREET_KEYWORD.is_match(line) || HOUSE_NUMBER.is_match(line))
        .map(|line| line.to_string())
}

/// First short line with letters and no price, area or floor token.
pub fn pick_building_name(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|line| {
            LETTERS.is_match(line)
                && !PRICE_TOKEN.is_match(line)
                && !AREA_TOKEN.is_match(line)
                && !FLOOR_TOKEN.is_match(line)
                && line.chars().count() <= MAX_BUILDING_NAME_CHARS
        })
        .map(|line| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_by_keyword_or_number() {
        let lines = ["Продается квартира", "ул. Пекина, 14", "$90,000"];
        assert_eq!(pick_address_line(&lines).as_deref(), Some("ул. Пекина, 14"));

        let lines = ["Sale", "Chavchavadze, 37"];
        assert_eq!(pick_address_line(&lines).as_deref(), Some("Chavchavadze, 37"));

        assert_eq!(pick_address_line(&["Уютная квартира", "85 m2"]), None);
    }

    #[test]
    fn test_building_name_skips_data_lines() {
        let lines = ["$120,000", "85 м²", "5 этаж", "ЖК Green Diamond"];
        assert_eq!(
            pick_building_name(&lines).as_deref(),
            Some("ЖК Green Diamond")
        );
    }

    #[test]
    fn test_building_name_length_cutoff() {
        let long = "Очень длинное описание квартиры которое явно не является названием дома";
        assert_eq!(pick_building_name(&[long]), None);
    }
}
