use regex::Regex;
use std::sync::LazyLock;

use crate::models::PropertyType;

/// Keyword groups in priority order.
static PROPERTY_TYPES: LazyLock<Vec<(Regex, PropertyType)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)\b(квартир\w*|апартамент\w*|apartments?)\b").unwrap(),
            PropertyType::Apartment,
        ),
        (
            Regex::new(
                r"(?i)\b(коммерц\w*|коммерческ\w*|бизнес\w*|офис\w*|магазин\w*|кафе|ресторан\w*|склад\w*|помещен\w*|торгов\w*|commercial|office|shop|retail|warehouse|business)\b",
            )
            .unwrap(),
            PropertyType::Commercial,
        ),
        (
            Regex::new(
                r"(?i)\b(участ\w*|земл\w*|коттедж\w*|таунхаус\w*|частн\w*\s+дом\w*|дач\w*|house|land|villa|townhouse|plot)\b",
            )
            .unwrap(),
            PropertyType::HouseLand,
        ),
    ]
});

/// Classify a listing by keywords in its title and description.
pub fn classify_property_type(title: &str, description: &str) -> PropertyType {
    let text = format!("{} {}", title, description);
    PROPERTY_TYPES
        .iter()
        .find(|(re, _)| re.is_match(&text))
        .map(|(_, kind)| *kind)
        .unwrap_or(PropertyType::Apartment)
}
