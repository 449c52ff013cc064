use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloorMatch {
    pub floor: i64,
    /// Known only when the matched phrase encodes it.
    pub total_floors: Option<i64>,
}

struct FloorRule {
    pattern: Regex,
    floor_group: usize,
    total_group: Option<usize>,
}

impl FloorRule {
    fn new(pattern: &str, floor_group: usize, total_group: Option<usize>) -> Self {
        Self {
            pattern: Regex::new(pattern).unwrap(),
            floor_group,
            total_group,
        }
    }

    fn apply(&self, text: &str) -> Option<FloorMatch> {
        let caps = self.pattern.captures(text)?;
        let floor = caps.get(self.floor_group)?.as_str().parse().ok()?;
        let total_floors = self
            .total_group
            .and_then(|g| caps.get(g))
            .and_then(|m| m.as_str().parse().ok());
        Some(FloorMatch {
            floor,
            total_floors,
        })
    }
}

/// Tried in order; the first rule that matches decides.
static FLOOR_RULES: LazyLock<Vec<FloorRule>> = LazyLock::new(|| {
    vec![
        // "floor 3 of 9", "этаж 3 из 9"
        FloorRule::new(r"(?i)(?:(?:этаж|floor)\s*)?(\d{1,2})\s*(?:из|of)\s*(\d{1,2})", 1, Some(2)),
        // "floor: 3", "этаж - 3/9"
        FloorRule::new(r"(?i)(?:этаж|floor)\s*[:\-]?\s*(\d{1,2})(?:\s*/\s*(\d{1,2}))?", 1, Some(2)),
        // "floor 3/9"
        FloorRule::new(r"(?i)(?:этаж|floor)\s*(\d{1,2})\s*/\s*(\d{1,2})", 1, Some(2)),
        // "floor 3"
        FloorRule::new(r"(?i)(?:этаж|floor)\s*(\d{1,2})", 1, None),
        // "3/9 этаж"
        FloorRule::new(r"(?i)(\d{1,2})\s*/\s*(\d{1,2})\s*этаж", 1, Some(2)),
        // "3-й этаж", "3 этаж"
        FloorRule::new(r"(?i)(\d{1,2})\s*(?:-?\s*й)?\s*этаж", 1, None),
    ]
});

pub fn extract_floor(text: &str) -> Option<FloorMatch> {
    FLOOR_RULES.iter().find_map(|rule| rule.apply(text))
}
