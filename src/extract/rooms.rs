use regex::Regex;
use std::sync::LazyLock;

/// Room layout in the local `bedrooms+living` notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rooms {
    pub label: String,
    pub bedrooms: i64,
    pub living: i64,
}

static STUDIO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)studio|студи[яюи]").unwrap());
static PLUS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d)\s*\+\s*(\d)").unwrap());
static COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d)\s*-?\s*(?:комн|rooms?\b)").unwrap());

pub fn extract_rooms(text: &str) -> Option<Rooms> {
    if STUDIO.is_match(text) {
        return Some(Rooms {
            label: "studio".to_string(),
            bedrooms: 0,
            living: 1,
        });
    }

    if let Some(caps) = PLUS.captures(text) {
        let bedrooms: i64 = caps[1].parse().ok()?;
        let living: i64 = caps[2].parse().ok()?;
        return Some(Rooms {
            label: format!("{}+{}", bedrooms, living),
            bedrooms,
            living,
        });
    }

    // "N rooms" counts bedrooms; the living room is implied.
    let caps = COUNT.captures(text)?;
    let bedrooms: i64 = caps[1].parse().ok()?;
    Some(Rooms {
        label: format!("{}+1", bedrooms),
        bedrooms,
        living: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_studio() {
        let rooms = extract_rooms("studio apartment").unwrap();
        assert_eq!(rooms.label, "studio");
        assert_eq!(rooms.bedrooms, 0);
        assert_eq!(rooms.living, 1);
    }

    #[test]
    fn test_room_count_implies_living() {
        let rooms = extract_rooms("2 комнаты").unwrap();
        assert_eq!(rooms.label, "2+1");
        assert_eq!(rooms.bedrooms, 2);
        assert_eq!(rooms.living, 1);

        assert_eq!(extract_rooms("3-комнатная").unwrap().label, "3+1");
        assert_eq!(extract_rooms("1 room flat").unwrap().label, "1+1");
    }

    #[test]
    fn test_plus_notation_is_literal() {
        let rooms = extract_rooms("Квартира 3 + 2, 110 м2").unwrap();
        assert_eq!(rooms.label, "3+2");
        assert_eq!(rooms.bedrooms, 3);
        assert_eq!(rooms.living, 2);
    }

    #[test]
    fn test_no_rooms() {
        assert_eq!(extract_rooms("Продается участок"), None);
    }
}
