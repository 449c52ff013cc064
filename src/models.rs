//! Core data models used throughout Estate Feed.
//!
//! These types represent the sources, listings, tombstones and media rows
//! that flow through the sync pipeline and the extraction engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One tracked channel.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: String,
    pub peer_id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
    /// Highest message id fully processed. Drives incremental sync.
    pub last_message_id: Option<i64>,
}

impl Source {
    /// Public link to a message of this channel, when the channel has a handle.
    pub fn permalink(&self, message_id: i64) -> Option<String> {
        self.username
            .as_ref()
            .map(|u| format!("https://t.me/{}/{}", u, message_id))
    }
}

/// Identity columns of a listing, enough to tombstone and delete it.
#[derive(Debug, Clone)]
pub struct ListingRef {
    pub id: String,
    pub source_id: String,
    pub listing_key: i64,
    pub message_id: i64,
    pub permalink: Option<String>,
}

/// A full listing row as stored in the catalog.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Listing {
    pub id: String,
    pub source_id: String,
    pub listing_key: i64,
    pub message_id: i64,
    pub title: Option<String>,
    pub description_raw: Option<String>,
    pub permalink: Option<String>,
    pub posted_at: i64,
    pub price_value: Option<f64>,
    pub price_currency: Option<String>,
    pub price_usd: Option<f64>,
    pub area_m2: Option<f64>,
    pub floor: Option<i64>,
    pub total_floors: Option<i64>,
    pub rooms_text: Option<String>,
    pub rooms_bedrooms: Option<i64>,
    pub rooms_living: Option<i64>,
    pub condition_norm: Option<String>,
    pub property_type: Option<String>,
    pub address_text: Option<String>,
    pub street: Option<String>,
    pub district: Option<String>,
    pub building_name: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub images: Vec<ListingImage>,
}

/// An image attached to a listing, ordered by `position`.
#[derive(Debug, Clone, Serialize)]
pub struct ListingImage {
    pub media_id: String,
    pub url: String,
    pub position: i64,
}

/// A stored attachment and where it lives in object storage.
#[derive(Debug, Clone)]
pub struct MediaRecord {
    pub id: String,
    pub storage_bucket: String,
    pub storage_path: String,
}

/// Why a listing key was tombstoned.
pub const REASON_SOURCE_DELETED: &str = "telegram_deleted";
pub const REASON_MANUAL: &str = "manual";

/// Price currency recognized by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Gel,
    Eur,
    Rub,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Gel => "GEL",
            Currency::Eur => "EUR",
            Currency::Rub => "RUB",
        }
    }

    pub fn parse(code: &str) -> Option<Currency> {
        match code.trim().to_ascii_uppercase().as_str() {
            "USD" => Some(Currency::Usd),
            "GEL" => Some(Currency::Gel),
            "EUR" => Some(Currency::Eur),
            "RUB" => Some(Currency::Rub),
            _ => None,
        }
    }
}

/// Normalized condition of the property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    WhiteFrame,
    BlackFrame,
    Renovated,
    Furnished,
    UnderConstruction,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::WhiteFrame => "WHITE_FRAME",
            Condition::BlackFrame => "BLACK_FRAME",
            Condition::Renovated => "RENOVATED",
            Condition::Furnished => "FURNISHED",
            Condition::UnderConstruction => "UNDER_CONSTRUCTION",
        }
    }

    pub fn parse(code: &str) -> Option<Condition> {
        match code.trim().to_ascii_uppercase().as_str() {
            "WHITE_FRAME" => Some(Condition::WhiteFrame),
            "BLACK_FRAME" => Some(Condition::BlackFrame),
            "RENOVATED" => Some(Condition::Renovated),
            "FURNISHED" => Some(Condition::Furnished),
            "UNDER_CONSTRUCTION" => Some(Condition::UnderConstruction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Apartment,
    Commercial,
    HouseLand,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Apartment => "apartment",
            PropertyType::Commercial => "commercial",
            PropertyType::HouseLand => "house_land",
        }
    }

    /// Map a stored value back to a known type; unknown values fall back to
    /// apartment.
    pub fn normalize(value: Option<&str>) -> PropertyType {
        match value {
            Some("commercial") => PropertyType::Commercial,
            Some("house_land") => PropertyType::HouseLand,
            _ => PropertyType::Apartment,
        }
    }
}

/// The three sync procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Backfill,
    Incremental,
    CheckDeleted,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Backfill => "backfill",
            SyncMode::Incremental => "incremental",
            SyncMode::CheckDeleted => "check_deleted",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permalink_requires_username() {
        let mut source = Source {
            id: "s".into(),
            peer_id: 1,
            title: None,
            username: None,
            last_message_id: None,
        };
        assert_eq!(source.permalink(5), None);
        source.username = Some("flats".into());
        assert_eq!(source.permalink(5).as_deref(), Some("https://t.me/flats/5"));
    }

    #[test]
    fn test_property_type_normalize() {
        assert_eq!(PropertyType::normalize(Some("commercial")), PropertyType::Commercial);
        assert_eq!(PropertyType::normalize(Some("villa")), PropertyType::Apartment);
        assert_eq!(PropertyType::normalize(None), PropertyType::Apartment);
    }

    #[test]
    fn test_code_parsing() {
        assert_eq!(Currency::parse("gel"), Some(Currency::Gel));
        assert_eq!(Currency::parse("BTC"), None);
        assert_eq!(Condition::parse("white_frame"), Some(Condition::WhiteFrame));
        assert_eq!(Condition::parse("new"), None);
    }

    #[test]
    fn test_sync_mode_serde() {
        let mode: SyncMode = serde_json::from_str("\"check_deleted\"").unwrap();
        assert_eq!(mode, SyncMode::CheckDeleted);
        assert_eq!(serde_json::to_string(&SyncMode::Backfill).unwrap(), "\"backfill\"");
    }
}
