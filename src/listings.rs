//! Operator actions on single listings.
//!
//! Backs `estate get` / `estate delete` and the `/listings/{id}` routes of
//! the control surface. A partial update distinguishes a field that is
//! absent (left alone) from one set to `null` (cleared).

use serde::{Deserialize, Deserializer};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{self, ColumnValue};
use crate::media;
use crate::models::{Condition, Currency, Listing, PropertyType, REASON_MANUAL};
use crate::storage::ObjectStore;

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("listing not found: {0}")]
    NotFound(String),

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("catalog error: {0}")]
    Catalog(#[from] sqlx::Error),
}

/// `Some(None)` for an explicit `null`, `None` when the key is absent.
fn explicit_null<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// A partial update of the typed listing fields.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListingUpdate {
    #[serde(default, deserialize_with = "explicit_null")]
    pub price_value: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub price_currency: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub price_usd: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub area_m2: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub floor: Option<Option<i64>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub total_floors: Option<Option<i64>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub rooms_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub rooms_bedrooms: Option<Option<i64>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub rooms_living: Option<Option<i64>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub condition_norm: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub property_type: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub district: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub street: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub building_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub address_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub lat: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub lng: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub description_raw: Option<Option<String>>,
}

fn clean_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_currency(value: &Option<String>) -> Result<Option<Currency>, ListingError> {
    match clean_text(value) {
        None => Ok(None),
        Some(code) => Currency::parse(&code)
            .map(Some)
            .ok_or_else(|| ListingError::Invalid {
                field: "price_currency",
                message: format!("unknown currency '{}'", code),
            }),
    }
}

impl ListingUpdate {
    /// Translate into column writes.
    ///
    /// Setting a price without a currency means USD, and `price_usd` follows
    /// the value unless given or the currency is not USD. Clearing the price
    /// clears currency and USD amount too. A cleared property type falls
    /// back to apartment.
    pub fn to_columns(&self) -> Result<Vec<(&'static str, ColumnValue)>, ListingError> {
        let mut columns = Vec::new();

        match self.price_value {
            Some(Some(value)) => {
                if !value.is_finite() || value < 0.0 {
                    return Err(ListingError::Invalid {
                        field: "price_value",
                        message: format!("{} is not a valid price", value),
                    });
                }
                let currency = match &self.price_currency {
                    Some(code) => parse_currency(code)?.unwrap_or(Currency::Usd),
                    None => Currency::Usd,
                };
                let usd = match self.price_usd {
                    Some(usd) => usd,
                    None if currency == Currency::Usd => Some(value),
                    None => None,
                };
                columns.push(("price_value", ColumnValue::Real(Some(value))));
                columns.push((
                    "price_currency",
                    ColumnValue::Text(Some(currency.as_str().to_string())),
                ));
                columns.push(("price_usd", ColumnValue::Real(usd)));
            }
            Some(None) => {
                columns.push(("price_value", ColumnValue::Real(None)));
                columns.push(("price_currency", ColumnValue::Text(None)));
                columns.push(("price_usd", ColumnValue::Real(None)));
            }
            None => {
                if let Some(code) = &self.price_currency {
                    let currency = parse_currency(code)?;
                    columns.push((
                        "price_currency",
                        ColumnValue::Text(currency.map(|c| c.as_str().to_string())),
                    ));
                }
                if let Some(usd) = self.price_usd {
                    columns.push(("price_usd", ColumnValue::Real(usd)));
                }
            }
        }

        if let Some(condition) = &self.condition_norm {
            let code = match clean_text(condition) {
                None => None,
                Some(code) => Some(
                    Condition::parse(&code)
                        .ok_or_else(|| ListingError::Invalid {
                            field: "condition_norm",
                            message: format!("unknown condition '{}'", code),
                        })?
                        .as_str()
                        .to_string(),
                ),
            };
            columns.push(("condition_norm", ColumnValue::Text(code)));
        }

        if let Some(kind) = &self.property_type {
            let kind = PropertyType::normalize(kind.as_deref().map(str::trim));
            columns.push(("property_type", ColumnValue::Text(Some(kind.as_str().to_string()))));
        }

        let reals = [
            ("area_m2", self.area_m2),
            ("lat", self.lat),
            ("lng", self.lng),
        ];
        for (column, value) in reals {
            if let Some(v) = value {
                columns.push((column, ColumnValue::Real(v)));
            }
        }

        let ints = [
            ("floor", self.floor),
            ("total_floors", self.total_floors),
            ("rooms_bedrooms", self.rooms_bedrooms),
            ("rooms_living", self.rooms_living),
        ];
        for (column, value) in ints {
            if let Some(v) = value {
                columns.push((column, ColumnValue::Int(v)));
            }
        }

        let texts = [
            ("rooms_text", &self.rooms_text),
            ("district", &self.district),
            ("street", &self.street),
            ("building_name", &self.building_name),
            ("address_text", &self.address_text),
            ("description_raw", &self.description_raw),
        ];
        for (column, value) in texts {
            if let Some(v) = value {
                columns.push((column, ColumnValue::Text(clean_text(v))));
            }
        }

        Ok(columns)
    }
}

pub async fn get_listing(pool: &SqlitePool, id: &str) -> Result<Listing, ListingError> {
    catalog::get_listing(pool, id)
        .await?
        .ok_or_else(|| ListingError::NotFound(id.to_string()))
}

/// Apply a partial update and return the listing as stored afterwards.
pub async fn update_listing(
    pool: &SqlitePool,
    id: &str,
    update: &ListingUpdate,
) -> Result<Listing, ListingError> {
    let columns = update.to_columns()?;
    if !columns.is_empty() && !catalog::update_listing_columns(pool, id, &columns).await? {
        return Err(ListingError::NotFound(id.to_string()));
    }
    info!(listing_id = id, columns = columns.len(), "listing updated");
    get_listing(pool, id).await
}

/// Tombstone a listing, remove its media, then delete it.
///
/// The tombstone is written first so a concurrent sync cannot re-create the
/// listing from the same message.
pub async fn delete_listing(
    pool: &SqlitePool,
    store: &dyn ObjectStore,
    id: &str,
    reason: Option<&str>,
    deleted_by: Option<&str>,
) -> Result<(), ListingError> {
    let listing = catalog::get_listing_ref(pool, id)
        .await?
        .ok_or_else(|| ListingError::NotFound(id.to_string()))?;

    let reason = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(REASON_MANUAL);
    catalog::insert_tombstone(pool, &listing, Some(reason), deleted_by).await?;

    match media::cleanup_media(pool, store, id).await {
        Ok(removed) => info!(listing_id = id, removed, "listing media removed"),
        Err(e) => warn!(listing_id = id, error = %e, "media cleanup failed"),
    }

    catalog::delete_listing(pool, id).await?;
    info!(listing_id = id, reason, "listing deleted");
    Ok(())
}
