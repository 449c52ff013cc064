//! Heuristic field extraction.
//!
//! Turns the free-text description of a listing into typed fields. Every
//! extractor is a pure function returning `Option<T>`; `None` means "nothing
//! found" and is never an error. [`run_extraction`] applies the extractors to
//! catalog rows under an overwrite policy:
//!
//! - property type is rewritten whenever the classification changes
//! - price is rewritten when the new match is explicit-tier, or the stored
//!   price is absent, zero, below the plausibility floor or lower than the
//!   new value
//! - every other field is written only when it is missing

pub mod address;
pub mod area;
pub mod condition;
pub mod floor;
pub mod number;
pub mod price;
pub mod property_type;
pub mod rooms;

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::catalog::{self, ColumnValue};
use crate::config::{Config, ExtractionConfig};
use crate::db;
use crate::ingest::SyncReport;
use crate::models::{Condition, Listing, PropertyType, SyncMode};

pub use address::{pick_address_line, pick_building_name};
pub use area::extract_area;
pub use condition::extract_condition;
pub use floor::{extract_floor, FloorMatch};
pub use number::{normalize_line, normalize_number};
pub use price::{extract_price, is_price_per_area, PriceMatch, PricePass, PriceTier, PRICE_PASSES};
pub use property_type::classify_property_type;
pub use rooms::{extract_rooms, Rooms};

/// Trimmed, non-empty lines of a text.
pub(crate) fn split_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Everything the extractors find in one listing text.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFields {
    pub property_type: PropertyType,
    pub price: Option<PriceMatch>,
    pub area_m2: Option<f64>,
    pub rooms: Option<Rooms>,
    pub floor: Option<FloorMatch>,
    pub condition: Option<Condition>,
    pub address_line: Option<String>,
    pub building_name: Option<String>,
}

/// Run every extractor once over a title and description.
pub fn extract_fields(title: &str, description: &str) -> ExtractedFields {
    let lines = split_lines(description);
    ExtractedFields {
        property_type: classify_property_type(title, description),
        price: extract_price(description),
        area_m2: extract_area(description),
        rooms: extract_rooms(description),
        floor: extract_floor(description),
        condition: extract_condition(description),
        address_line: pick_address_line(&lines),
        building_name: pick_building_name(&lines),
    }
}

/// Running totals of one extraction pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub scanned: usize,
    pub updated: usize,
    pub descriptions_filled: usize,
    pub skipped_empty: usize,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// Columns to write for a listing under the overwrite policy.
pub fn plan_updates(
    listing: &Listing,
    fields: &ExtractedFields,
    min_plausible_price: f64,
) -> Vec<(&'static str, ColumnValue)> {
    let mut updates = Vec::new();

    if listing.property_type.as_deref() != Some(fields.property_type.as_str()) {
        updates.push((
            "property_type",
            ColumnValue::Text(Some(fields.property_type.as_str().to_string())),
        ));
    }

    if let Some(price) = fields.price {
        let overwrite = price.tier == PriceTier::Explicit
            || match listing.price_value {
                None => true,
                Some(stored) => {
                    stored == 0.0 || stored < min_plausible_price || stored < price.value
                }
            };
        if overwrite {
            updates.push(("price_value", ColumnValue::Real(Some(price.value))));
            updates.push((
                "price_currency",
                ColumnValue::Text(Some(price.currency.as_str().to_string())),
            ));
            updates.push(("price_usd", ColumnValue::Real(price.usd)));
        }
    }

    if listing.area_m2.is_none() {
        if let Some(area) = fields.area_m2 {
            updates.push(("area_m2", ColumnValue::Real(Some(area))));
        }
    }

    if is_blank(&listing.rooms_text) && listing.rooms_bedrooms.is_none() {
        if let Some(ref rooms) = fields.rooms {
            updates.push(("rooms_text", ColumnValue::Text(Some(rooms.label.clone()))));
            updates.push(("rooms_bedrooms", ColumnValue::Int(Some(rooms.bedrooms))));
            updates.push(("rooms_living", ColumnValue::Int(Some(rooms.living))));
        }
    }

    if let Some(floor) = fields.floor {
        if listing.floor.is_none() {
            updates.push(("floor", ColumnValue::Int(Some(floor.floor))));
        }
        if listing.total_floors.is_none() {
            if let Some(total) = floor.total_floors {
                updates.push(("total_floors", ColumnValue::Int(Some(total))));
            }
        }
    }

    if is_blank(&listing.condition_norm) {
        if let Some(condition) = fields.condition {
            updates.push((
                "condition_norm",
                ColumnValue::Text(Some(condition.as_str().to_string())),
            ));
        }
    }

    if is_blank(&listing.address_text) {
        if let Some(ref address) = fields.address_line {
            updates.push(("address_text", ColumnValue::Text(Some(address.clone()))));
        }
    }
    if is_blank(&listing.building_name) {
        if let Some(ref name) = fields.building_name {
            updates.push(("building_name", ColumnValue::Text(Some(name.clone()))));
        }
    }

    updates
}

/// Give listings without a description the longest text among the messages
/// that share their listing key.
async fn fill_missing_descriptions(
    pool: &SqlitePool,
    scope: Option<&[String]>,
    report: &mut ExtractionReport,
) -> Result<()> {
    let missing = catalog::listings_missing_description(pool, scope).await?;
    if missing.is_empty() {
        return Ok(());
    }
    info!(count = missing.len(), "filling missing descriptions");

    for (id, source_id, listing_key) in missing {
        if let Some(text) = catalog::longest_message_text(pool, &source_id, listing_key).await? {
            catalog::update_listing_columns(pool, &id, &[("description_raw", ColumnValue::Text(Some(text)))])
                .await?;
            report.descriptions_filled += 1;
        }
    }
    Ok(())
}

async fn extract_batch(
    pool: &SqlitePool,
    config: &ExtractionConfig,
    batch: &[Listing],
    report: &mut ExtractionReport,
) -> Result<()> {
    for listing in batch {
        report.scanned += 1;
        let description = listing.description_raw.as_deref().unwrap_or("");
        if description.trim().is_empty() {
            report.skipped_empty += 1;
            continue;
        }

        let title = listing.title.as_deref().unwrap_or("");
        let fields = extract_fields(title, description);
        let updates = plan_updates(listing, &fields, config.min_plausible_price);
        if updates.is_empty() {
            continue;
        }

        debug!(listing_id = %listing.id, columns = updates.len(), "applying extracted fields");
        catalog::update_listing_columns(pool, &listing.id, &updates).await?;
        report.updated += 1;
    }
    Ok(())
}

/// Extract typed fields for all listings, or only those in `scope`.
pub async fn run_extraction(
    pool: &SqlitePool,
    config: &ExtractionConfig,
    scope: Option<&[String]>,
) -> Result<ExtractionReport> {
    let mut report = ExtractionReport::default();
    let scope = scope.filter(|ids| !ids.is_empty());

    fill_missing_descriptions(pool, scope, &mut report).await?;

    match scope {
        Some(ids) => {
            for chunk in ids.chunks(config.batch_size) {
                let batch = catalog::listings_by_ids(pool, chunk).await?;
                extract_batch(pool, config, &batch, &mut report).await?;
            }
        }
        None => {
            let mut offset = 0;
            loop {
                let batch = catalog::listing_page(pool, offset, config.batch_size).await?;
                if batch.is_empty() {
                    break;
                }
                info!(from = offset + 1, to = offset + batch.len(), "extracting listings");
                extract_batch(pool, config, &batch, &mut report).await?;
                if batch.len() < config.batch_size {
                    break;
                }
                offset += config.batch_size;
            }
        }
    }

    info!(
        scanned = report.scanned,
        updated = report.updated,
        descriptions_filled = report.descriptions_filled,
        "extraction complete"
    );
    Ok(report)
}

/// Re-extract what a sync run produced: everything after a backfill, the
/// touched listings after an incremental run, nothing otherwise.
pub async fn extract_after_sync(
    pool: &SqlitePool,
    config: &ExtractionConfig,
    report: &SyncReport,
) -> Result<Option<ExtractionReport>> {
    match report.mode {
        SyncMode::Backfill => Ok(Some(run_extraction(pool, config, None).await?)),
        SyncMode::Incremental if !report.listings_touched.is_empty() => {
            let ids = report.touched_ids();
            Ok(Some(run_extraction(pool, config, Some(&ids)).await?))
        }
        _ => Ok(None),
    }
}

pub fn print_extraction_report(report: &ExtractionReport) {
    println!("extract");
    println!("  scanned: {}", report.scanned);
    println!("  updated: {}", report.updated);
    println!("  descriptions filled: {}", report.descriptions_filled);
    println!("  skipped (no description): {}", report.skipped_empty);
}

/// Print what every extractor finds in `text`.
pub fn print_preview(text: &str) {
    let fields = extract_fields("", text);
    let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

    println!("--- Extracted ---");
    println!("property_type:  {}", fields.property_type.as_str());
    match fields.price {
        Some(p) => println!(
            "price:          {} {} ({:?}{})",
            p.value,
            p.currency.as_str(),
            p.tier,
            p.usd.map(|u| format!(", usd {}", u)).unwrap_or_default()
        ),
        None => println!("price:          -"),
    }
    println!("area_m2:        {}", or_dash(fields.area_m2.map(|a| a.to_string())));
    println!("rooms:          {}", or_dash(fields.rooms.map(|r| r.label)));
    println!(
        "floor:          {}",
        or_dash(fields.floor.map(|f| match f.total_floors {
            Some(total) => format!("{}/{}", f.floor, total),
            None => f.floor.to_string(),
        }))
    );
    println!("condition:      {}", or_dash(fields.condition.map(|c| c.as_str().to_string())));
    println!("address:        {}", or_dash(fields.address_line));
    println!("building_name:  {}", or_dash(fields.building_name));
}

/// `estate extract`: preview one text, or extract over the catalog.
pub async fn run_extract_command(
    config: &Config,
    listing_ids: &[String],
    preview: Option<&str>,
) -> Result<()> {
    if let Some(text) = preview {
        print_preview(text);
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let scope = (!listing_ids.is_empty()).then_some(listing_ids);
    let report = run_extraction(&pool, &config.extraction, scope).await?;
    pool.close().await;

    print_extraction_report(&report);
    println!("ok");
    Ok(())
}
