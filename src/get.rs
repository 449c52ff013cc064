//! `estate get` and `estate delete`.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::listings::{self, ListingError};
use crate::storage;

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = listings::get_listing(&pool, id).await;
    pool.close().await;

    let listing = match result {
        Ok(l) => l,
        Err(ListingError::NotFound(_)) => {
            eprintln!("Error: listing not found: {}", id);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let text = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    let num = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_else(|| "-".to_string());
    let int = |v: Option<i64>| v.map(|x| x.to_string()).unwrap_or_else(|| "-".to_string());

    println!("--- Listing ---");
    println!("id:             {}", listing.id);
    println!("source_id:      {}", listing.source_id);
    println!("listing_key:    {}", listing.listing_key);
    println!("message_id:     {}", listing.message_id);
    println!("posted_at:      {}", format_ts_iso(listing.posted_at));
    if let Some(ref url) = listing.permalink {
        println!("permalink:      {}", url);
    }
    println!("property_type:  {}", text(&listing.property_type));
    println!(
        "price:          {} {} (usd {})",
        num(listing.price_value),
        text(&listing.price_currency),
        num(listing.price_usd)
    );
    println!("area_m2:        {}", num(listing.area_m2));
    println!(
        "rooms:          {} ({} bedrooms, {} living)",
        text(&listing.rooms_text),
        int(listing.rooms_bedrooms),
        int(listing.rooms_living)
    );
    println!(
        "floor:          {} of {}",
        int(listing.floor),
        int(listing.total_floors)
    );
    println!("condition:      {}", text(&listing.condition_norm));
    println!("address:        {}", text(&listing.address_text));
    println!("building_name:  {}", text(&listing.building_name));
    println!();

    println!("--- Description ---");
    println!("{}", listing.description_raw.as_deref().unwrap_or(""));
    println!();

    println!("--- Images ({}) ---", listing.images.len());
    for image in &listing.images {
        println!("[{}] {}", image.position, image.url);
    }

    Ok(())
}

pub async fn run_delete(config: &Config, id: &str, reason: Option<&str>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = storage::create_store(&config.storage)?;
    let result = listings::delete_listing(&pool, store.as_ref(), id, reason, Some("cli")).await;
    pool.close().await;

    match result {
        Ok(()) => {
            println!("deleted {}", id);
            println!("ok");
            Ok(())
        }
        Err(ListingError::NotFound(_)) => {
            eprintln!("Error: listing not found: {}", id);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
