use std::path::Path;

use chrono::Utc;
use dialin_core::models::{BrewFields, CoffeeBrew, RecordId};
use dialin_core::util;
use serde::Serialize;

use crate::cli::BrewAddArgs;
use crate::commands::common::{format_relative_time, open_replica, resolve_record, short_id, truncate};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrewListItem {
    pub id: String,
    pub coffee_bag_id: String,
    pub bag: Option<String>,
    pub grind_setting: f64,
    pub dry_weight: f64,
    pub brew_time: f64,
    pub pressure_reading: f64,
    pub notes: Option<String>,
    pub created_at: i64,
    pub relative_time: String,
    pub pending_sync: bool,
}

pub async fn run_brew_add(args: &BrewAddArgs, db_path: &Path) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let bag = resolve_record(&replica.bags, &args.bag).await?;

    let mut fields = BrewFields::new(bag.id, args.grind, args.dose, args.time, args.pressure);
    fields.notes = util::normalize_text_option(args.notes.clone());

    let brew = replica.brews.create(fields).await?;
    println!("{}", brew.id);
    Ok(())
}

pub async fn run_brew_list(
    bag: Option<&str>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let bag_filter: Option<RecordId> = match bag {
        Some(query) => Some(resolve_record(&replica.bags, query).await?.id),
        None => None,
    };
    let bags = replica.bags.list_visible().await;

    let brews: Vec<CoffeeBrew> = replica
        .brews
        .list_visible()
        .await
        .into_iter()
        .filter(|brew| bag_filter.map_or(true, |id| brew.payload.coffee_bag_id == id))
        .take(limit)
        .collect();

    let now_ms = Utc::now().timestamp_millis();
    let items: Vec<BrewListItem> = brews
        .iter()
        .map(|brew| BrewListItem {
            id: brew.id.to_string(),
            coffee_bag_id: brew.payload.coffee_bag_id.to_string(),
            bag: bags
                .iter()
                .find(|bag| bag.id == brew.payload.coffee_bag_id)
                .map(|bag| bag.payload.label()),
            grind_setting: brew.payload.grind_setting,
            dry_weight: brew.payload.dry_weight,
            brew_time: brew.payload.brew_time,
            pressure_reading: brew.payload.pressure_reading,
            notes: brew.payload.notes.clone(),
            created_at: brew.created_at.timestamp_millis(),
            relative_time: format_relative_time(brew.created_at.timestamp_millis(), now_ms),
            pending_sync: brew.is_dirty,
        })
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No brews recorded.");
        return Ok(());
    }

    for (brew, item) in brews.iter().zip(&items) {
        println!("{}", format_brew_line(brew, item));
    }
    Ok(())
}

pub fn format_brew_line(brew: &CoffeeBrew, item: &BrewListItem) -> String {
    let fields = &brew.payload;
    let bag = truncate(item.bag.as_deref().unwrap_or("(deleted bag)"), 24);
    let mut line = format!(
        "{:<13}  {bag:<24}  grind {:<5}  {}g  {}s  {} bar  {}",
        short_id(brew.id),
        fields.grind_setting,
        fields.dry_weight,
        fields.brew_time,
        fields.pressure_reading,
        item.relative_time
    );
    if item.pending_sync {
        line.push_str("  *");
    }
    line
}

pub async fn run_brew_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let brew = resolve_record(&replica.brews, id).await?;

    replica.brews.soft_delete(brew.id).await?;
    println!("{}", brew.id);
    Ok(())
}
