use std::path::Path;

use chrono::Utc;
use dialin_core::models::{BagFields, CoffeeBag};
use dialin_core::util;
use serde::Serialize;

use crate::cli::{BagAddArgs, BagEditArgs};
use crate::commands::common::{
    format_relative_time, open_replica, resolve_record, short_id, truncate,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BagListItem {
    pub id: String,
    pub name: String,
    pub roaster_name: String,
    pub style: String,
    pub notes: String,
    pub archived: bool,
    pub brews: usize,
    pub updated_at: i64,
    pub relative_time: String,
    pub pending_sync: bool,
}

pub async fn run_bag_add(args: &BagAddArgs, db_path: &Path) -> Result<(), CliError> {
    let name = args.name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidInput("bag name cannot be empty".to_string()));
    }

    let mut fields = BagFields::new(name, args.roaster.trim());
    fields.style = args.style.trim().to_string();
    fields.notes = args.notes.trim().to_string();
    fields.date_roasted = args.roasted;
    fields.date_opened = args.opened;

    let replica = open_replica(db_path).await?;
    let bag = replica.bags.create(fields).await?;
    println!("{}", bag.id);
    Ok(())
}

pub async fn run_bag_list(
    limit: usize,
    include_archived: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let brews = replica.brews.list_visible().await;
    let bags: Vec<CoffeeBag> = replica
        .bags
        .list_visible()
        .await
        .into_iter()
        .filter(|bag| include_archived || bag.payload.archived_at.is_none())
        .take(limit)
        .collect();

    let now_ms = Utc::now().timestamp_millis();
    let items: Vec<BagListItem> = bags
        .iter()
        .map(|bag| BagListItem {
            id: bag.id.to_string(),
            name: bag.payload.name.clone(),
            roaster_name: bag.payload.roaster_name.clone(),
            style: bag.payload.style.clone(),
            notes: bag.payload.notes.clone(),
            archived: bag.payload.archived_at.is_some(),
            brews: brews
                .iter()
                .filter(|brew| brew.payload.coffee_bag_id == bag.id)
                .count(),
            updated_at: bag.updated_at.timestamp_millis(),
            relative_time: format_relative_time(bag.updated_at.timestamp_millis(), now_ms),
            pending_sync: bag.is_dirty,
        })
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No bags yet. Add one with `dialin bag add <name>`.");
        return Ok(());
    }

    for (bag, item) in bags.iter().zip(&items) {
        println!("{}", format_bag_line(bag, item));
    }
    Ok(())
}

pub fn format_bag_line(bag: &CoffeeBag, item: &BagListItem) -> String {
    let label = truncate(&bag.payload.label(), 40);
    let brews = match item.brews {
        1 => "1 brew".to_string(),
        count => format!("{count} brews"),
    };
    let mut line = format!(
        "{:<13}  {label:<40}  {brews:<9}  {}",
        short_id(bag.id),
        item.relative_time
    );
    if item.archived {
        line.push_str("  [archived]");
    }
    if item.pending_sync {
        line.push_str("  *");
    }
    line
}

pub async fn run_bag_edit(args: &BagEditArgs, db_path: &Path) -> Result<(), CliError> {
    let no_changes = args.name.is_none()
        && args.roaster.is_none()
        && args.style.is_none()
        && args.notes.is_none()
        && args.roasted.is_none()
        && args.opened.is_none()
        && !args.archive
        && !args.unarchive;
    if no_changes {
        return Err(CliError::InvalidInput(
            "nothing to change; pass at least one field flag".to_string(),
        ));
    }
    if let Some(name) = &args.name {
        if name.trim().is_empty() {
            return Err(CliError::InvalidInput("bag name cannot be empty".to_string()));
        }
    }

    let replica = open_replica(db_path).await?;
    let bag = resolve_record(&replica.bags, &args.id).await?;

    let edit = args.clone();
    let archived_at = util::now();
    let updated = replica
        .bags
        .update(bag.id, move |fields| {
            if let Some(name) = edit.name {
                fields.name = name.trim().to_string();
            }
            if let Some(roaster) = edit.roaster {
                fields.roaster_name = roaster.trim().to_string();
            }
            if let Some(style) = edit.style {
                fields.style = style.trim().to_string();
            }
            if let Some(notes) = edit.notes {
                fields.notes = notes.trim().to_string();
            }
            if edit.roasted.is_some() {
                fields.date_roasted = edit.roasted;
            }
            if edit.opened.is_some() {
                fields.date_opened = edit.opened;
            }
            if edit.archive && fields.archived_at.is_none() {
                fields.archived_at = Some(archived_at);
            }
            if edit.unarchive {
                fields.archived_at = None;
            }
        })
        .await?;

    println!("{}", updated.id);
    Ok(())
}

pub async fn run_bag_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let bag = resolve_record(&replica.bags, id).await?;

    replica.bags.soft_delete(bag.id).await?;
    println!("{}", bag.id);
    Ok(())
}
