use std::path::Path;

use chrono::Utc;
use dialin_core::export::{build_export, render_export};

use crate::cli::ExportFormat;
use crate::commands::common::open_replica;
use crate::error::CliError;

pub async fn run_export(
    format: ExportFormat,
    output_path: Option<&Path>,
    db_path: &Path,
) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let bags = replica.bags.list_visible().await;
    let brews = replica.brews.list_visible().await;

    let document = build_export(&bags, &brews, Utc::now());
    let rendered = render_export(&document, format.into())?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }

    Ok(())
}
