//! Export helpers shared by the CLI and the server.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BagFields, BrewFields, CoffeeBag, CoffeeBrew, RecordId};

/// Export output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Markdown,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }

    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Markdown => "text/markdown; charset=utf-8",
        }
    }
}

/// Bags with their brews nested underneath.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub bags: Vec<ExportBag>,
    /// Brews whose bag is missing from the export
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unfiled_brews: Vec<ExportBrew>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBag {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: BagFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub brews: Vec<ExportBrew>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBrew {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: BrewFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CoffeeBrew> for ExportBrew {
    fn from(brew: &CoffeeBrew) -> Self {
        Self {
            id: brew.id,
            fields: brew.payload.clone(),
            created_at: brew.created_at,
            updated_at: brew.updated_at,
        }
    }
}

/// Nest live brews under their live bags. Tombstones are left out; bag order
/// is kept and brews are ordered oldest first.
pub fn build_export(
    bags: &[CoffeeBag],
    brews: &[CoffeeBrew],
    exported_at: DateTime<Utc>,
) -> ExportDocument {
    let mut by_bag: HashMap<RecordId, Vec<ExportBrew>> = HashMap::new();
    let mut live_brews: Vec<&CoffeeBrew> = brews.iter().filter(|brew| !brew.is_deleted()).collect();
    live_brews.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    for brew in live_brews {
        by_bag
            .entry(brew.payload.coffee_bag_id)
            .or_default()
            .push(ExportBrew::from(brew));
    }

    let bags = bags
        .iter()
        .filter(|bag| !bag.is_deleted())
        .map(|bag| ExportBag {
            id: bag.id,
            fields: bag.payload.clone(),
            created_at: bag.created_at,
            updated_at: bag.updated_at,
            brews: by_bag.remove(&bag.id).unwrap_or_default(),
        })
        .collect();

    let mut unfiled_brews: Vec<ExportBrew> = by_bag.into_values().flatten().collect();
    unfiled_brews.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    ExportDocument {
        exported_at,
        bags,
        unfiled_brews,
    }
}

/// Render as pretty-printed JSON.
pub fn render_json_export(document: &ExportDocument) -> serde_json::Result<String> {
    serde_json::to_string_pretty(document)
}

/// Render as Markdown: one section per bag with a brew table.
#[must_use]
pub fn render_markdown_export(document: &ExportDocument) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Dial-In export");
    let _ = writeln!(output);
    let _ = writeln!(output, "Exported {}", format_timestamp(document.exported_at));

    for bag in &document.bags {
        let fields = &bag.fields;
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", fields.label());
        let _ = writeln!(output);
        let _ = writeln!(output, "- id: {}", bag.id);
        if !fields.style.trim().is_empty() {
            let _ = writeln!(output, "- style: {}", fields.style.trim());
        }
        if let Some(roasted) = fields.date_roasted {
            let _ = writeln!(output, "- roasted: {}", roasted.format("%Y-%m-%d"));
        }
        if let Some(opened) = fields.date_opened {
            let _ = writeln!(output, "- opened: {}", opened.format("%Y-%m-%d"));
        }
        if fields.archived_at.is_some() {
            let _ = writeln!(output, "- archived");
        }
        if !fields.notes.trim().is_empty() {
            let _ = writeln!(output);
            let _ = writeln!(output, "{}", fields.notes.trim());
        }
        write_brew_table(&mut output, &bag.brews);
    }

    if !document.unfiled_brews.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Unfiled brews");
        write_brew_table(&mut output, &document.unfiled_brews);
    }

    output
}

fn write_brew_table(output: &mut String, brews: &[ExportBrew]) {
    if brews.is_empty() {
        return;
    }
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "| Brewed | Grind | Dose (g) | Time (s) | Pressure | Notes |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|");
    for brew in brews {
        let fields = &brew.fields;
        let notes = fields
            .notes
            .as_deref()
            .map(|notes| notes.replace('|', "\\|").replace('\n', " "))
            .unwrap_or_default();
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} |",
            format_timestamp(brew.created_at),
            fields.grind_setting,
            fields.dry_weight,
            fields.brew_time,
            fields.pressure_reading,
            notes.trim()
        );
    }
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Render an export in the selected format.
pub fn render_export(document: &ExportDocument, format: ExportFormat) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => render_json_export(document),
        ExportFormat::Markdown => Ok(render_markdown_export(document)),
    }
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(format: ExportFormat, timestamp_ms: i64) -> String {
    format!("dialin-export-{timestamp_ms}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::util;
    use chrono::Duration;

    fn fixture() -> (Vec<CoffeeBag>, Vec<CoffeeBrew>) {
        let device = DeviceId::from("dev-a");
        let kenya = CoffeeBag::new(BagFields::new("Kenya", "Sey"), device.clone());
        let mut gone = CoffeeBag::new(BagFields::new("Gone", "Sey"), device.clone());
        gone.deleted_at = Some(util::now());

        let mut first = CoffeeBrew::new(BrewFields::new(kenya.id, 12.0, 18.0, 27.0, 9.0), device.clone());
        first.payload.notes = Some("sour | thin".to_string());
        let mut second = CoffeeBrew::new(BrewFields::new(kenya.id, 11.0, 18.0, 30.0, 9.0), device.clone());
        second.created_at = first.created_at + Duration::seconds(10);
        let orphan = CoffeeBrew::new(BrewFields::new(RecordId::new(), 10.0, 17.0, 25.0, 8.0), device);

        (vec![kenya, gone], vec![second, first, orphan])
    }

    #[test]
    fn build_export_nests_live_brews_under_bags() {
        let (bags, brews) = fixture();
        let document = build_export(&bags, &brews, util::now());

        assert_eq!(document.bags.len(), 1);
        let bag = &document.bags[0];
        assert_eq!(bag.fields.name, "Kenya");
        assert_eq!(bag.brews.len(), 2);
        assert!(bag.brews[0].created_at < bag.brews[1].created_at);
        assert_eq!(document.unfiled_brews.len(), 1);
    }

    #[test]
    fn json_export_uses_camel_case_keys() {
        let (bags, brews) = fixture();
        let document = build_export(&bags, &brews, util::now());
        let value: serde_json::Value =
            serde_json::from_str(&render_json_export(&document).unwrap()).unwrap();

        assert!(value.get("exportedAt").is_some());
        assert_eq!(value["bags"][0]["roasterName"], "Sey");
        assert_eq!(value["bags"][0]["brews"][0]["grindSetting"], 12.0);
    }

    #[test]
    fn markdown_export_renders_bag_sections_and_escapes_notes() {
        let (bags, brews) = fixture();
        let rendered = render_markdown_export(&build_export(&bags, &brews, util::now()));

        assert!(rendered.starts_with("# Dial-In export"));
        assert!(rendered.contains("## Kenya (Sey)"));
        assert!(!rendered.contains("## Gone"));
        assert!(rendered.contains("sour \\| thin"));
        assert!(rendered.contains("## Unfiled brews"));
    }

    #[test]
    fn suggested_export_file_name_uses_format_extension() {
        assert_eq!(
            suggested_export_file_name(ExportFormat::Json, 123),
            "dialin-export-123.json"
        );
        assert_eq!(
            suggested_export_file_name(ExportFormat::Markdown, 456),
            "dialin-export-456.md"
        );
    }
}
