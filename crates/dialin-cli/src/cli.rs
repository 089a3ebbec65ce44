use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::commands::common::{parse_date, parse_measurement};

#[derive(Parser)]
#[command(name = "dialin")]
#[command(about = "Log coffee bags and brews offline and sync them across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage coffee bags
    Bag {
        #[command(subcommand)]
        command: BagCommands,
    },
    /// Manage brews
    Brew {
        #[command(subcommand)]
        command: BrewCommands,
    },
    /// Sync the local replica with the Dial-In server
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Show device id, last sync and pending changes
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export bags with their brews
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum BagCommands {
    /// Add a new bag
    #[command(alias = "new")]
    Add(BagAddArgs),
    /// List bags, most recent first
    List {
        /// Number of bags to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Include archived bags
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing bag
    Edit(BagEditArgs),
    /// Delete a bag (its brews are kept)
    Delete {
        /// Bag ID or unique ID prefix
        id: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct BagAddArgs {
    /// Bag name
    pub name: String,
    /// Roaster name
    #[arg(short, long, default_value = "")]
    pub roaster: String,
    /// Roast style, e.g. filter or espresso
    #[arg(long, default_value = "")]
    pub style: String,
    #[arg(long, default_value = "")]
    pub notes: String,
    /// Roast date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub roasted: Option<DateTime<Utc>>,
    /// Date the bag was opened (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub opened: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct BagEditArgs {
    /// Bag ID or unique ID prefix
    pub id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(short, long)]
    pub roaster: Option<String>,
    #[arg(long)]
    pub style: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
    /// Roast date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub roasted: Option<DateTime<Utc>>,
    /// Date the bag was opened (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub opened: Option<DateTime<Utc>>,
    /// Mark the bag as finished
    #[arg(long, conflicts_with = "unarchive")]
    pub archive: bool,
    #[arg(long)]
    pub unarchive: bool,
}

#[derive(Subcommand)]
pub enum BrewCommands {
    /// Record a brew
    #[command(alias = "new")]
    Add(BrewAddArgs),
    /// List brews, most recent first
    List {
        /// Only brews from this bag (ID or unique prefix)
        #[arg(long, value_name = "BAG")]
        bag: Option<String>,
        /// Number of brews to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a brew
    Delete {
        /// Brew ID or unique ID prefix
        id: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct BrewAddArgs {
    /// Bag ID or unique ID prefix
    pub bag: String,
    /// Grinder setting
    #[arg(short, long, value_parser = parse_measurement)]
    pub grind: f64,
    /// Dose in grams
    #[arg(short, long, value_parser = parse_measurement)]
    pub dose: f64,
    /// Brew time in seconds
    #[arg(short, long, value_parser = parse_measurement)]
    pub time: f64,
    /// Pressure reading
    #[arg(short, long, value_parser = parse_measurement, default_value = "0")]
    pub pressure: f64,
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Keep syncing on the configured interval until Ctrl-C
    Watch,
    /// Forget the last sync point so the next sync pulls everything
    Reset,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl From<ExportFormat> for dialin_core::export::ExportFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Json => Self::Json,
            ExportFormat::Markdown => Self::Markdown,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}
