//! Dial-In CLI - log coffee bags and brews from the terminal
//!
//! Everything is written to the local replica first; `dialin sync` exchanges
//! changes with the server when one is configured.

mod cli;
mod commands;
mod error;

use clap::{CommandFactory, Parser};

use crate::cli::{BagCommands, BrewCommands, Cli, Commands, SyncCommands};
use crate::commands::bag::{run_bag_add, run_bag_delete, run_bag_edit, run_bag_list};
use crate::commands::brew::{run_brew_add, run_brew_delete, run_brew_list};
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::export::run_export;
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_sync_reset, run_sync_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dialin=info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Some(Commands::Bag { command }) => match command {
            BagCommands::Add(args) => run_bag_add(&args, &db_path).await?,
            BagCommands::List { limit, all, json } => {
                run_bag_list(limit, all, json, &db_path).await?;
            }
            BagCommands::Edit(args) => run_bag_edit(&args, &db_path).await?,
            BagCommands::Delete { id } => run_bag_delete(&id, &db_path).await?,
        },
        Some(Commands::Brew { command }) => match command {
            BrewCommands::Add(args) => run_brew_add(&args, &db_path).await?,
            BrewCommands::List { bag, limit, json } => {
                run_brew_list(bag.as_deref(), limit, json, &db_path).await?;
            }
            BrewCommands::Delete { id } => run_brew_delete(&id, &db_path).await?,
        },
        Some(Commands::Sync { command }) => match command {
            None => run_sync(&db_path).await?,
            Some(SyncCommands::Watch) => run_sync_watch(&db_path).await?,
            Some(SyncCommands::Reset) => run_sync_reset(&db_path).await?,
        },
        Some(Commands::Status { json }) => run_status(json, &db_path).await?,
        Some(Commands::Export { format, output }) => {
            run_export(format, output.as_deref(), &db_path).await?;
        }
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}
