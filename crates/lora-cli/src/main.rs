//! LoRA CLI - command line front end for the LoRA library index.
//!
//! Wraps lora-core so a library can be scanned, queried and watched from a
//! terminal. Listings print one row per item, or JSON with `--json`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lora_core::{LibrarySettings, LoraManager, LoraQuery, RecipeQuery, SortBy};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lora-cli")]
#[command(about = "Index, query and watch a LoRA model library")]
struct Args {
    /// LoRA root directory (repeat for several; overrides the settings file)
    #[arg(short, long = "root")]
    roots: Vec<PathBuf>,

    /// Settings file (defaults to <config dir>/lora-manager/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Skip Civitai lookups for files without metadata
    #[arg(long)]
    offline: bool,

    /// Print listings as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan every root and report what was found
    Scan,
    /// List LoRAs
    List {
        #[arg(short, long)]
        search: Option<String>,
        #[arg(short, long)]
        folder: Option<String>,
        #[arg(long, value_enum, default_value = "name")]
        sort: SortArg,
        #[arg(long, default_value = "1")]
        page: usize,
        #[arg(long, default_value = "20")]
        page_size: usize,
    },
    /// Most used tags across the library
    Tags {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// List saved recipes
    Recipes {
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value = "date")]
        sort: SortArg,
    },
    /// Keep the cache in sync with the file system until Ctrl-C
    Watch,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SortArg {
    Name,
    Date,
}

impl From<SortArg> for SortBy {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Name => SortBy::Name,
            SortArg::Date => SortBy::Date,
        }
    }
}

fn load_settings(args: &Args) -> Result<LibrarySettings> {
    let path = match &args.settings {
        Some(path) => Some(path.clone()),
        None => dirs::config_dir().map(|dir| dir.join("lora-manager").join("settings.json")),
    };
    let mut settings = match path {
        Some(path) => LibrarySettings::load(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => LibrarySettings::default(),
    };
    if !args.roots.is_empty() {
        settings.lora_roots = args.roots.clone();
    }
    Ok(settings)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let settings = load_settings(&args)?;
    let manager = LoraManager::builder()
        .with_settings(settings)
        .with_file_monitor(matches!(args.command, Command::Watch))
        .with_remote_metadata(!args.offline)
        .build()
        .await
        .context("failed to open LoRA library")?;

    match args.command {
        Command::Scan => {
            let summary = manager.refresh_loras().await?;
            if args.json {
                print_json(&summary)?;
            } else {
                println!("{} LoRAs in {} folders", summary.total, summary.folders);
            }
        }
        Command::List {
            search,
            folder,
            sort,
            page,
            page_size,
        } => {
            manager.initialize().await?;
            let mut query = LoraQuery::default()
                .page(page, page_size)
                .sort_by(sort.into());
            if let Some(search) = search {
                query = query.search(search);
            }
            if let Some(folder) = folder {
                query = query.folder(folder);
            }
            let listing = manager.list_loras(&query).await?;
            if args.json {
                print_json(&listing)?;
            } else {
                for lora in &listing.items {
                    println!("{:<40} {:<16} {}", lora.file_name, lora.base_model, lora.folder);
                }
                println!(
                    "page {}/{} ({} total)",
                    listing.page, listing.total_pages, listing.total
                );
            }
        }
        Command::Tags { limit } => {
            manager.initialize().await?;
            let tags = manager.get_top_tags(limit).await?;
            if args.json {
                print_json(&tags)?;
            } else {
                for tag in &tags {
                    println!("{:>6}  {}", tag.count, tag.name);
                }
            }
        }
        Command::Recipes { search, sort } => {
            manager.initialize().await?;
            let query = RecipeQuery {
                search,
                sort_by: sort.into(),
                ..RecipeQuery::default()
            };
            let listing = manager.list_recipes(&query).await?;
            if args.json {
                print_json(&listing)?;
            } else {
                for recipe in &listing.items {
                    println!("{}  {} ({} LoRAs)", recipe.id, recipe.title, recipe.loras.len());
                }
                println!("{} recipes", listing.total);
            }
        }
        Command::Watch => {
            manager.start()?;
            manager.initialize().await?;
            for path in manager.watched_paths() {
                info!("Watching {}", path.display());
            }
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
        }
    }

    manager.shutdown().await;
    Ok(())
}
