use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AppConfig, BackendChoice, ConfigLoader};
use crate::storage;
use crate::store::EntryStore;

pub mod commands;

use self::commands::{
    DeleteArgs, EditArgs, ExportArgs, ImportArgs, ListArgs, NewArgs, ShowArgs, WatchArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "diary",
    version,
    about = "Personal diary with local or synced storage"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over DIARY_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over DIARY_DATA)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Storage backend to use instead of the configured one
    #[arg(long, global = true, value_enum)]
    pub backend: Option<BackendArg>,

    /// Signed-in user id for the remote backend
    #[arg(long, global = true)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Local,
    Remote,
}

impl From<BackendArg> for BackendChoice {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Local => BackendChoice::Local,
            BackendArg::Remote => BackendChoice::Remote,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a new entry
    New(NewArgs),
    /// Change an existing entry; the original date is kept
    Edit(EditArgs),
    /// Remove an entry
    Delete(DeleteArgs),
    /// Print one entry in full
    Show(ShowArgs),
    /// List entries newest first, optionally filtered
    List(ListArgs),
    /// Print every tag in use
    Tags,
    /// Merge entries from a JSON export
    Import(ImportArgs),
    /// Write all entries to a dated JSON file
    Export(ExportArgs),
    /// Suggest a writing prompt based on recent entries
    Prompt,
    /// Summarise moods, weather, months and the current streak
    Stats,
    /// Follow the remote collection and print each change
    Watch(WatchArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("DIARY_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("DIARY_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let mut config = loader.load_or_init()?;
    apply_overrides(&mut config, cli.backend, cli.user);

    let live = matches!(cli.command, Commands::Watch(_));
    let mut store = open_store(&config, live)?;

    match cli.command {
        Commands::New(args) => commands::new_entry(&mut store, args),
        Commands::Edit(args) => commands::edit_entry(&mut store, args),
        Commands::Delete(args) => commands::delete_entry(&mut store, args),
        Commands::Show(args) => commands::show_entry(&store, args),
        Commands::List(args) => commands::list_entries(&mut store, &config, args),
        Commands::Tags => commands::list_tags(&store),
        Commands::Import(args) => commands::import_entries(&mut store, args),
        Commands::Export(args) => commands::export_entries(&store, &paths, args),
        Commands::Prompt => commands::suggest_prompt(&store, &config),
        Commands::Stats => commands::show_stats(&store),
        Commands::Watch(args) => commands::watch(&mut store, args),
    }
}

fn apply_overrides(config: &mut AppConfig, backend: Option<BackendArg>, user: Option<String>) {
    if let Some(backend) = backend {
        config.backend = backend.into();
    }
    if let Some(user) = user.filter(|u| !u.trim().is_empty()) {
        config.remote.user = Some(user);
    }
}

/// Opens the configured backend and loads it. `watch` initialises the store
/// itself so it can hold on to the subscription.
fn open_store(config: &AppConfig, live: bool) -> Result<EntryStore> {
    let backend = storage::init(config).context("opening diary storage")?;
    let mut store = EntryStore::new(backend).with_live_sync(live && config.remote.live);
    if !live {
        store.initialize().context("loading diary entries")?;
    }
    Ok(store)
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
