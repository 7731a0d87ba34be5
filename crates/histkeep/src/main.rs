use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use histkeep_config::{path_for_storage_key, storage_key_for_path, HistoryConfig};
use histkeep_history::{ControllerOptions, HistoryController, KeyValueStore, RedbStore};

/// Inspect and drive a histkeep value store.
#[derive(Parser, Debug)]
#[command(name = "histkeep", version, about)]
struct Cli {
    /// Config file (defaults to `histkeep.json` next to the executable).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the store database. Overrides the config file.
    #[arg(long = "data-dir", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored keys. File keys whose file is gone are marked.
    List,
    /// Print the stored record for a key.
    Show(KeyArg),
    /// Delete the stored record for a key.
    Remove(KeyArg),
    /// Apply JSON values to a key's history, one update each, and persist
    /// the final value.
    Push {
        #[command(flatten)]
        target: KeyArg,
        #[arg(required = true)]
        values: Vec<String>,
    },
}

/// Which record to act on.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct KeyArg {
    /// Storage key, used as-is.
    #[arg(long)]
    key: Option<String>,

    /// File whose history to use; the key is derived from its path.
    #[arg(long)]
    file: Option<PathBuf>,
}

impl KeyArg {
    fn resolve(self) -> String {
        match (self.key, self.file) {
            (Some(key), _) => key,
            (None, Some(file)) => storage_key_for_path(&file),
            // clap's group guarantees one of the two
            (None, None) => String::new(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = cli.config.unwrap_or_else(HistoryConfig::config_path);
    let config = HistoryConfig::load_or_create(&config_path);
    let data_dir = cli.data_dir.unwrap_or_else(|| config.resolve_data_dir());
    tracing::debug!("Using store at {}", data_dir.display());

    let store = RedbStore::open(&data_dir)?;

    match cli.command {
        Command::List => {
            for key in store.keys()? {
                match path_for_storage_key(&key) {
                    Some(path) if !path.exists() => println!("{key} (file missing)"),
                    _ => println!("{key}"),
                }
            }
        }
        Command::Show(target) => {
            let key = target.resolve();
            match store.get(&key)? {
                Some(raw) => println!("{raw}"),
                None => println!("no record for '{key}'"),
            }
        }
        Command::Remove(target) => {
            let key = target.resolve();
            store.delete(&key)?;
            tracing::info!("Removed '{key}'");
        }
        Command::Push { target, values } => push(store, config, target.resolve(), &values).await?,
    }

    Ok(())
}

/// Replays `values` as updates on a controller and waits for the write.
async fn push(
    store: Arc<RedbStore>,
    config: HistoryConfig,
    key: String,
    values: &[String],
) -> Result<()> {
    if !config.persist {
        tracing::warn!("Persistence is disabled in the config; nothing will be stored");
    }

    let parsed = values
        .iter()
        .map(|raw| {
            serde_json::from_str::<serde_json::Value>(raw)
                .with_context(|| format!("Not valid JSON: {raw}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let options = ControllerOptions::new(key, serde_json::Value::Null).config(config);
    let mut ctl = HistoryController::open(options, store)?;
    ctl.ready().await;

    for value in parsed {
        ctl.update(value);
    }

    while ctl.has_pending_write() {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    println!(
        "{}: {} (snapshot {} of {})",
        ctl.storage_key(),
        ctl.data(),
        ctl.current_index() + 1,
        ctl.history_length()
    );
    ctl.dispose();
    Ok(())
}
