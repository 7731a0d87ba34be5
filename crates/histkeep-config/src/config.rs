/// History configuration: load, save, and sanitize.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Maximum number of snapshots kept per history.
const DEFAULT_MAX_HISTORY: usize = 100;

/// Quiet period in milliseconds before a pending write hits the store.
const DEFAULT_DEBOUNCE_MS: u64 = 1000;

/// Upper bound for the debounce window. Anything longer risks losing
/// minutes of edits if the process dies mid-window.
const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Tunables shared by every history controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Max snapshots held in memory (oldest are dropped first).
    pub max_history: usize,
    /// Coalescing window for writes, in milliseconds.
    pub debounce_ms: u64,
    /// Whether the current value is mirrored to the backing store.
    pub persist: bool,
    /// Directory holding the store database. Empty = resolved at runtime.
    pub data_dir: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            persist: true,
            data_dir: String::new(),
        }
    }
}

impl HistoryConfig {
    /// Returns the config file path: exe directory + `histkeep.json`.
    pub fn config_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("histkeep.json")))
            .unwrap_or_else(|| PathBuf::from("histkeep.json"))
    }

    /// Loads config from `path`, creating a default file if it doesn't exist.
    /// Returns defaults on any error (unreadable file, parse error, etc.).
    pub fn load_or_create(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str::<HistoryConfig>(&contents) {
                    Ok(mut config) => {
                        config.sanitize();
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {}: {e}", path.display());
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {}: {e}", path.display());
                }
            }
            // Don't overwrite a broken file
            Self::default()
        } else {
            let config = Self::default();
            if let Err(e) = config.save(path) {
                tracing::warn!("Failed to create default config at {}: {e}", path.display());
            }
            config
        }
    }

    /// Saves config to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Clamps values to valid ranges.
    pub fn sanitize(&mut self) {
        self.max_history = self.max_history.max(1);
        self.debounce_ms = self.debounce_ms.min(MAX_DEBOUNCE_MS);
    }

    /// Debounce window as a `Duration`.
    pub fn debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_ms)
    }

    /// Returns the directory the store database lives in.
    ///
    /// Resolution order:
    /// 1. `data_dir` from the config file, if non-empty
    /// 2. `HISTKEEP_DATA_DIR` environment variable
    /// 3. the platform's local data directory + `histkeep`
    /// 4. `.data/` next to the executable
    pub fn resolve_data_dir(&self) -> PathBuf {
        if !self.data_dir.is_empty() {
            return PathBuf::from(&self.data_dir);
        }
        resolve_data_dir()
    }
}

/// Resolves the default data directory, ignoring any config file.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HISTKEEP_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dir) = dirs::data_local_dir() {
        return dir.join("histkeep");
    }
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
    exe.parent().unwrap_or(Path::new(".")).join(".data")
}
