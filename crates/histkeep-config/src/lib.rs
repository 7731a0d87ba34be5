pub mod config;
pub mod keys;

pub use config::HistoryConfig;
pub use keys::{path_for_storage_key, storage_key_for_path, FILE_KEY_PREFIX};
