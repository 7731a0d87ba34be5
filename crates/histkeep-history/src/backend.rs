/// Backing stores for persisted history values.
///
/// The contract is a minimal string-keyed get/set/delete. Two stores ship
/// with the crate:
/// - `MemoryStore`: a locked `HashMap`, for tests and ephemeral use
/// - `RedbStore`: a single redb database file with one `records` table
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

/// Records table: storage key → encoded current value.
const RECORDS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("records");

/// File name of the redb database inside the data directory.
const DB_FILE_NAME: &str = "histkeep.redb";

/// A durable string-keyed store.
///
/// Implementations must be shareable across threads; the gateway calls them
/// from tokio's blocking pool.
pub trait KeyValueStore: Send + Sync {
    /// Reads the record for `key`, or `None` if there isn't one.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Inserts or overwrites the record for `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes the record for `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Lists stored keys. Stores that can't enumerate return an empty list.
    fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = records.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Store backed by redb.
///
/// Thread-safe: redb supports concurrent readers and serialized writers.
/// Shared across controllers via `Arc<RedbStore>`.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish()
    }
}

impl RedbStore {
    /// Opens or creates the store database in the given directory.
    ///
    /// Creates the directory and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened.
    pub fn open(data_dir: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join(DB_FILE_NAME);
        let db = Database::create(&db_path)
            .with_context(|| format!("Failed to open store database: {}", db_path.display()))?;

        // Ensure the table exists
        let write_txn = db
            .begin_write()
            .context("Failed to begin initial write transaction")?;
        {
            let _ = write_txn
                .open_table(RECORDS_TABLE)
                .context("Failed to create records table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initial transaction")?;

        Ok(Arc::new(Self { db }))
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(RECORDS_TABLE)
            .context("Failed to open records table")?;

        match table.get(key).context("Failed to read record")? {
            Some(guard) => Ok(Some(guard.value().to_string())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(RECORDS_TABLE)
                .context("Failed to open records table")?;
            table
                .insert(key, value)
                .context("Failed to insert record")?;
        }
        write_txn
            .commit()
            .context("Failed to commit write transaction")?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(RECORDS_TABLE)
                .context("Failed to open records table")?;
            table.remove(key).context("Failed to remove record")?;
        }
        write_txn
            .commit()
            .context("Failed to commit deletion")?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(RECORDS_TABLE)
            .context("Failed to open records table")?;

        let mut keys = Vec::new();
        for entry in table.iter().context("Failed to iterate records table")? {
            let (key_guard, _) = entry.context("Failed to read record entry")?;
            keys.push(key_guard.value().to_string());
        }
        Ok(keys)
    }
}
