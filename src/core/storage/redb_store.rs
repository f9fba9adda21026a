use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info, warn};

use super::{history, prepare_dirs, remove_image_files, Mutation, Storage};
use crate::shared::error::{AppError, AppResult};
use crate::shared::types::ClipboardItem;

const DB_FILE: &str = "history.redb";

/// Redb table definition for clipboard history
/// Key: item id, Value: CBOR-encoded ClipboardItem
const ITEMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("clipboard_items");

/// Redb-based storage implementation
pub struct RedbStorage {
    /// `None` once closed, which also releases the database file lock.
    db: Mutex<Option<Database>>,
    db_path: PathBuf,
    image_dir: PathBuf,
    max_items: usize,
}

impl RedbStorage {
    pub fn open(data_dir: &Path, max_items: usize) -> AppResult<Self> {
        let (data_dir, image_dir) = prepare_dirs(data_dir)?;
        let db_path = data_dir.join(DB_FILE);
        let db = Database::create(&db_path)?;

        // Initialize table
        let write_txn = db.begin_write()?;
        {
            let _table = write_txn.open_table(ITEMS_TABLE)?;
        }
        write_txn.commit()?;
        info!("Opened clipboard database at {}", db_path.display());

        Ok(Self {
            db: Mutex::new(Some(db)),
            db_path,
            image_dir,
            max_items,
        })
    }

    fn database(&self) -> MutexGuard<'_, Option<Database>> {
        match self.db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Database mutex poisoned, recovering...");
                poisoned.into_inner()
            }
        }
    }
}

impl Storage for RedbStorage {
    fn load_items(&self) -> AppResult<Vec<ClipboardItem>> {
        let guard = self.database();
        let db = guard.as_ref().ok_or_else(closed)?;

        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ITEMS_TABLE)?;
        let mut items = read_all(&table)?;
        history::sort_items(&mut items);
        Ok(items)
    }

    fn transact(&self, mutation: Mutation<'_>) -> AppResult<Vec<ClipboardItem>> {
        let guard = self.database();
        let db = guard.as_ref().ok_or_else(closed)?;

        // dropping an uncommitted transaction aborts it
        let write_txn = db.begin_write()?;
        let (next, orphaned) = {
            let mut table = write_txn.open_table(ITEMS_TABLE)?;
            let current = read_all(&table)?;

            let mut next = current.clone();
            mutation(&mut next)?;
            history::sort_items(&mut next);

            let kept: HashSet<&str> = next.iter().map(|i| i.id.as_str()).collect();
            for gone in current.iter().filter(|i| !kept.contains(i.id.as_str())) {
                table.remove(gone.id.as_str())?;
            }
            for item in next.iter().filter(|i| !current.contains(i)) {
                let mut encoded = Vec::new();
                ciborium::into_writer(item, &mut encoded)?;
                table.insert(item.id.as_str(), encoded.as_slice())?;
            }

            let orphaned = history::orphaned_images(&current, &next);
            (next, orphaned)
        };
        write_txn.commit()?;
        drop(guard);

        remove_image_files(&orphaned);
        Ok(next)
    }

    fn max_items(&self) -> usize {
        self.max_items
    }

    fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    fn close(&self) -> AppResult<()> {
        if self.database().take().is_some() {
            debug!("Closed clipboard database at {}", self.db_path.display());
        }
        Ok(())
    }
}

fn closed() -> AppError {
    AppError::Storage("database is closed".to_string())
}

fn read_all(table: &impl ReadableTable<&'static str, &'static [u8]>) -> AppResult<Vec<ClipboardItem>> {
    let mut items = Vec::new();
    for entry in table.iter()? {
        let (key, value) = entry?;
        match ciborium::from_reader::<ClipboardItem, _>(value.value()) {
            Ok(item) => items.push(item),
            // one bad record should not hide the rest of the history
            Err(e) => warn!("Skipping unreadable clipboard record {}: {}", key.value(), e),
        }
    }
    Ok(items)
}
