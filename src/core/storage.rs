//! Clipboard history persistence
//!
//! [`Storage`] is the contract the monitor and the UI use. Backings implement
//! loading and one transactional write primitive; every history rule lives in
//! [`history`] and is shared through the trait's provided methods.

pub mod history;
pub mod json_store;
pub mod redb_store;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::shared::error::{AppError, AppResult};
use crate::shared::settings::{StorageConfig, StorageKind};
use crate::shared::types::ClipboardItem;

pub use json_store::JsonStorage;
pub use redb_store::RedbStorage;

/// A change applied to the full item list inside one write.
///
/// Returning an error aborts the write and leaves the store untouched.
pub type Mutation<'a> = Box<dyn FnOnce(&mut Vec<ClipboardItem>) -> AppResult<()> + 'a>;

/// Storage trait for clipboard history persistence
///
/// Every list handed out is in history order: favourites first, newest first.
pub trait Storage: Send + Sync {
    fn load_items(&self) -> AppResult<Vec<ClipboardItem>>;

    /// Apply `mutation` as a single exclusive write and persist the result.
    ///
    /// Implementations re-sort the list, persist it, and only then delete
    /// image files that no surviving record references.
    fn transact(&self, mutation: Mutation<'_>) -> AppResult<Vec<ClipboardItem>>;

    fn max_items(&self) -> usize;

    /// Directory holding image files for this history
    fn image_dir(&self) -> &Path;

    /// Release the backing medium. Later calls fail with a storage error.
    fn close(&self) -> AppResult<()>;

    /// Replace the whole history.
    fn save_items(&self, items: &[ClipboardItem]) -> AppResult<Vec<ClipboardItem>> {
        let max_items = self.max_items();
        let replacement = items.to_vec();
        self.transact(Box::new(move |current: &mut Vec<ClipboardItem>| {
            *current = replacement;
            history::sort_items(current);
            let evicted = history::enforce_capacity(current, max_items);
            if !evicted.is_empty() {
                debug!("Dropped {} items over capacity while saving", evicted.len());
            }
            Ok(())
        }))
    }

    fn add_item(&self, item: ClipboardItem) -> AppResult<Vec<ClipboardItem>> {
        item.validate()?;
        let max_items = self.max_items();
        self.transact(Box::new(move |items: &mut Vec<ClipboardItem>| {
            if history::add_item(items, item, max_items) == history::AddOutcome::Refreshed {
                debug!("Duplicate clipboard item, refreshed timestamp");
            }
            Ok(())
        }))
    }

    fn delete_item(&self, id: &str) -> AppResult<Vec<ClipboardItem>> {
        self.transact(Box::new(move |items: &mut Vec<ClipboardItem>| {
            let removed = history::remove_item(items, id)?;
            info!("Deleted clipboard item {}", removed.id);
            Ok(())
        }))
    }

    fn toggle_favorite(&self, id: &str) -> AppResult<Vec<ClipboardItem>> {
        let max_items = self.max_items();
        self.transact(Box::new(move |items: &mut Vec<ClipboardItem>| {
            let favorite = history::toggle_favorite(items, id)?;
            debug!("Item {} favorite = {}", id, favorite);
            // an unpinned item counts against capacity again
            let evicted = history::enforce_capacity(items, max_items);
            if !evicted.is_empty() {
                debug!("Dropped {} items over capacity after unpinning {}", evicted.len(), id);
            }
            Ok(())
        }))
    }

    fn search(&self, keyword: &str) -> AppResult<Vec<ClipboardItem>> {
        Ok(history::search(&self.load_items()?, keyword))
    }
}

/// Open the backing selected by `config`.
pub fn open_storage(config: &StorageConfig) -> AppResult<Arc<dyn Storage>> {
    config.validate()?;
    let data_dir = config.resolve_data_dir()?;

    let storage: Arc<dyn Storage> = match config.kind {
        StorageKind::Json => Arc::new(JsonStorage::open(&data_dir, config.max_items)?),
        StorageKind::Redb => Arc::new(RedbStorage::open(&data_dir, config.max_items)?),
    };
    info!(
        "Opened {:?} clipboard history at {} (max {} items)",
        config.kind,
        data_dir.display(),
        config.max_items
    );
    Ok(storage)
}

/// Create `data_dir` and its image directory, returning both as absolute paths.
pub(crate) fn prepare_dirs(data_dir: &Path) -> AppResult<(PathBuf, PathBuf)> {
    fs::create_dir_all(data_dir.join("images")).map_err(|e| {
        AppError::Io(format!(
            "Failed to create storage directory {}: {}",
            data_dir.display(),
            e
        ))
    })?;
    let data_dir = fs::canonicalize(data_dir)?;
    let image_dir = data_dir.join("images");
    Ok((data_dir, image_dir))
}

/// Delete image files left without a record. Failures are logged, not raised:
/// the records are already gone.
pub(crate) fn remove_image_files(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed image file {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Image file already gone: {}", path.display())
            }
            Err(e) => warn!("Failed to remove image file {}: {}", path.display(), e),
        }
    }
}
