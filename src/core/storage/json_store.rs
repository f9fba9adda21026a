use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::{history, prepare_dirs, remove_image_files, Mutation, Storage};
use crate::shared::error::{AppError, AppResult};
use crate::shared::types::ClipboardItem;

const HISTORY_FILE: &str = "history.json";

/// History kept as one JSON document, rewritten in full on every change
///
/// The document is an array of item records. Writes go to a sibling temp file
/// that is renamed over the old document, so a crash mid-write leaves the
/// previous history intact.
pub struct JsonStorage {
    file_path: PathBuf,
    image_dir: PathBuf,
    max_items: usize,
    /// In-memory snapshot of the document; `None` once closed.
    items: Mutex<Option<Vec<ClipboardItem>>>,
}

impl JsonStorage {
    pub fn open(data_dir: &Path, max_items: usize) -> AppResult<Self> {
        let (data_dir, image_dir) = prepare_dirs(data_dir)?;
        let file_path = data_dir.join(HISTORY_FILE);

        let mut items = read_document(&file_path)?;
        history::sort_items(&mut items);
        info!("Loaded {} clipboard items from {}", items.len(), file_path.display());

        Ok(Self {
            file_path,
            image_dir,
            max_items,
            items: Mutex::new(Some(items)),
        })
    }

    fn snapshot(&self) -> MutexGuard<'_, Option<Vec<ClipboardItem>>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("History mutex poisoned, recovering...");
                poisoned.into_inner()
            }
        }
    }
}

impl Storage for JsonStorage {
    fn load_items(&self) -> AppResult<Vec<ClipboardItem>> {
        self.snapshot().clone().ok_or_else(closed)
    }

    fn transact(&self, mutation: Mutation<'_>) -> AppResult<Vec<ClipboardItem>> {
        let mut guard = self.snapshot();
        let current = guard.as_ref().ok_or_else(closed)?;

        let mut next = current.clone();
        mutation(&mut next)?;
        history::sort_items(&mut next);

        write_document(&self.file_path, &next)?;
        let orphaned = history::orphaned_images(current, &next);
        *guard = Some(next.clone());
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
        if self.snapshot().take().is_some() {
            debug!("Closed history at {}", self.file_path.display());
        }
        Ok(())
    }
}

fn closed() -> AppError {
    AppError::Storage("history is closed".to_string())
}

fn read_document(path: &Path) -> AppResult<Vec<ClipboardItem>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|e| {
        AppError::Storage(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn write_document(path: &Path, items: &[ClipboardItem]) -> AppResult<()> {
    let tmp_path = path.with_extension("json.tmp");
    let content = serde_json::to_vec_pretty(items)?;

    let written = fs::File::create(&tmp_path).and_then(|mut file| {
        file.write_all(&content)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&tmp_path, path)) {
        if let Err(rm) = fs::remove_file(&tmp_path) {
            debug!("Failed to remove temp file {}: {}", tmp_path.display(), rm);
        }
        return Err(AppError::Io(format!("Failed to write {}: {}", path.display(), e)));
    }
    Ok(())
}
