use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::{AppError, AppResult};

/// Longest prefix shown for text and file items in list labels.
const LABEL_CHARS: usize = 15;

/// Type of clipboard content
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Text,
    Image,
    File,
}

/// A single clipboard history item
///
/// Serialized field names follow the on-disk history document:
/// `id, type, content, imagePath, timestamp, isFavorite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Literal text, an image label, or a `;`-joined path list.
    pub content: String,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_favorite: bool,
}

impl ClipboardItem {
    fn new(item_type: ItemType, content: String, image_path: Option<PathBuf>) -> Self {
        Self {
            id: new_item_id(),
            item_type,
            content,
            image_path,
            timestamp: Utc::now(),
            is_favorite: false,
        }
    }

    /// Create a new text clipboard item
    pub fn new_text(content: impl Into<String>) -> Self {
        Self::new(ItemType::Text, content.into(), None)
    }

    /// Create a new image clipboard item backed by a file on disk
    pub fn new_image(image_path: PathBuf, width: u32, height: u32) -> Self {
        Self::new(
            ItemType::Image,
            format!("[Image {}x{}]", width, height),
            Some(image_path),
        )
    }

    /// Create a new file-list clipboard item from already validated paths
    pub fn new_files<P: AsRef<Path>>(paths: &[P]) -> Self {
        Self::new(ItemType::File, join_paths(paths), None)
    }

    /// Items are the same history entry when content, type and image path match.
    pub fn same_entry(&self, other: &ClipboardItem) -> bool {
        self.content == other.content
            && self.item_type == other.item_type
            && self.image_path == other.image_path
    }

    /// Reject items that could never have come out of the monitor.
    pub fn validate(&self) -> AppResult<()> {
        if self.id.is_empty() {
            return Err(AppError::InvalidItem("item has no id".to_string()));
        }
        match self.item_type {
            ItemType::Text | ItemType::File if self.content.is_empty() => Err(
                AppError::InvalidItem(format!("item {} has no content", self.id)),
            ),
            _ => Ok(()),
        }
    }

    /// Short one-line label for list rendering.
    pub fn display_label(&self) -> String {
        match self.item_type {
            ItemType::Text => truncate_chars(&self.content, LABEL_CHARS),
            ItemType::Image => {
                let name = self
                    .image_path
                    .as_deref()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("[Image] {}", name)
            }
            ItemType::File => format!("[File] {}", truncate_chars(&self.content, LABEL_CHARS)),
        }
    }

    /// Human readable age relative to `now`, e.g. "3 minutes ago".
    ///
    /// Anything older than a week is shown as a local date instead.
    pub fn format_age(&self, now: DateTime<Utc>) -> String {
        let diff = now.signed_duration_since(self.timestamp);

        if diff.num_minutes() < 1 {
            format!("{} seconds ago", diff.num_seconds().max(0))
        } else if diff.num_hours() < 1 {
            format!("{} minutes ago", diff.num_minutes())
        } else if diff.num_days() < 1 {
            format!("{} hours ago", diff.num_hours())
        } else if diff.num_days() < 7 {
            format!("{} days ago", diff.num_days())
        } else {
            self.timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        }
    }
}

/// Split an ordered list into the favourites view and the full view.
///
/// Both views are in recency order; the full view still contains favourites.
pub fn split_favorites(items: &[ClipboardItem]) -> (Vec<ClipboardItem>, Vec<ClipboardItem>) {
    let mut all = items.to_vec();
    all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let favorites = all.iter().filter(|i| i.is_favorite).cloned().collect();
    (favorites, all)
}

/// Join paths the way file items store them.
pub fn join_paths<P: AsRef<Path>>(paths: &[P]) -> String {
    paths
        .iter()
        .map(|p| p.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(";")
}

/// Time-ordered unique id (UUIDv7: millisecond timestamp plus random bits).
fn new_item_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
