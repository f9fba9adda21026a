//! History rules shared by every backing
//!
//! Pure functions over an item list: ordering, duplicate refresh, capacity
//! eviction, favourite toggling and search. Backings only load and persist.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::shared::error::{AppError, AppResult};
use crate::shared::types::{ClipboardItem, ItemType};

/// What `add_item` did with the incoming item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// An equal entry existed; only its timestamp moved.
    Refreshed,
}

/// Favourites first, then newest first. Ids break exact timestamp ties.
pub fn compare(a: &ClipboardItem, b: &ClipboardItem) -> Ordering {
    b.is_favorite
        .cmp(&a.is_favorite)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| b.id.cmp(&a.id))
}

pub fn sort_items(items: &mut [ClipboardItem]) {
    items.sort_by(compare);
}

/// Add `new_item`, or refresh the timestamp of an equal entry.
///
/// Leaves `items` sorted. Eviction only happens on insertion.
pub fn add_item(items: &mut Vec<ClipboardItem>, new_item: ClipboardItem, max_items: usize) -> AddOutcome {
    let outcome = match items.iter_mut().find(|i| i.same_entry(&new_item)) {
        Some(existing) => {
            existing.timestamp = new_item.timestamp;
            AddOutcome::Refreshed
        }
        None => {
            items.insert(0, new_item);
            AddOutcome::Inserted
        }
    };

    sort_items(items);
    if outcome == AddOutcome::Inserted {
        enforce_capacity(items, max_items);
    }
    outcome
}

/// Drop the oldest non-favourites until at most `max_items` remain.
///
/// Favourites are never evicted. Expects `items` sorted.
pub fn enforce_capacity(items: &mut Vec<ClipboardItem>, max_items: usize) -> Vec<ClipboardItem> {
    let mut kept_plain = 0;
    let mut evicted = Vec::new();

    items.retain(|item| {
        if item.is_favorite {
            return true;
        }
        if kept_plain < max_items {
            kept_plain += 1;
            true
        } else {
            evicted.push(item.clone());
            false
        }
    });
    evicted
}

pub fn remove_item(items: &mut Vec<ClipboardItem>, id: &str) -> AppResult<ClipboardItem> {
    let index = items
        .iter()
        .position(|i| i.id == id)
        .ok_or_else(|| AppError::NotFound(id.to_string()))?;
    Ok(items.remove(index))
}

/// Flip the favourite flag and re-sort. Returns the new flag.
pub fn toggle_favorite(items: &mut [ClipboardItem], id: &str) -> AppResult<bool> {
    let item = items
        .iter_mut()
        .find(|i| i.id == id)
        .ok_or_else(|| AppError::NotFound(id.to_string()))?;
    item.is_favorite = !item.is_favorite;
    let now_favorite = item.is_favorite;

    sort_items(items);
    Ok(now_favorite)
}

/// Case-insensitive substring match on content. Empty keyword keeps all.
pub fn search(items: &[ClipboardItem], keyword: &str) -> Vec<ClipboardItem> {
    if keyword.is_empty() {
        return items.to_vec();
    }
    let keyword = keyword.to_lowercase();
    items
        .iter()
        .filter(|i| i.content.to_lowercase().contains(&keyword))
        .cloned()
        .collect()
}

/// Image files referenced in `before` that no record in `after` still uses.
pub fn orphaned_images(before: &[ClipboardItem], after: &[ClipboardItem]) -> Vec<PathBuf> {
    let still_used: HashSet<&PathBuf> = after.iter().filter_map(|i| i.image_path.as_ref()).collect();

    before
        .iter()
        .filter(|i| i.item_type == ItemType::Image)
        .filter_map(|i| i.image_path.as_ref())
        .filter(|p| !still_used.contains(p))
        .cloned()
        .collect()
}
