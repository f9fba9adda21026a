//! Decides what a clipboard snapshot holds
//!
//! One winner per poll, in priority order image > file list > text. Each
//! winner carries the fingerprint the monitor compares against the last value
//! it saw for that type.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::backend::ClipboardBackend;
use super::codec::{ImageCodec, ImageFingerprint};
use crate::shared::error::AppResult;
use crate::shared::types::{join_paths, ItemType};

/// Separators tried in order when looking for a path list.
const PATH_SEPARATORS: [&str; 4] = ["\r\n", "\n", ";", "\t"];

/// Raw clipboard contents sampled in one poll.
#[derive(Debug, Clone, Default)]
pub struct ClipboardSnapshot {
    pub text: Option<String>,
    pub image: Option<Vec<u8>>,
}

impl ClipboardSnapshot {
    /// Sample the clipboard, image slot first so text cannot race ahead of it.
    ///
    /// A failed image read is treated as no image; only a failed text read
    /// fails the sample.
    pub fn read(clipboard: &mut dyn ClipboardBackend) -> AppResult<Self> {
        let image = clipboard.read_image().unwrap_or_else(|e| {
            debug!("Clipboard image unreadable, checking text instead: {}", e);
            None
        });
        let text = clipboard.read_text()?;
        Ok(Self { text, image })
    }
}

/// The winning payload of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Image {
        bytes: Vec<u8>,
        fingerprint: ImageFingerprint,
    },
    Files(Vec<PathBuf>),
    Text(String),
}

impl Payload {
    pub fn item_type(&self) -> ItemType {
        match self {
            Payload::Image { .. } => ItemType::Image,
            Payload::Files(_) => ItemType::File,
            Payload::Text(_) => ItemType::Text,
        }
    }

    /// Value compared against the last one seen for the same type.
    pub fn fingerprint(&self) -> String {
        match self {
            Payload::Image { fingerprint, .. } => fingerprint.to_string(),
            Payload::Files(paths) => join_paths(paths),
            Payload::Text(text) => text.clone(),
        }
    }
}

/// Pick the payload that wins this poll, if any.
///
/// Image bytes that cannot be identified lose to whatever text is present.
pub fn classify(snapshot: &ClipboardSnapshot) -> Option<Payload> {
    if let Some(bytes) = snapshot.image.as_ref().filter(|b| !b.is_empty()) {
        match ImageCodec::fingerprint(bytes) {
            Ok(fingerprint) => {
                return Some(Payload::Image {
                    bytes: bytes.clone(),
                    fingerprint,
                })
            }
            Err(e) => debug!("Ignoring unreadable clipboard image: {}", e),
        }
    }

    let text = snapshot.text.as_deref().filter(|t| !t.is_empty())?;
    match detect_file_paths(text) {
        Some(paths) => Some(Payload::Files(paths)),
        None => Some(Payload::Text(text.to_string())),
    }
}

/// Existing absolute paths named by `text`, or `None` if it names none.
///
/// The first separator that produces more than one non-empty segment decides
/// the split; otherwise the whole text is the single candidate.
pub fn detect_file_paths(text: &str) -> Option<Vec<PathBuf>> {
    let candidates = PATH_SEPARATORS
        .iter()
        .map(|sep| {
            text.split(sep)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .find(|segments| segments.len() > 1)
        .unwrap_or_else(|| vec![text.trim()]);

    let paths: Vec<PathBuf> = candidates
        .into_iter()
        .map(unquote)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .filter(|p| is_existing_path(p))
        .collect();

    if paths.is_empty() {
        None
    } else {
        Some(paths)
    }
}

// "Copy as path" on Windows wraps each path in quotes
fn unquote(segment: &str) -> &str {
    segment
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(segment)
        .trim()
}

/// Clipboard text carries no working directory, so a relative name cannot be
/// resolved against the folder it was copied from and never counts.
fn is_existing_path(path: &Path) -> bool {
    path.is_absolute() && path.exists()
}
