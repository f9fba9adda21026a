//! Clipboard module
//!
//! Clipboard change detection and restore:
//! - `backend`: OS clipboard seam
//! - `classifier`: picks text, image or file list from a snapshot
//! - `codec`: image files on disk
//! - `monitor`: background polling loop that records changes

pub mod backend;
pub mod classifier;
pub mod codec;
pub mod monitor;

pub use backend::{ArboardClipboard, ClipboardBackend, MemoryClipboard, SharedClipboard};
pub use codec::ImageCodec;
pub use monitor::ClipboardMonitor;
