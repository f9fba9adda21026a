//! OS clipboard access
//!
//! The monitor and the image codec only talk to the clipboard through
//! [`ClipboardBackend`], so the system clipboard can be swapped for an
//! in-process buffer in tests or headless embeddings.

use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::shared::error::{AppError, AppResult};

/// Minimal clipboard surface the core needs.
///
/// Images cross this boundary as encoded bytes (PNG, JPEG or GIF).
pub trait ClipboardBackend: Send {
    /// Current text payload, `None` when the clipboard holds no text.
    fn read_text(&mut self) -> AppResult<Option<String>>;

    /// Current image payload as encoded bytes, `None` when there is no image.
    fn read_image(&mut self) -> AppResult<Option<Vec<u8>>>;

    fn write_text(&mut self, text: &str) -> AppResult<()>;

    fn write_image(&mut self, encoded: &[u8]) -> AppResult<()>;

    /// Drop whatever the clipboard holds.
    fn clear(&mut self) -> AppResult<()>;
}

/// Clipboard shared between the poll loop and UI-triggered restores.
pub type SharedClipboard = Arc<Mutex<Box<dyn ClipboardBackend>>>;

pub fn shared(backend: impl ClipboardBackend + 'static) -> SharedClipboard {
    Arc::new(Mutex::new(Box::new(backend)))
}

/// Lock the shared clipboard, recovering from a poisoned mutex.
pub fn lock(clipboard: &SharedClipboard) -> MutexGuard<'_, Box<dyn ClipboardBackend>> {
    match clipboard.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Clipboard mutex poisoned, recovering...");
            poisoned.into_inner()
        }
    }
}

/// System clipboard through `arboard`.
pub struct ArboardClipboard {
    clipboard: arboard::Clipboard,
}

impl ArboardClipboard {
    pub fn new() -> AppResult<Self> {
        Ok(Self {
            clipboard: arboard::Clipboard::new()?,
        })
    }
}

impl ClipboardBackend for ArboardClipboard {
    fn read_text(&mut self) -> AppResult<Option<String>> {
        match self.clipboard.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_image(&mut self) -> AppResult<Option<Vec<u8>>> {
        let image = match self.clipboard.get_image() {
            Ok(image) => image,
            Err(arboard::Error::ContentNotAvailable) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        debug!("Got image: {}x{}", image.width, image.height);

        // arboard hands out raw RGBA frames; re-encode as PNG
        let buffer = image::RgbaImage::from_raw(
            image.width as u32,
            image.height as u32,
            image.bytes.into_owned(),
        )
        .ok_or_else(|| AppError::Decode("clipboard image has inconsistent dimensions".to_string()))?;

        let mut png = Vec::new();
        buffer.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
        Ok(Some(png))
    }

    fn write_text(&mut self, text: &str) -> AppResult<()> {
        self.clipboard.set_text(text)?;
        Ok(())
    }

    fn write_image(&mut self, encoded: &[u8]) -> AppResult<()> {
        let rgba = image::load_from_memory(encoded)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        self.clipboard.set_image(arboard::ImageData {
            width: width as usize,
            height: height as usize,
            bytes: rgba.into_raw().into(),
        })?;
        Ok(())
    }

    fn clear(&mut self) -> AppResult<()> {
        self.clipboard.clear()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryContents {
    text: Option<String>,
    image: Option<Vec<u8>>,
}

/// In-process clipboard. Clones share the same contents, so a test can keep
/// one handle while the monitor owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    contents: Arc<Mutex<MemoryContents>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn contents(&self) -> MutexGuard<'_, MemoryContents> {
        match self.contents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Simulate another application copying text.
    pub fn set_text(&self, text: impl Into<String>) {
        let mut contents = self.contents();
        contents.text = Some(text.into());
        contents.image = None;
    }

    /// Simulate another application copying an image.
    pub fn set_image(&self, encoded: Vec<u8>) {
        let mut contents = self.contents();
        contents.image = Some(encoded);
        contents.text = None;
    }

    pub fn text(&self) -> Option<String> {
        self.contents().text.clone()
    }

    pub fn image(&self) -> Option<Vec<u8>> {
        self.contents().image.clone()
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn read_text(&mut self) -> AppResult<Option<String>> {
        Ok(self.text())
    }

    fn read_image(&mut self) -> AppResult<Option<Vec<u8>>> {
        Ok(self.image())
    }

    fn write_text(&mut self, text: &str) -> AppResult<()> {
        self.set_text(text);
        Ok(())
    }

    fn write_image(&mut self, encoded: &[u8]) -> AppResult<()> {
        self.set_image(encoded.to_vec());
        Ok(())
    }

    fn clear(&mut self) -> AppResult<()> {
        *self.contents() = MemoryContents::default();
        Ok(())
    }
}
