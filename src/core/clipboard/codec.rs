//! Image persistence for clipboard images
//!
//! Saves clipboard image payloads into the image directory, publishes saved
//! files back onto the clipboard, and fingerprints payloads for change
//! detection. Independent of the poll loop.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Frame, ImageFormat, ImageReader};
use rand::Rng;
use tracing::{debug, info, warn};

use super::backend::ClipboardBackend;
use crate::shared::error::{AppError, AppResult};

const JPEG_QUALITY: u8 = 90;
/// NeuQuant sampling speed for GIF palette reduction (1 = best, 30 = fastest)
const GIF_QUANT_SPEED: i32 = 10;

/// Image formats the history keeps on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredFormat {
    Png,
    Jpeg,
    Gif,
}

impl StoredFormat {
    /// Sniff the format from magic bytes.
    pub fn detect(bytes: &[u8]) -> AppResult<Self> {
        let format = image::guess_format(bytes)
            .map_err(|e| AppError::Decode(format!("unrecognised image data: {}", e)))?;
        match format {
            ImageFormat::Png => Ok(StoredFormat::Png),
            ImageFormat::Jpeg => Ok(StoredFormat::Jpeg),
            ImageFormat::Gif => Ok(StoredFormat::Gif),
            other => Err(AppError::UnsupportedFormat(format!("{:?}", other))),
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            StoredFormat::Png => ImageFormat::Png,
            StoredFormat::Jpeg => ImageFormat::Jpeg,
            StoredFormat::Gif => ImageFormat::Gif,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            StoredFormat::Png => "png",
            StoredFormat::Jpeg => "jpg",
            StoredFormat::Gif => "gif",
        }
    }
}

/// Identity of an image payload: content hash plus pixel dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFingerprint {
    pub digest: String,
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for ImageFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.digest, self.width, self.height)
    }
}

pub struct ImageCodec {
    image_dir: PathBuf,
    publish_settle: Duration,
}

impl ImageCodec {
    /// Create the codec, creating `image_dir` if needed.
    pub fn new(image_dir: impl AsRef<Path>) -> AppResult<Self> {
        let image_dir = image_dir.as_ref();
        fs::create_dir_all(image_dir).map_err(|e| {
            AppError::Io(format!(
                "Failed to create image directory {}: {}",
                image_dir.display(),
                e
            ))
        })?;
        // stored paths must be absolute
        let image_dir = fs::canonicalize(image_dir)?;

        Ok(Self {
            image_dir,
            publish_settle: Duration::from_millis(200),
        })
    }

    /// How long to wait before reading a published image back.
    pub fn with_publish_settle(mut self, settle: Duration) -> Self {
        self.publish_settle = settle;
        self
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Fingerprint raw clipboard image bytes without decoding the pixels.
    pub fn fingerprint(bytes: &[u8]) -> AppResult<ImageFingerprint> {
        let format = StoredFormat::detect(bytes)?;
        let (width, height) =
            ImageReader::with_format(Cursor::new(bytes), format.image_format()).into_dimensions()?;

        Ok(ImageFingerprint {
            digest: format!("{:x}", md5::compute(bytes)),
            width,
            height,
        })
    }

    /// Decode clipboard image bytes and write them to a new file in the image
    /// directory. Returns the absolute path of the file.
    pub fn save(&self, bytes: &[u8]) -> AppResult<PathBuf> {
        let format = StoredFormat::detect(bytes)?;
        let img = image::load_from_memory_with_format(bytes, format.image_format())
            .map_err(|e| AppError::Decode(e.to_string()))?;

        let path = self.image_dir.join(Self::file_name(format));
        if let Err(e) = Self::encode_to(&path, &img, format) {
            // never leave a half-written file behind
            if let Err(rm) = fs::remove_file(&path) {
                debug!("No partial file to clean up at {}: {}", path.display(), rm);
            }
            return Err(e);
        }

        info!("Saved clipboard image to {}", path.display());
        Ok(path)
    }

    fn file_name(format: StoredFormat) -> String {
        let suffix: u16 = rand::thread_rng().gen();
        format!(
            "clip_{}_{:04x}.{}",
            Local::now().format("%Y%m%d%H%M%S%3f"),
            suffix,
            format.extension()
        )
    }

    fn encode_to(path: &Path, img: &DynamicImage, format: StoredFormat) -> AppResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        match format {
            StoredFormat::Png => img.write_to(&mut writer, ImageFormat::Png)?,
            StoredFormat::Jpeg => {
                // JPEG has no alpha channel
                let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
                img.to_rgb8().write_with_encoder(encoder)?;
            }
            StoredFormat::Gif => {
                // GifEncoder reduces the full-colour frame to a 256 entry palette
                let mut encoder = GifEncoder::new_with_speed(&mut writer, GIF_QUANT_SPEED);
                encoder.encode_frame(Frame::new(img.to_rgba8()))?;
            }
        }

        writer.flush()?;
        Ok(())
    }

    /// Put an image file on the clipboard and verify that it arrived.
    ///
    /// Some platforms silently drop clipboard writes, so the image is read
    /// back after `publish_settle` and its pixels compared with the file's.
    pub fn load_and_publish(&self, path: &Path, clipboard: &mut dyn ClipboardBackend) -> AppResult<()> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            return Err(AppError::Io(format!("{} is a directory", path.display())));
        }
        if meta.len() == 0 {
            return Err(AppError::EmptyFile(path.to_path_buf()));
        }

        let data = fs::read(path)?;
        if data.is_empty() {
            return Err(AppError::EmptyFile(path.to_path_buf()));
        }
        let expected = pixel_digest(&data)?;

        clipboard.write_image(&data)?;
        if !self.publish_settle.is_zero() {
            std::thread::sleep(self.publish_settle);
        }

        let actual = match clipboard.read_image()? {
            Some(written) => pixel_digest(&written).unwrap_or_else(|e| {
                warn!("Clipboard image could not be decoded after publish: {}", e);
                "undecodable".to_string()
            }),
            None => "nothing".to_string(),
        };
        if actual != expected {
            return Err(AppError::Integrity { expected, actual });
        }

        info!(
            "Published {} to clipboard ({} KB, digest {})",
            path.display(),
            data.len() / 1024,
            expected
        );
        Ok(())
    }

    /// Open an image with the system default viewer.
    pub fn preview(&self, path: &Path) -> AppResult<()> {
        if !path.exists() {
            return Err(AppError::FileNotFound(path.to_path_buf()));
        }
        opener::open(path).map_err(|e| AppError::Io(format!("Failed to open {}: {}", path.display(), e)))
    }
}

/// Digest of the decoded RGBA pixels, stable across re-encoding.
fn pixel_digest(bytes: &[u8]) -> AppResult<String> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let mut ctx = md5::Context::new();
    ctx.consume(rgba.width().to_le_bytes());
    ctx.consume(rgba.height().to_le_bytes());
    ctx.consume(rgba.as_raw());
    Ok(format!("{:x}", ctx.compute()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::clipboard::backend::MemoryClipboard;
    use image::{Rgba, RgbaImage};

    pub(crate) fn encoded(format: ImageFormat, width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([shade, 255 - shade, 40, 255]));
        let img = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img).to_rgb8()),
            _ => DynamicImage::ImageRgba8(img),
        };
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), format).unwrap();
        out
    }

    fn codec() -> (tempfile::TempDir, ImageCodec) {
        let dir = tempfile::tempdir().unwrap();
        let codec = ImageCodec::new(dir.path().join("images"))
            .unwrap()
            .with_publish_settle(Duration::ZERO);
        (dir, codec)
    }

    #[test]
    fn test_save_each_supported_format() {
        let (_dir, codec) = codec();
        for (format, ext) in [
            (ImageFormat::Png, "png"),
            (ImageFormat::Jpeg, "jpg"),
            (ImageFormat::Gif, "gif"),
        ] {
            let path = codec.save(&encoded(format, 6, 4, 10)).unwrap();
            assert!(path.is_absolute());
            assert!(path.starts_with(codec.image_dir()));
            assert_eq!(path.extension().unwrap(), ext);

            let reloaded = image::open(&path).unwrap();
            assert_eq!((reloaded.width(), reloaded.height()), (6, 4));
        }
    }

    #[test]
    fn test_save_rejects_garbage_and_foreign_formats() {
        let (_dir, codec) = codec();
        assert!(matches!(codec.save(b"definitely not an image"), Err(AppError::Decode(_))));

        let mut bmp = b"BM".to_vec();
        bmp.extend_from_slice(&[0u8; 64]);
        assert!(matches!(codec.save(&bmp), Err(AppError::UnsupportedFormat(_))));

        // truncated PNG: right magic, broken body
        let png = encoded(ImageFormat::Png, 4, 4, 0);
        assert!(matches!(codec.save(&png[..20]), Err(AppError::Decode(_))));
        assert_eq!(fs::read_dir(codec.image_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_fingerprint_tracks_content_and_size() {
        let a = encoded(ImageFormat::Png, 4, 4, 0);
        let b = encoded(ImageFormat::Png, 4, 4, 200);
        let wide = encoded(ImageFormat::Png, 8, 2, 0);

        let fa = ImageCodec::fingerprint(&a).unwrap();
        assert_eq!(fa, ImageCodec::fingerprint(&a).unwrap());
        assert_eq!((fa.width, fa.height), (4, 4));
        assert_ne!(fa, ImageCodec::fingerprint(&b).unwrap());
        assert_ne!(fa, ImageCodec::fingerprint(&wide).unwrap());
        assert!(fa.to_string().ends_with("_4_4"));
    }

    #[test]
    fn test_load_and_publish_round_trip() {
        let (_dir, codec) = codec();
        let path = codec.save(&encoded(ImageFormat::Png, 3, 3, 90)).unwrap();

        let mut clipboard = MemoryClipboard::new();
        codec.load_and_publish(&path, &mut clipboard).unwrap();
        assert_eq!(clipboard.image().unwrap(), fs::read(&path).unwrap());
    }

    #[test]
    fn test_load_and_publish_missing_and_empty() {
        let (dir, codec) = codec();
        let mut clipboard = MemoryClipboard::new();

        let missing = dir.path().join("nope.png");
        assert!(matches!(
            codec.load_and_publish(&missing, &mut clipboard),
            Err(AppError::FileNotFound(p)) if p == missing
        ));

        let empty = dir.path().join("empty.png");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(
            codec.load_and_publish(&empty, &mut clipboard),
            Err(AppError::EmptyFile(_))
        ));
    }

    /// Accepts writes but keeps serving a stale image.
    struct StaleClipboard(Vec<u8>);

    impl ClipboardBackend for StaleClipboard {
        fn read_text(&mut self) -> AppResult<Option<String>> {
            Ok(None)
        }
        fn read_image(&mut self) -> AppResult<Option<Vec<u8>>> {
            Ok(Some(self.0.clone()))
        }
        fn write_text(&mut self, _text: &str) -> AppResult<()> {
            Ok(())
        }
        fn write_image(&mut self, _encoded: &[u8]) -> AppResult<()> {
            Ok(())
        }
        fn clear(&mut self) -> AppResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_load_and_publish_detects_dropped_write() {
        let (_dir, codec) = codec();
        let path = codec.save(&encoded(ImageFormat::Png, 3, 3, 90)).unwrap();

        let mut clipboard = StaleClipboard(encoded(ImageFormat::Png, 3, 3, 1));
        assert!(matches!(
            codec.load_and_publish(&path, &mut clipboard),
            Err(AppError::Integrity { .. })
        ));
    }

    #[test]
    fn test_preview_missing_file() {
        let (dir, codec) = codec();
        assert!(matches!(
            codec.preview(&dir.path().join("gone.png")),
            Err(AppError::FileNotFound(_))
        ));
    }
}
