//! Clipboard polling loop
//!
//! The OS clipboard has no change events we can rely on, so the monitor
//! samples it on a fixed interval, classifies what it finds, and records a
//! history entry whenever the winning type's fingerprint differs from the last
//! one seen for that type. Each recorded change publishes the full ordered
//! history on a bounded channel.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{lock, SharedClipboard};
use super::classifier::{classify, ClipboardSnapshot, Payload};
use super::codec::ImageCodec;
use crate::core::storage::Storage;
use crate::shared::error::{AppError, AppResult};
use crate::shared::settings::MonitorConfig;
use crate::shared::types::{ClipboardItem, ItemType};

/// Consecutive failed cycles before the loop starts backing off
const MAX_CONSECUTIVE_ERRORS: u32 = 10;
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Last fingerprint seen per content type
#[derive(Debug, Default)]
struct LastSeen {
    text: Option<String>,
    image: Option<String>,
    files: Option<String>,
}

impl LastSeen {
    fn slot(&mut self, item_type: ItemType) -> &mut Option<String> {
        match item_type {
            ItemType::Text => &mut self.text,
            ItemType::Image => &mut self.image,
            ItemType::File => &mut self.files,
        }
    }

    fn is_new(&mut self, payload: &Payload) -> bool {
        self.slot(payload.item_type()).as_deref() != Some(payload.fingerprint().as_str())
    }

    fn record(&mut self, payload: &Payload) {
        *self.slot(payload.item_type()) = Some(payload.fingerprint());
    }
}

/// Everything one poll cycle touches. Cheap to clone into blocking tasks.
#[derive(Clone)]
struct Poller {
    storage: Arc<dyn Storage>,
    clipboard: SharedClipboard,
    codec: Arc<ImageCodec>,
    last_seen: Arc<Mutex<LastSeen>>,
    updates: mpsc::Sender<Vec<ClipboardItem>>,
}

impl Poller {
    fn last_seen(&self) -> MutexGuard<'_, LastSeen> {
        match self.last_seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn poll_once(&self) -> AppResult<Option<Vec<ClipboardItem>>> {
        let snapshot = ClipboardSnapshot::read(&mut **lock(&self.clipboard))?;
        let payload = match classify(&snapshot) {
            Some(payload) => payload,
            None => return Ok(None),
        };
        if !self.last_seen().is_new(&payload) {
            return Ok(None);
        }

        let items = match &payload {
            Payload::Image { bytes, fingerprint } => {
                let path = self.codec.save(bytes)?;
                let item = ClipboardItem::new_image(path.clone(), fingerprint.width, fingerprint.height);
                let items = self.record(item).map_err(|e| {
                    discard_image(&path);
                    e
                })?;

                // some platforms keep re-surfacing the same image data
                if let Err(e) = lock(&self.clipboard).clear() {
                    warn!("Failed to clear clipboard after saving image: {}", e);
                }
                items
            }
            Payload::Files(paths) => self.record(ClipboardItem::new_files(paths))?,
            Payload::Text(text) => self.record(ClipboardItem::new_text(text.as_str()))?,
        };

        // only a recorded change moves the slot, so failures retry next cycle
        self.last_seen().record(&payload);
        info!("Detected clipboard change ({:?})", payload.item_type());

        self.publish(&items);
        Ok(Some(items))
    }

    fn record(&self, item: ClipboardItem) -> AppResult<Vec<ClipboardItem>> {
        self.storage.add_item(item)
    }

    fn publish(&self, items: &[ClipboardItem]) {
        match self.updates.try_send(items.to_vec()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("History update dropped: consumer is not keeping up");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("History update dropped: no consumer");
            }
        }
    }

    /// Write `item` back to the clipboard and mark it as seen.
    fn restore(&self, item: &ClipboardItem) -> AppResult<()> {
        let mut clipboard = lock(&self.clipboard);
        match item.item_type {
            ItemType::Text | ItemType::File => clipboard.write_text(&item.content)?,
            ItemType::Image => {
                let path = item
                    .image_path
                    .as_deref()
                    .filter(|p| !p.as_os_str().is_empty())
                    .ok_or(AppError::EmptyPath)?;
                self.codec.load_and_publish(path, &mut **clipboard)?;
            }
        }

        // what the clipboard now holds is not a new copy
        match ClipboardSnapshot::read(&mut **clipboard).map(|s| classify(&s)) {
            Ok(Some(payload)) => self.last_seen().record(&payload),
            Ok(None) => debug!("Restored item {} left nothing recognisable", item.id),
            Err(e) => debug!("Could not fingerprint restored item {}: {}", item.id, e),
        }
        Ok(())
    }
}

fn discard_image(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to remove unrecorded image {}: {}", path.display(), e);
    }
}

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Clipboard monitor that polls for changes
pub struct ClipboardMonitor {
    poller: Poller,
    config: MonitorConfig,
    running: Option<RunningLoop>,
}

impl ClipboardMonitor {
    /// Create a stopped monitor and the receiving end of its update channel.
    pub fn new(
        storage: Arc<dyn Storage>,
        clipboard: SharedClipboard,
        codec: Arc<ImageCodec>,
        config: MonitorConfig,
    ) -> (Self, mpsc::Receiver<Vec<ClipboardItem>>) {
        let (updates, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let poller = Poller {
            storage,
            clipboard,
            codec,
            last_seen: Arc::new(Mutex::new(LastSeen::default())),
            updates,
        };

        (
            Self {
                poller,
                config,
                running: None,
            },
            receiver,
        )
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.poller.storage
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Spawn the poll loop on the current tokio runtime.
    pub fn start(&mut self) -> AppResult<()> {
        if self.is_running() {
            return Err(AppError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(self.poller.clone(), self.config.poll_interval(), stop_rx));
        self.running = Some(RunningLoop { stop_tx, handle });
        Ok(())
    }

    /// Signal the loop to exit and wait briefly for an in-flight cycle.
    ///
    /// The loop is aborted if it does not finish within the grace period.
    pub async fn stop(&mut self) {
        let Some(RunningLoop { stop_tx, mut handle }) = self.running.take() else {
            return;
        };
        // a send error means the loop already exited
        let _ = stop_tx.send(true);

        match tokio::time::timeout(self.config.stop_grace(), &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Clipboard monitor task failed: {}", e),
            Err(_) => {
                warn!("Clipboard monitor did not stop within grace period, aborting");
                handle.abort();
            }
        }
    }

    /// Run a single detection cycle. Returns the published history when a
    /// change was recorded.
    pub fn poll_once(&self) -> AppResult<Option<Vec<ClipboardItem>>> {
        self.poller.poll_once()
    }

    /// Put a history item back on the clipboard.
    pub async fn set_content(&self, item: &ClipboardItem) -> AppResult<()> {
        item.validate()?;

        let poller = self.poller.clone();
        let item = item.clone();
        tokio::task::spawn_blocking(move || poller.restore(&item))
            .await
            .map_err(|e| AppError::Clipboard(format!("Clipboard write task failed: {}", e)))?
    }

    /// Open an image item in the system viewer.
    pub fn preview(&self, item: &ClipboardItem) -> AppResult<()> {
        if item.item_type != ItemType::Image {
            return Err(AppError::InvalidItem(format!("item {} is not an image", item.id)));
        }
        let path = item.image_path.as_deref().ok_or(AppError::EmptyPath)?;
        self.poller.codec.preview(path)
    }
}

impl Drop for ClipboardMonitor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.handle.abort();
        }
    }
}

async fn poll_loop(poller: Poller, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    info!("Clipboard monitor started (every {:?})", interval);
    let mut consecutive_errors = 0u32;

    loop {
        let cycle = poller.clone();
        let result = tokio::task::spawn_blocking(move || cycle.poll_once())
            .await
            .unwrap_or_else(|e| Err(AppError::Clipboard(format!("poll task failed: {}", e))));

        let sleep_for = match result {
            Ok(_) => {
                consecutive_errors = 0;
                interval
            }
            Err(e) => {
                consecutive_errors += 1;
                // Only log errors occasionally to avoid spam
                if consecutive_errors == 1 || consecutive_errors % 10 == 0 {
                    warn!("Clipboard poll failed (error #{}): {}", consecutive_errors, e);
                }
                backoff(interval, consecutive_errors)
            }
        };

        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
    info!("Clipboard monitor stopped");
}

/// Exponential backoff once errors pile up, capped at five seconds.
fn backoff(interval: Duration, consecutive_errors: u32) -> Duration {
    if consecutive_errors < MAX_CONSECUTIVE_ERRORS {
        return interval;
    }
    if consecutive_errors == MAX_CONSECUTIVE_ERRORS {
        warn!("Too many consecutive clipboard errors, reducing polling frequency");
    }
    let exponent = (consecutive_errors - MAX_CONSECUTIVE_ERRORS).min(4);
    interval
        .saturating_mul(2u32.pow(exponent))
        .min(MAX_POLL_INTERVAL)
        .max(interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clipboard::backend::{shared, MemoryClipboard};
    use crate::core::clipboard::codec::tests::encoded;
    use crate::core::storage::{JsonStorage, Mutation};
    use image::ImageFormat;
    use std::path::PathBuf;

    struct Harness {
        _dir: tempfile::TempDir,
        handle: MemoryClipboard,
        monitor: ClipboardMonitor,
        updates: mpsc::Receiver<Vec<ClipboardItem>>,
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 10,
            channel_capacity: 10,
            stop_grace_ms: 500,
            publish_settle_ms: 0,
        }
    }

    fn harness_with(storage: impl FnOnce(&Path) -> Arc<dyn Storage>, config: MonitorConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path().join("history").as_path());
        let codec = ImageCodec::new(storage.image_dir())
            .unwrap()
            .with_publish_settle(config.publish_settle());
        let handle = MemoryClipboard::new();
        let (monitor, updates) =
            ClipboardMonitor::new(storage, shared(handle.clone()), Arc::new(codec), config);
        Harness {
            _dir: dir,
            handle,
            monitor,
            updates,
        }
    }

    fn json_storage(dir: &Path) -> Arc<dyn Storage> {
        Arc::new(JsonStorage::open(dir, 100).unwrap())
    }

    fn harness() -> Harness {
        harness_with(json_storage, config())
    }

    fn image_files(storage: &dyn Storage) -> usize {
        fs::read_dir(storage.image_dir()).unwrap().count()
    }

    /// Storage whose writes always fail
    struct BrokenStorage {
        image_dir: PathBuf,
    }

    impl Storage for BrokenStorage {
        fn load_items(&self) -> AppResult<Vec<ClipboardItem>> {
            Ok(Vec::new())
        }
        fn transact(&self, _mutation: Mutation<'_>) -> AppResult<Vec<ClipboardItem>> {
            Err(AppError::Storage("disk full".to_string()))
        }
        fn max_items(&self) -> usize {
            100
        }
        fn image_dir(&self) -> &Path {
            &self.image_dir
        }
        fn close(&self) -> AppResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_text_round_trip_emits_every_change() {
        let mut h = harness();

        for text in ["x", "y", "x"] {
            h.handle.set_text(text);
            assert!(h.monitor.poll_once().unwrap().is_some(), "{}", text);
        }
        for _ in 0..3 {
            assert!(h.updates.try_recv().is_ok());
        }

        let items = h.monitor.storage().load_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "x");
    }

    #[test]
    fn test_unchanged_clipboard_is_quiet() {
        let mut h = harness();
        h.handle.set_text("same");
        assert!(h.monitor.poll_once().unwrap().is_some());
        assert!(h.monitor.poll_once().unwrap().is_none());
        assert!(h.monitor.poll_once().unwrap().is_none());

        assert!(h.updates.try_recv().is_ok());
        assert!(h.updates.try_recv().is_err());
    }

    #[test]
    fn test_image_is_saved_and_cleared() {
        let h = harness();
        h.handle.set_image(encoded(ImageFormat::Png, 3, 2, 40));

        let items = h.monitor.poll_once().unwrap().unwrap();
        assert_eq!(items[0].item_type, ItemType::Image);
        assert_eq!(items[0].content, "[Image 3x2]");
        assert!(items[0].image_path.as_ref().unwrap().exists());

        assert_eq!(h.handle.image(), None);
        assert!(h.monitor.poll_once().unwrap().is_none());

        // the same picture copied again is still the last one seen
        h.handle.set_image(encoded(ImageFormat::Png, 3, 2, 40));
        assert!(h.monitor.poll_once().unwrap().is_none());
        assert_eq!(image_files(h.monitor.storage().as_ref()), 1);
    }

    #[test]
    fn test_file_list_is_recorded_as_file_item() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        h.handle.set_text(format!("{}\n{}", a.display(), b.display()));
        let items = h.monitor.poll_once().unwrap().unwrap();
        assert_eq!(items[0].item_type, ItemType::File);
        assert_eq!(items[0].content, format!("{};{}", a.display(), b.display()));
    }

    #[test]
    fn test_failed_add_is_retried_and_cleans_up() {
        let h = harness_with(
            |dir: &Path| -> Arc<dyn Storage> {
                let image_dir = dir.join("images");
                fs::create_dir_all(&image_dir).unwrap();
                Arc::new(BrokenStorage { image_dir })
            },
            config(),
        );

        h.handle.set_image(encoded(ImageFormat::Png, 2, 2, 1));
        assert!(matches!(h.monitor.poll_once(), Err(AppError::Storage(_))));
        assert_eq!(image_files(h.monitor.storage().as_ref()), 0);
        assert!(h.handle.image().is_some());

        // nothing was recorded, so the same payload is attempted again
        assert!(matches!(h.monitor.poll_once(), Err(AppError::Storage(_))));
    }

    #[test]
    fn test_undecodable_image_is_ignored() {
        let h = harness();
        h.handle.set_image(b"definitely not an image".to_vec());
        assert!(h.monitor.poll_once().unwrap().is_none());
        assert!(h.monitor.storage().load_items().unwrap().is_empty());
        assert_eq!(image_files(h.monitor.storage().as_ref()), 0);
    }

    #[test]
    fn test_full_channel_drops_updates() {
        let mut cfg = config();
        cfg.channel_capacity = 1;
        let mut h = harness_with(json_storage, cfg);

        h.handle.set_text("one");
        h.monitor.poll_once().unwrap();
        h.handle.set_text("two");
        assert!(h.monitor.poll_once().unwrap().is_some());

        let first = h.updates.try_recv().unwrap();
        assert_eq!(first[0].content, "one");
        assert!(h.updates.try_recv().is_err());
        assert_eq!(h.monitor.storage().load_items().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_set_content_marks_item_seen() {
        let h = harness();
        h.handle.set_text("first");
        h.monitor.poll_once().unwrap();
        h.handle.set_text("second");
        let items = h.monitor.poll_once().unwrap().unwrap();

        let first = items.iter().find(|i| i.content == "first").unwrap().clone();
        h.monitor.set_content(&first).await.unwrap();
        assert_eq!(h.handle.text().as_deref(), Some("first"));
        assert!(h.monitor.poll_once().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_content_restores_image() {
        let h = harness();
        h.handle.set_image(encoded(ImageFormat::Png, 4, 4, 90));
        let items = h.monitor.poll_once().unwrap().unwrap();

        h.monitor.set_content(&items[0]).await.unwrap();
        assert!(h.handle.image().is_some());
        // a restored image must not be cleared or re-recorded
        assert!(h.monitor.poll_once().unwrap().is_none());
        assert!(h.handle.image().is_some());
    }

    #[tokio::test]
    async fn test_set_content_rejects_bad_items() {
        let h = harness();

        let mut no_id = ClipboardItem::new_text("x");
        no_id.id.clear();
        assert!(matches!(h.monitor.set_content(&no_id).await, Err(AppError::InvalidItem(_))));

        let mut no_path = ClipboardItem::new_image(PathBuf::from("/tmp/x.png"), 1, 1);
        no_path.image_path = None;
        assert!(matches!(h.monitor.set_content(&no_path).await, Err(AppError::EmptyPath)));

        let missing = ClipboardItem::new_image(PathBuf::from("/definitely/missing.png"), 1, 1);
        assert!(matches!(h.monitor.set_content(&missing).await, Err(AppError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let mut h = harness();
        assert!(!h.monitor.is_running());
        h.monitor.stop().await;

        h.monitor.start().unwrap();
        assert!(h.monitor.is_running());
        assert!(matches!(h.monitor.start(), Err(AppError::AlreadyRunning)));

        h.handle.set_text("from another app");
        let items = tokio::time::timeout(Duration::from_secs(5), h.updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(items[0].content, "from another app");

        h.monitor.stop().await;
        assert!(!h.monitor.is_running());
        h.monitor.stop().await;

        h.monitor.start().unwrap();
        h.monitor.stop().await;
    }

    #[test]
    fn test_backoff() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff(base, 1), base);
        assert_eq!(backoff(base, 9), base);
        assert_eq!(backoff(base, 10), base);
        assert_eq!(backoff(base, 11), Duration::from_millis(1000));
        assert_eq!(backoff(base, 40), MAX_POLL_INTERVAL);

        // an interval already past the cap is never shortened, nor overflowed
        assert_eq!(backoff(Duration::MAX, 14), Duration::MAX);
        let slow = Duration::from_secs(u64::MAX / 4);
        assert_eq!(backoff(slow, 12), slow);
    }
}
