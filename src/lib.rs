pub mod core;
pub mod shared;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::core::clipboard::{backend, ArboardClipboard, ClipboardMonitor, ImageCodec};
use crate::core::storage::open_storage;
use crate::shared::settings::AppSettings;
use crate::shared::types::split_favorites;
use crate::shared::AppResult;

/// Install the global `fmt` subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // a subscriber may already be installed by an embedding app
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Run the monitor against the system clipboard until Ctrl-C.
///
/// Each published history is logged in place of a UI redraw.
pub async fn run() -> AppResult<()> {
    let settings = AppSettings::load().await.unwrap_or_else(|e| {
        warn!("Failed to load settings, using defaults: {}", e);
        AppSettings::default()
    });

    let storage = open_storage(&settings.storage)?;
    let codec = ImageCodec::new(storage.image_dir())?.with_publish_settle(settings.monitor.publish_settle());
    let clipboard = backend::shared(ArboardClipboard::new()?);

    let (mut monitor, mut updates) =
        ClipboardMonitor::new(storage.clone(), clipboard, Arc::new(codec), settings.monitor.clone());
    monitor.start()?;
    info!("✅ Clipboard monitoring started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => {
                let Some(items) = update else { break };
                let (favorites, all) = split_favorites(&items);
                info!("History: {} items ({} favorites)", all.len(), favorites.len());

                let now = Utc::now();
                for item in all.iter().take(5) {
                    info!("  {:<22} {}", item.display_label(), item.format_age(now));
                }
            }
        }
    }

    monitor.stop().await;
    storage.close()?;
    info!("Clipboard history closed");
    Ok(())
}
