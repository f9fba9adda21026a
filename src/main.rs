#[tokio::main]
async fn main() {
    clipboard_history_lib::init_tracing();

    if let Err(e) = clipboard_history_lib::run().await {
        tracing::error!("Clipboard history exited: {}", e);
        std::process::exit(1);
    }
}
