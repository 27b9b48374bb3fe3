mod app;
mod clipboard;
mod config;
mod encoder;
mod hotkeys;
mod messages;
mod notify;
mod screenshot;
mod services;
mod uploader;

use app::App;
use clipboard::SystemClipboard;
use config::Config;

use anyhow::Result;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    tracing::info!("Starting h4kshot capture daemon");

    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    let app = App::new(config, Arc::new(SystemClipboard)).await?;

    // Status observer; a tray collaborator would watch the same channel
    let mut state_rx = app.subscribe_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            tracing::debug!("App state: {:?}", *state_rx.borrow());
        }
    });

    app.run().await
}
