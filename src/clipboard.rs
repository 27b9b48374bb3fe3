use anyhow::{Context, Result};

/// Capability interface for writing the share URL to the clipboard.
///
/// Failure is never fatal; the URL is still surfaced through the
/// notification path.
pub trait ClipboardSink: Send + Sync {
    fn write(&self, text: &str) -> Result<()>;
}

/// OS clipboard via arboard
pub struct SystemClipboard;

impl ClipboardSink for SystemClipboard {
    fn write(&self, text: &str) -> Result<()> {
        let mut clipboard = arboard::Clipboard::new().context("Failed to open clipboard")?;

        #[cfg(target_os = "linux")]
        {
            use arboard::SetExtLinux;
            use std::sync::mpsc::RecvTimeoutError;
            use std::time::Duration;

            // On X11 the selection is only served while its owner lives, so
            // the waiting set runs on a background thread. A set that cannot
            // take ownership errors out immediately; a successful one blocks
            // serving the selection. A short wait on the first result
            // separates the two, so the caller sees real failures.
            let (result_tx, result_rx) = std::sync::mpsc::channel();
            let text = text.to_string();
            std::thread::spawn(move || {
                let result = clipboard.set().wait().text(text);
                if let Err(e) = &result {
                    tracing::warn!("Clipboard write failed: {}", e);
                }
                let _ = result_tx.send(result);
            });

            match result_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(result) => result.context("Failed to write clipboard"),
                // Still blocked serving the selection: the set took ownership
                Err(RecvTimeoutError::Timeout) => Ok(()),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(anyhow::anyhow!("Clipboard thread exited unexpectedly"))
                }
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            clipboard
                .set_text(text.to_string())
                .context("Failed to write clipboard")?;
            Ok(())
        }
    }
}
