use crate::messages::{ArtifactKind, CaptureArtifact};
use anyhow::{Context, Result};
use xcap::Monitor;

/// Capture the primary monitor to a temp PNG.
///
/// Blocking and bounded (a single frame); the caller runs it on a blocking
/// task. Falls back to the first monitor if none reports as primary.
pub fn capture_screenshot() -> Result<CaptureArtifact> {
    let monitors = Monitor::all().context("Failed to enumerate monitors")?;

    let monitor = monitors
        .iter()
        .find(|m| m.is_primary().unwrap_or(false))
        .or_else(|| monitors.first())
        .context("No monitor available for capture")?;

    let image = monitor.capture_image().context("Screen capture failed")?;

    let file = tempfile::Builder::new()
        .prefix("h4kshot_")
        .suffix(".png")
        .tempfile()
        .context("Failed to create screenshot temp file")?;
    let (_, path) = file.keep().context("Failed to persist screenshot file")?;

    image
        .save(&path)
        .with_context(|| format!("Failed to write PNG to {:?}", path))?;

    let byte_size = std::fs::metadata(&path)
        .with_context(|| format!("Failed to stat screenshot {:?}", path))?
        .len();

    tracing::info!("Screenshot captured: {:?} ({} bytes)", path, byte_size);

    Ok(CaptureArtifact {
        path,
        kind: ArtifactKind::Screenshot,
        byte_size,
    })
}
