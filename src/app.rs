use crate::clipboard::ClipboardSink;
use crate::config::Config;
use crate::encoder::EncoderCommand;
use crate::hotkeys::{self, HotkeyAction, Keymap};
use crate::messages::{AppEvent, AppState, CaptureArtifact, SessionEvent};
use crate::notify::Notifier;
use crate::screenshot;
use crate::services::{RecordingSession, RecordingSettings, SessionHandle};
use crate::uploader::Uploader;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Bound on waiting for an active recording to finalize at shutdown.
/// Covers the session's graceful-stop timeout with slack to spare.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[derive(Debug, PartialEq)]
enum ToggleDecision {
    StartRecording,
    StopRecording,
    Ignore,
}

/// What the record hotkey does in each state. Not-Idle starts nothing, so a
/// second press while stopping or uploading is a no-op.
fn decide_toggle(state: &AppState) -> ToggleDecision {
    match state {
        AppState::Idle => ToggleDecision::StartRecording,
        AppState::Recording => ToggleDecision::StopRecording,
        AppState::Stopping | AppState::Uploading => ToggleDecision::Ignore,
    }
}

/// Screenshots are allowed while uploads are in flight (artifacts are
/// immutable and uploads independent) but not while a recording is live.
fn screenshot_allowed(state: &AppState) -> bool {
    matches!(state, AppState::Idle | AppState::Uploading)
}

pub struct App {
    state_tx: watch::Sender<AppState>,
    config: Config,
    uploader: Arc<Uploader>,
    clipboard: Arc<dyn ClipboardSink>,
    notifier: Notifier,
    hotkey_rx: mpsc::Receiver<HotkeyAction>,
    event_tx: mpsc::Sender<AppEvent>,
    event_rx: mpsc::Receiver<AppEvent>,
    session: Option<SessionHandle>,
    next_session_id: u64,
    uploads_in_flight: usize,
}

impl App {
    pub async fn new(config: Config, clipboard: Arc<dyn ClipboardSink>) -> Result<Self> {
        let keymap = Keymap::from_config(&config.screenshot_hotkey, &config.record_hotkey)?;

        let (hotkey_tx, hotkey_rx) = mpsc::channel(10);
        hotkeys::monitor_keyboards(keymap, hotkey_tx)
            .await
            .context("Failed to set up hotkey monitoring")?;

        let uploader = Arc::new(Uploader::new(
            config.upload_url.clone(),
            config.max_file_size_bytes(),
        ));
        let notifier = Notifier::new(config.notification_enabled);

        let (state_tx, _) = watch::channel(AppState::Idle);
        let (event_tx, event_rx) = mpsc::channel(32);

        tracing::info!(
            "Ready! {} takes a screenshot, {} toggles recording",
            config.screenshot_hotkey,
            config.record_hotkey
        );

        Ok(Self {
            state_tx,
            config,
            uploader,
            clipboard,
            notifier,
            hotkey_rx,
            event_tx,
            event_rx,
            session: None,
            next_session_id: 0,
            uploads_in_flight: 0,
        })
    }

    /// Observable application state for collaborators (tray/status)
    pub fn subscribe_state(&self) -> watch::Receiver<AppState> {
        self.state_tx.subscribe()
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                Some(action) = self.hotkey_rx.recv() => {
                    self.handle_hotkey(action).await;
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    self.shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    fn state(&self) -> AppState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, next: AppState) {
        tracing::debug!("State: {:?} -> {:?}", self.state(), next);
        self.state_tx.send_replace(next);
    }

    async fn handle_hotkey(&mut self, action: HotkeyAction) {
        let state = self.state();
        tracing::debug!("Hotkey {:?} in state {:?}", action, state);

        match action {
            HotkeyAction::Screenshot => {
                if screenshot_allowed(&state) {
                    self.take_screenshot().await;
                } else {
                    tracing::debug!("Ignoring screenshot hotkey in state {:?}", state);
                }
            }
            HotkeyAction::RecordToggle => match decide_toggle(&state) {
                ToggleDecision::StartRecording => self.start_recording(),
                ToggleDecision::StopRecording => self.stop_recording().await,
                ToggleDecision::Ignore => {
                    tracing::debug!("Ignoring record hotkey in state {:?}", state);
                }
            },
        }
    }

    async fn take_screenshot(&mut self) {
        let result = tokio::task::spawn_blocking(screenshot::capture_screenshot).await;

        match result {
            Ok(Ok(artifact)) => self.begin_upload(artifact),
            Ok(Err(e)) => self.notifier.notify(&format!("Screenshot failed: {:#}", e)),
            Err(e) => self.notifier.notify(&format!("Screenshot task failed: {}", e)),
        }
    }

    fn start_recording(&mut self) {
        let output_path = match recording_output_path() {
            Ok(path) => path,
            Err(e) => {
                self.notifier
                    .notify(&format!("Recording failed to start: {:#}", e));
                return;
            }
        };

        let encoder = match EncoderCommand::screen_capture(&output_path, self.config.framerate) {
            Ok(command) => command,
            Err(e) => {
                let _ = std::fs::remove_file(&output_path);
                self.notifier
                    .notify(&format!("Recording failed to start: {:#}", e));
                return;
            }
        };

        let id = self.next_session_id;
        self.next_session_id += 1;

        let settings = RecordingSettings::new(
            output_path.clone(),
            self.config.max_file_size_bytes(),
            encoder,
        );

        match RecordingSession::spawn(id, settings, self.event_tx.clone()) {
            Ok(handle) => {
                self.session = Some(handle);
                self.set_state(AppState::Recording);
                self.notifier
                    .notify("Recording started (press the hotkey again to stop)");
            }
            Err(e) => {
                let _ = std::fs::remove_file(&output_path);
                self.notifier
                    .notify(&format!("Recording failed to start: {:#}", e));
            }
        }
    }

    async fn stop_recording(&mut self) {
        self.set_state(AppState::Stopping);
        if let Some(session) = &self.session {
            session.stop().await;
        }
    }

    async fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Session { id, event } => {
                if self.session.as_ref().map(|s| s.id) != Some(id) {
                    tracing::debug!("Dropping event from finished session {}: {:?}", id, event);
                    return;
                }
                self.handle_session_event(event);
            }
            AppEvent::UploadDone { kind } => {
                tracing::debug!("Upload finished for a {}", kind.label());
                self.uploads_in_flight = self.uploads_in_flight.saturating_sub(1);
                self.settle_state();
            }
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AutoStopping => {
                if self.state() == AppState::Recording {
                    self.set_state(AppState::Stopping);
                    self.notifier
                        .notify("Recording is close to the upload size limit, stopping");
                }
            }
            SessionEvent::Finished(artifact) => {
                self.session = None;
                self.begin_upload(artifact);
            }
            SessionEvent::Failed(message) => {
                self.session = None;
                self.notifier.notify(&format!("Recording failed: {}", message));
                self.settle_state();
            }
        }
    }

    /// Hand an artifact to the upload pipeline on its own task. The hotkey
    /// path stays responsive while the upload runs.
    fn begin_upload(&mut self, artifact: CaptureArtifact) {
        self.uploads_in_flight += 1;
        self.set_state(AppState::Uploading);

        let uploader = self.uploader.clone();
        let clipboard = self.clipboard.clone();
        let notifier = self.notifier.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            upload_and_copy(&uploader, clipboard.as_ref(), &notifier, &artifact).await;

            // The artifact was a temp file either way
            if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
                tracing::debug!("Failed to remove {:?}: {}", artifact.path, e);
            }

            let _ = event_tx
                .send(AppEvent::UploadDone {
                    kind: artifact.kind,
                })
                .await;
        });
    }

    /// Recompute the state once a session or upload reaches a terminal point
    fn settle_state(&self) {
        if self.session.is_some() {
            return;
        }
        if self.uploads_in_flight > 0 {
            self.set_state(AppState::Uploading);
        } else {
            self.set_state(AppState::Idle);
        }
    }

    /// Stop an active recording and wait (bounded) for it to finalize, so no
    /// partially-written container is left behind.
    async fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        tracing::info!("Stopping active recording before exit");
        session.stop().await;

        let deadline = tokio::time::sleep(SHUTDOWN_GRACE);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    let AppEvent::Session { id, event } = event else { continue };
                    if id != session.id {
                        continue;
                    }
                    match event {
                        SessionEvent::Finished(artifact) => {
                            tracing::info!(
                                "Recording finalized at {:?} ({} bytes); not uploaded due to shutdown",
                                artifact.path,
                                artifact.byte_size
                            );
                            break;
                        }
                        SessionEvent::Failed(message) => {
                            tracing::warn!("Recording failed during shutdown: {}", message);
                            break;
                        }
                        SessionEvent::AutoStopping => {}
                    }
                }
                _ = &mut deadline => {
                    tracing::warn!("Timed out waiting for the recording to finalize");
                    break;
                }
            }
        }
    }
}

fn recording_output_path() -> Result<std::path::PathBuf> {
    let file = tempfile::Builder::new()
        .prefix("h4kshot_rec_")
        .suffix(".mp4")
        .tempfile()
        .context("Failed to create recording temp file")?;
    let (_, path) = file.keep().context("Failed to persist recording temp file")?;
    Ok(path)
}

/// Upload an artifact, copy the returned URL to the clipboard, and emit one
/// notification describing the outcome. A clipboard failure still surfaces
/// the URL in the notification text, which is also returned.
async fn upload_and_copy(
    uploader: &Uploader,
    clipboard: &dyn ClipboardSink,
    notifier: &Notifier,
    artifact: &CaptureArtifact,
) -> String {
    tracing::info!(
        "Uploading {} ({} bytes): {:?}",
        artifact.kind.label(),
        artifact.byte_size,
        artifact.path
    );

    let message = match uploader.upload(artifact).await {
        Ok(url) => match clipboard.write(&url) {
            Ok(()) => format!("Uploaded! URL copied:\n{}", url),
            Err(e) => {
                tracing::warn!("Clipboard write failed: {:#}", e);
                format!("Uploaded: {} (clipboard write failed)", url)
            }
        },
        Err(e) => format!("Upload failed: {}", e),
    };

    notifier.notify(&message);
    message
}
