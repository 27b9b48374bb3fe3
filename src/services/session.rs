use crate::encoder::{EncoderCommand, EncoderProcess, probe_container};
use crate::messages::{AppEvent, ArtifactKind, CaptureArtifact, SessionCommand, SessionEvent};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// How often the output file size is sampled
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long the encoder gets to flush its trailer after a stop request
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Floor for the predictive safety margin
const MIN_SAFETY_MARGIN_BYTES: u64 = 1024 * 1024;

/// Predictive size-ceiling check over the last two samples.
///
/// Estimates the growth rate from consecutive samples and projects the size
/// at the next poll. The stop decision fires one interval early so the
/// encoder can finalize before the ceiling is actually crossed, with a
/// margin of at least one interval's growth (floored at 1 MB).
pub struct SizeTracker {
    limit_bytes: u64,
    poll_interval: Duration,
    prev: Option<(Instant, u64)>,
    last: Option<(Instant, u64)>,
}

impl SizeTracker {
    pub fn new(limit_bytes: u64, poll_interval: Duration) -> Self {
        Self {
            limit_bytes,
            poll_interval,
            prev: None,
            last: None,
        }
    }

    /// Record a sample and return true if a graceful stop should be issued.
    ///
    /// Never fires before two samples exist.
    pub fn observe(&mut self, now: Instant, size: u64) -> bool {
        self.prev = self.last.replace((now, size));

        let (Some((prev_at, prev_size)), Some((last_at, last_size))) = (self.prev, self.last)
        else {
            return false;
        };

        let dt = last_at.duration_since(prev_at).as_secs_f64();
        let rate = if dt > 0.0 {
            last_size.saturating_sub(prev_size) as f64 / dt
        } else {
            0.0
        };

        let growth = rate * self.poll_interval.as_secs_f64();
        let margin = growth.max(MIN_SAFETY_MARGIN_BYTES as f64);
        let projected = last_size as f64 + growth;

        projected >= self.limit_bytes as f64 - margin
    }
}

/// Parameters for one recording
#[derive(Clone, Debug)]
pub struct RecordingSettings {
    pub output_path: PathBuf,
    pub limit_bytes: u64,
    pub encoder: EncoderCommand,
    stop_timeout: Duration,
}

impl RecordingSettings {
    pub fn new(output_path: PathBuf, limit_bytes: u64, encoder: EncoderCommand) -> Self {
        Self {
            output_path,
            limit_bytes,
            encoder,
            stop_timeout: GRACEFUL_STOP_TIMEOUT,
        }
    }

    /// Shorten the graceful-stop window; used by tests
    #[cfg(test)]
    fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// One size-bounded screen recording driving an encoder subprocess.
///
/// The session polls the growing output file, issues a predictive graceful
/// stop before the upload ceiling is crossed, and reports a terminal
/// `Finished`/`Failed` event once the encoder has fully exited. The encoder
/// handle never outlives the task; success, timeout, and crash all reap it.
pub struct RecordingSession;

impl RecordingSession {
    /// Start the encoder and spawn the monitoring task.
    ///
    /// Fails immediately if the encoder cannot start (missing binary,
    /// permission denied); that capture attempt is not retried.
    pub fn spawn(
        id: u64,
        settings: RecordingSettings,
        event_tx: mpsc::Sender<AppEvent>,
    ) -> Result<SessionHandle> {
        let encoder = EncoderProcess::start(&settings.encoder)?;
        let (cmd_tx, cmd_rx) = mpsc::channel(4);

        tokio::spawn(run(id, encoder, settings, cmd_rx, event_tx));

        Ok(SessionHandle { id, cmd_tx })
    }
}

/// Handle for communicating with a RecordingSession
pub struct SessionHandle {
    pub id: u64,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Request a graceful stop. Safe to call on a session that is already
    /// stopping; the request is simply dropped.
    pub async fn stop(&self) {
        let (ack, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(SessionCommand::Stop(ack)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run(
    id: u64,
    mut encoder: EncoderProcess,
    settings: RecordingSettings,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<AppEvent>,
) {
    let mut tracker = SizeTracker::new(settings.limit_bytes, POLL_INTERVAL);
    let start = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval_at(start + POLL_INTERVAL, POLL_INTERVAL);
    let path = settings.output_path.clone();
    let stop_timeout = settings.stop_timeout;

    tracing::info!("Recording started: {:?}", path);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                if let Some(SessionCommand::Stop(ack)) = cmd {
                    let _ = ack.send(());
                }
                // Channel closed also means stop: the controller is gone
                break;
            }

            _ = ticker.tick() => {
                let size = output_size(&path);
                if tracker.observe(Instant::now(), size) {
                    tracing::info!(
                        "Output at {} bytes, projected to cross the size ceiling; auto-stopping",
                        size
                    );
                    send_event(&event_tx, id, SessionEvent::AutoStopping).await;
                    break;
                }
            }

            status = encoder.wait() => {
                handle_unexpected_exit(id, status, &path, &event_tx).await;
                return;
            }
        }
    }

    finalize(id, encoder, &path, stop_timeout, &event_tx).await;
}

/// Graceful-stop protocol: ask the encoder to finalize, wait bounded, then
/// escalate to a forced kill. The resulting file is probed either way.
async fn finalize(
    id: u64,
    mut encoder: EncoderProcess,
    path: &Path,
    stop_timeout: Duration,
    event_tx: &mpsc::Sender<AppEvent>,
) {
    if let Err(e) = encoder.request_graceful_stop().await {
        tracing::warn!("Graceful stop request failed: {}", e);
    }

    match encoder.wait_timeout(stop_timeout).await {
        Some(status) => {
            tracing::debug!("Encoder exited with {}", status);
        }
        None => {
            tracing::warn!(
                "Encoder did not exit within {:?}, forcing termination",
                stop_timeout
            );
            encoder.force_stop().await;
        }
    }

    let event = match readable_artifact(path) {
        Some(artifact) => SessionEvent::Finished(artifact),
        None => SessionEvent::Failed(
            "Recording did not produce a readable video file".to_string(),
        ),
    };
    send_event(event_tx, id, event).await;
}

/// The encoder exited before any stop was requested. A non-empty file that
/// still reads as a complete container is offered as a best-effort artifact;
/// anything else is a failure.
async fn handle_unexpected_exit(
    id: u64,
    status: std::io::Result<ExitStatus>,
    path: &Path,
    event_tx: &mpsc::Sender<AppEvent>,
) {
    let status_text = match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("wait failed: {}", e),
    };
    tracing::warn!("Encoder exited unexpectedly ({})", status_text);

    let event = match readable_artifact(path) {
        Some(artifact) => {
            tracing::warn!("Offering partial recording from crashed encoder");
            SessionEvent::Finished(artifact)
        }
        None => SessionEvent::Failed(format!("Recording process died ({})", status_text)),
    };
    send_event(event_tx, id, event).await;
}

fn readable_artifact(path: &Path) -> Option<CaptureArtifact> {
    let byte_size = output_size(path);
    if byte_size == 0 || !probe_container(path) {
        return None;
    }
    Some(CaptureArtifact {
        path: path.to_path_buf(),
        kind: ArtifactKind::Recording,
        byte_size,
    })
}

/// Size of the output file; 0 while the encoder is still initializing it
fn output_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

async fn send_event(event_tx: &mpsc::Sender<AppEvent>, id: u64, event: SessionEvent) {
    if event_tx.send(AppEvent::Session { id, event }).await.is_err() {
        tracing::warn!("Controller gone, dropping session event");
    }
}
