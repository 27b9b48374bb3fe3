use std::path::PathBuf;
use tokio::sync::oneshot;

/// Application state (observable via watch channel)
#[derive(Clone, Debug, PartialEq)]
pub enum AppState {
    Idle,
    Recording,
    Stopping,
    Uploading,
}

/// What kind of capture produced an artifact
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ArtifactKind {
    Screenshot,
    Recording,
}

impl ArtifactKind {
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "screenshot",
            ArtifactKind::Recording => "recording",
        }
    }
}

/// A finished capture file, ready for upload.
///
/// Immutable once created; ownership moves from the session (or the
/// screenshot path) into the upload task.
#[derive(Clone, Debug)]
pub struct CaptureArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub byte_size: u64,
}

/// Commands for a RecordingSession
pub enum SessionCommand {
    Stop(oneshot::Sender<()>),
}

/// Events emitted by a RecordingSession
#[derive(Debug)]
pub enum SessionEvent {
    /// The size monitor projected the ceiling would be crossed and
    /// initiated a graceful stop on its own.
    AutoStopping,
    Finished(CaptureArtifact),
    Failed(String),
}

/// Events delivered to the controller loop
#[derive(Debug)]
pub enum AppEvent {
    Session { id: u64, event: SessionEvent },
    UploadDone { kind: ArtifactKind },
}
