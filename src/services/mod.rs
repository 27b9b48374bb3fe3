pub mod session;

pub use session::{RecordingSession, RecordingSettings, SessionHandle};
