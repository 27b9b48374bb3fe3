use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

/// Return the path to ffmpeg or fail if not installed
pub fn locate_ffmpeg() -> Result<PathBuf> {
    which::which("ffmpeg").context(
        "ffmpeg is not installed or not on PATH. \
         Please install ffmpeg to use screen recording.",
    )
}

/// Build the ffmpeg arguments for screen capture on the current platform
fn capture_args(output_path: &Path, framerate: u32) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into()];

    if cfg!(target_os = "macos") {
        // avfoundation device 1 is the screen
        args.extend([
            "-f".into(),
            "avfoundation".into(),
            "-framerate".into(),
            framerate.to_string(),
            "-i".into(),
            "1:none".into(),
        ]);
    } else if cfg!(target_os = "windows") {
        args.extend([
            "-f".into(),
            "gdigrab".into(),
            "-framerate".into(),
            framerate.to_string(),
            "-i".into(),
            "desktop".into(),
        ]);
    } else {
        let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".into());
        args.extend([
            "-f".into(),
            "x11grab".into(),
            "-framerate".into(),
            framerate.to_string(),
            "-i".into(),
            display,
        ]);
    }

    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "ultrafast".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        output_path.to_string_lossy().into_owned(),
    ]);

    args
}

/// Program and argument list used to launch an encoder subprocess
#[derive(Clone, Debug)]
pub struct EncoderCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EncoderCommand {
    /// ffmpeg capturing the screen to `output_path`
    pub fn screen_capture(output_path: &Path, framerate: u32) -> Result<Self> {
        Ok(Self {
            program: locate_ffmpeg()?,
            args: capture_args(output_path, framerate),
        })
    }
}

/// One external ffmpeg encoding subprocess writing a growing container file.
///
/// Stdin stays piped: writing `q` is ffmpeg's own graceful-termination
/// mechanism and lets it flush the container trailer before exiting.
pub struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl EncoderProcess {
    /// Spawn the encoder command.
    ///
    /// A missing binary or spawn failure is reported immediately; there is
    /// no retry for a capture attempt that cannot start.
    pub fn start(command: &EncoderCommand) -> Result<Self> {
        tracing::debug!("Spawning {:?} {:?}", command.program, command.args);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn encoder at {:?}", command.program))?;

        let stdin = child.stdin.take();

        Ok(Self { child, stdin })
    }

    /// Ask ffmpeg to stop and finalize the container
    pub async fn request_graceful_stop(&mut self) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .context("Encoder stdin already closed")?;

        stdin.write_all(b"q").await.context("Failed to write stop command")?;
        stdin.flush().await.context("Failed to flush stop command")?;
        Ok(())
    }

    /// Wait for the process to exit (used to detect unexpected exits)
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Wait up to `timeout` for the process to exit
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!("Failed to wait on encoder: {}", e);
                None
            }
            Err(_) => None,
        }
    }

    /// Hard-kill the process and reap it
    pub async fn force_stop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::warn!("Failed to kill encoder: {}", e);
        }
        let _ = self.child.wait().await;
    }
}

/// Check whether a file is a structurally complete MP4 container.
///
/// Walks the top-level box headers and requires the boxes to cover the file
/// exactly and a `moov` box to be present. A recording killed mid-write has
/// no finalized `moov` and fails this check.
pub fn probe_container(path: &Path) -> bool {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(_) => return false,
    };

    if data.is_empty() {
        return false;
    }

    let mut offset: usize = 0;
    let mut has_moov = false;

    while offset + 8 <= data.len() {
        let size32 = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as u64;
        let kind = &data[offset + 4..offset + 8];

        let (size, header_len) = match size32 {
            // Box extends to end of file
            0 => ((data.len() - offset) as u64, 8),
            // 64-bit size in the following 8 bytes
            1 => {
                if offset + 16 > data.len() {
                    return false;
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&data[offset + 8..offset + 16]);
                (u64::from_be_bytes(bytes), 16)
            }
            size => (size, 8),
        };

        if size < header_len {
            return false;
        }

        if kind == b"moov" {
            has_moov = true;
        }

        // A box claiming more bytes than the file holds is a truncated
        // container; this also keeps `offset` within the file length.
        offset = match offset.checked_add(size as usize) {
            Some(next) if next <= data.len() => next,
            _ => return false,
        };
    }

    offset == data.len() && has_moov
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    fn write_temp(data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_probe_accepts_finalized_container() {
        let mut data = Vec::new();
        data.extend(mp4_box(b"ftyp", b"isom"));
        data.extend(mp4_box(b"mdat", &[0u8; 32]));
        data.extend(mp4_box(b"moov", &[0u8; 16]));

        let file = write_temp(&data);
        assert!(probe_container(file.path()));
    }

    #[test]
    fn test_probe_accepts_64bit_box_size() {
        let mut data = Vec::new();
        data.extend(mp4_box(b"ftyp", b"isom"));
        // mdat with the 64-bit largesize form
        let payload = [0u8; 24];
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&((payload.len() + 16) as u64).to_be_bytes());
        data.extend_from_slice(&payload);
        data.extend(mp4_box(b"moov", &[0u8; 16]));

        let file = write_temp(&data);
        assert!(probe_container(file.path()));
    }

    #[test]
    fn test_probe_rejects_empty_file() {
        let file = write_temp(&[]);
        assert!(!probe_container(file.path()));
    }

    #[test]
    fn test_probe_rejects_missing_moov() {
        let mut data = Vec::new();
        data.extend(mp4_box(b"ftyp", b"isom"));
        data.extend(mp4_box(b"mdat", &[0u8; 32]));

        let file = write_temp(&data);
        assert!(!probe_container(file.path()));
    }

    #[test]
    fn test_probe_rejects_truncated_container() {
        let mut data = Vec::new();
        data.extend(mp4_box(b"ftyp", b"isom"));
        data.extend(mp4_box(b"moov", &[0u8; 16]));
        // Box header claims more bytes than the file holds
        data.extend_from_slice(&64u32.to_be_bytes());
        data.extend_from_slice(b"mdat");

        let file = write_temp(&data);
        assert!(!probe_container(file.path()));
    }

    #[test]
    fn test_probe_rejects_overflowing_box_size() {
        // 64-bit largesize near u64::MAX must read as invalid, not panic
        let mut data = Vec::new();
        data.extend(mp4_box(b"ftyp", b"isom"));
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&(u64::MAX - 7).to_be_bytes());

        let file = write_temp(&data);
        assert!(!probe_container(file.path()));
    }

    #[test]
    fn test_probe_rejects_garbage() {
        let file = write_temp(b"not an mp4 file at all, sorry");
        assert!(!probe_container(file.path()));
    }

    #[test]
    fn test_capture_args_shape() {
        let args = capture_args(Path::new("/tmp/out.mp4"), 30);
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"ultrafast".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");

        #[cfg(target_os = "linux")]
        assert!(args.contains(&"x11grab".to_string()));
    }
}
