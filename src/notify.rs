use tokio::process::Command;

/// Sends one human-readable desktop notification per terminal event.
///
/// Fire-and-forget: a missing notify-send or a failed invocation is logged
/// and never affects the capture path. Every notification is mirrored to
/// the log, so disabling notifications loses nothing.
#[derive(Clone)]
pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn notify(&self, message: &str) {
        tracing::info!("{}", message);

        if !self.enabled {
            return;
        }

        let message = message.to_owned();
        tokio::spawn(async move {
            match Command::new("notify-send")
                .arg("H4KShot")
                .arg(&message)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::piped())
                .spawn()
            {
                Ok(child) => match child.wait_with_output().await {
                    Ok(output) => {
                        if !output.status.success() {
                            let stderr = String::from_utf8_lossy(&output.stderr);
                            tracing::debug!(
                                "notify-send exited with {}: {}",
                                output.status,
                                stderr.trim()
                            );
                        }
                    }
                    Err(e) => tracing::debug!("Failed to wait on notify-send: {}", e),
                },
                Err(e) => tracing::debug!("Failed to spawn notify-send: {}", e),
            }
        });
    }
}
