use crate::messages::CaptureArtifact;
use std::time::Duration;
use thiserror::Error;

/// Retries after the initial attempt, for transient and server errors
const MAX_RETRIES: u32 = 3;

/// Bound on a single request; a stalled server classifies as transient
/// instead of pending forever
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadErrorKind {
    /// Network hiccup or server error; retried with backoff
    Transient,
    /// Rejection that retrying cannot fix (4xx, bad file, bad response)
    Permanent,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct UploadError {
    pub kind: UploadErrorKind,
    pub message: String,
}

impl UploadError {
    fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: UploadErrorKind::Transient,
            message: message.into(),
        }
    }

    fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: UploadErrorKind::Permanent,
            message: message.into(),
        }
    }
}

/// Uploads artifacts to the share endpoint as multipart form data.
///
/// Every failure comes back as a classified `UploadError`; nothing
/// propagates past this boundary.
pub struct Uploader {
    client: reqwest::Client,
    upload_url: String,
    max_file_size_bytes: u64,
    retry_base_delay: Duration,
}

impl Uploader {
    pub fn new(upload_url: String, max_file_size_bytes: u64) -> Self {
        Self {
            client: build_client(REQUEST_TIMEOUT),
            upload_url,
            max_file_size_bytes,
            retry_base_delay: Duration::from_secs(1),
        }
    }

    /// Shorten the backoff; used by tests
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Shorten the per-request timeout; used by tests
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Upload an artifact and return the share URL.
    ///
    /// Transient failures and 5xx responses are retried up to 3 times with
    /// exponential backoff (1 s, 2 s, 4 s); 4xx responses are permanent and
    /// surface immediately.
    pub async fn upload(&self, artifact: &CaptureArtifact) -> Result<String, UploadError> {
        self.preflight(artifact)?;

        let mut attempt = 0;
        loop {
            match self.attempt(artifact).await {
                Ok(url) => return Ok(url),
                Err(e) if e.kind == UploadErrorKind::Transient && attempt < MAX_RETRIES => {
                    let delay = self.retry_base_delay * 2u32.pow(attempt);
                    tracing::warn!(
                        "Upload attempt {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reject files the server would reject, without making a request
    fn preflight(&self, artifact: &CaptureArtifact) -> Result<(), UploadError> {
        let size = std::fs::metadata(&artifact.path)
            .map(|m| m.len())
            .map_err(|_| {
                UploadError::permanent(format!("File not found: {:?}", artifact.path))
            })?;

        if size == 0 {
            return Err(UploadError::permanent("File is empty"));
        }

        if size > self.max_file_size_bytes {
            return Err(UploadError::permanent(format!(
                "File too large: {:.1} MB exceeds {} MB limit",
                size as f64 / (1024.0 * 1024.0),
                self.max_file_size_bytes / (1024 * 1024),
            )));
        }

        Ok(())
    }

    async fn attempt(&self, artifact: &CaptureArtifact) -> Result<String, UploadError> {
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| UploadError::permanent(format!("Failed to read file: {}", e)))?;

        let file_name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UploadError::transient("Upload timed out")
                } else if e.is_connect() {
                    UploadError::transient("Connection failed - is the network available?")
                } else {
                    UploadError::transient(format!("Upload failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(UploadError::transient(format!("Server error ({})", status)));
        }
        if !status.is_success() {
            return Err(UploadError::permanent(format!(
                "Server rejected upload ({})",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| UploadError::transient(format!("Failed to read response: {}", e)))?;

        parse_share_url(&body)
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Failed to build HTTP client with timeout: {}", e);
            reqwest::Client::new()
        }
    }
}

/// Extract the share URL from the response body.
///
/// Tolerates the JSON envelope the endpoint documents
/// (`{"status":"success","url":...}`), a bare `{"url":...}` object, and a
/// plain-text URL body.
fn parse_share_url(body: &str) -> Result<String, UploadError> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(status) = value.get("status").and_then(|s| s.as_str()) {
            if status != "success" {
                let message = value
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("Unknown server error");
                return Err(UploadError::permanent(message));
            }
        }

        return value
            .get("url")
            .and_then(|u| u.as_str())
            .map(|u| u.to_string())
            .ok_or_else(|| UploadError::permanent("Response contained no URL"));
    }

    let trimmed = body.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(trimmed.to_string());
    }

    Err(UploadError::permanent("Unrecognized response from server"))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::messages::ArtifactKind;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn artifact(file: &tempfile::NamedTempFile) -> CaptureArtifact {
        let byte_size = file.as_file().metadata().unwrap().len();
        CaptureArtifact {
            path: file.path().to_path_buf(),
            kind: ArtifactKind::Screenshot,
            byte_size,
        }
    }

    fn small_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"fake png bytes").unwrap();
        file.flush().unwrap();
        file
    }

    /// Serve one canned response per expected connection, then stop
    pub async fn spawn_server(responses: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let task_hits = hits.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                task_hits.fetch_add(1, Ordering::SeqCst);
                read_request(&mut sock).await;

                let reason = match status {
                    200 => "OK",
                    404 => "Not Found",
                    500 => "Internal Server Error",
                    _ => "Unknown",
                };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });

        (format!("http://{}/", addr), hits)
    }

    /// Accept connections and read each request, but never respond
    async fn spawn_stalling_server() -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let task_hits = hits.clone();

        tokio::spawn(async move {
            let mut open = Vec::new();
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                task_hits.fetch_add(1, Ordering::SeqCst);
                read_request(&mut sock).await;
                // Keep the socket open so the client sits waiting
                open.push(sock);
            }
        });

        (format!("http://{}/", addr), hits)
    }

    /// Read headers plus Content-Length bytes of body before responding
    async fn read_request(sock: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(headers_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..headers_end]);
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);

            if buf.len() >= headers_end + 4 + content_length {
                return;
            }
        }
    }

    fn test_uploader(url: String) -> Uploader {
        Uploader::new(url, 64 * 1024 * 1024).with_retry_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_upload_success_json_envelope() {
        let body = r#"{"status":"success","url":"https://s.h4ks.com/abc"}"#.to_string();
        let (url, hits) = spawn_server(vec![(200, body)]).await;
        let file = small_file();

        let result = test_uploader(url).upload(&artifact(&file)).await;
        assert_eq!(result.unwrap(), "https://s.h4ks.com/abc");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_success_plain_text_body() {
        let (url, _) = spawn_server(vec![(200, "https://s.h4ks.com/xyz\n".to_string())]).await;
        let file = small_file();

        let result = test_uploader(url).upload(&artifact(&file)).await;
        assert_eq!(result.unwrap(), "https://s.h4ks.com/xyz");
    }

    #[tokio::test]
    async fn test_upload_retries_on_server_errors() {
        // 500 twice, then success: two retries, then the URL comes through
        let (url, hits) = spawn_server(vec![
            (500, String::new()),
            (500, String::new()),
            (200, r#"{"url":"https://s.h4ks.com/abc"}"#.to_string()),
        ])
        .await;
        let file = small_file();

        let result = test_uploader(url).upload(&artifact(&file)).await;
        assert_eq!(result.unwrap(), "https://s.h4ks.com/abc");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_upload_does_not_retry_client_errors() {
        let (url, hits) = spawn_server(vec![(404, String::new())]).await;
        let file = small_file();

        let err = test_uploader(url).upload(&artifact(&file)).await.unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::Permanent);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stalled_server_times_out_and_retries() {
        // The server accepts and reads but never answers; each attempt must
        // time out as transient and be retried rather than pend forever.
        let (url, hits) = spawn_stalling_server().await;
        let file = small_file();

        let uploader = test_uploader(url).with_request_timeout(Duration::from_millis(50));
        let err = uploader.upload(&artifact(&file)).await.unwrap_err();

        assert_eq!(err.kind, UploadErrorKind::Transient);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_upload_exhausts_retries() {
        let responses = vec![(500, String::new()); 4];
        let (url, hits) = spawn_server(responses).await;
        let file = small_file();

        let err = test_uploader(url).upload(&artifact(&file)).await.unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::Transient);
        // Initial attempt plus exactly three retries
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_preflight_rejects_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let uploader = test_uploader("http://127.0.0.1:1/".to_string());

        let err = uploader.upload(&artifact(&file)).await.unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::Permanent);
        assert!(err.message.contains("empty"));
    }

    #[tokio::test]
    async fn test_preflight_rejects_oversized_file() {
        let file = small_file();
        let uploader = Uploader::new("http://127.0.0.1:1/".to_string(), 4)
            .with_retry_base_delay(Duration::from_millis(1));

        let err = uploader.upload(&artifact(&file)).await.unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::Permanent);
        assert!(err.message.contains("too large"));
    }

    #[tokio::test]
    async fn test_preflight_rejects_missing_file() {
        let uploader = test_uploader("http://127.0.0.1:1/".to_string());
        let missing = CaptureArtifact {
            path: "/nonexistent/h4kshot/shot.png".into(),
            kind: ArtifactKind::Screenshot,
            byte_size: 0,
        };

        let err = uploader.upload(&missing).await.unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::Permanent);
    }

    #[test]
    fn test_parse_share_url_error_envelope() {
        let err = parse_share_url(r#"{"status":"error","message":"quota exceeded"}"#)
            .unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::Permanent);
        assert_eq!(err.message, "quota exceeded");
    }

    #[test]
    fn test_parse_share_url_rejects_garbage() {
        assert!(parse_share_url("<html>oops</html>").is_err());
        assert!(parse_share_url(r#"{"ok":true}"#).is_err());
    }
}
