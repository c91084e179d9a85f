// HTTP download for remote sources

use audiofile_core::{AudioError, Result};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_HTTP_RETRIES: u32 = 3;
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; AudioFilePlayer/0.1)";

/// Largest response body accepted (256 MiB)
pub const MAX_DOWNLOAD_BYTES: u64 = 256 * 1024 * 1024;

const CHUNK_SIZE: usize = 64 * 1024;

/// Create a configured HTTP agent with proper timeouts and settings
pub fn create_http_agent() -> ureq::Agent {
    http_agent(READ_TIMEOUT)
}

fn http_agent(read_timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(read_timeout)
        .user_agent(USER_AGENT)
        .redirects(10)
        .build()
}

/// Downloads a whole remote file into memory
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(max_retries: u32) -> Self {
        Self {
            agent: create_http_agent(),
            max_retries,
        }
    }

    /// Replace the agent with one using `timeout` for socket reads.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.agent = http_agent(timeout);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Fetch `url`, giving up early once `cancel` is set.
    pub fn fetch(&self, url: &str, cancel: &AtomicBool) -> Result<Vec<u8>> {
        log::info!("Starting download from: {}", url);
        let response = self.get_with_retry(url, cancel)?;

        let content_length = response
            .header("Content-Length")
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(len) = content_length {
            if len > MAX_DOWNLOAD_BYTES {
                return Err(AudioError::NetworkError(format!(
                    "Response too large: {} bytes",
                    len
                )));
            }
        }

        let mut reader = response.into_reader().take(MAX_DOWNLOAD_BYTES + 1);
        let mut body = Vec::with_capacity(content_length.unwrap_or(0) as usize);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(AudioError::LoadError("download cancelled".to_string()));
            }
            let read = reader
                .read(&mut chunk)
                .map_err(|e| AudioError::NetworkError(format!("Download failed: {}", e)))?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        if body.len() as u64 > MAX_DOWNLOAD_BYTES {
            return Err(AudioError::NetworkError("Response too large".to_string()));
        }
        log::info!("Download complete: {} bytes", body.len());
        Ok(body)
    }

    /// GET with exponential backoff. Client errors (4xx) are not retried.
    fn get_with_retry(&self, url: &str, cancel: &AtomicBool) -> Result<ureq::Response> {
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            match self.agent.get(url).call() {
                Ok(response) => return Ok(response),
                Err(ureq::Error::Status(code, _)) if (400..500).contains(&code) => {
                    return Err(AudioError::NetworkError(format!("HTTP {} for {}", code, url)));
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.max_retries && !cancel.load(Ordering::Relaxed) {
                        let delay = backoff_delay(attempt);
                        log::warn!(
                            "Request failed (attempt {}), retrying after {:?}: {}",
                            attempt + 1,
                            delay,
                            last_error
                        );
                        thread::sleep(delay);
                    }
                }
            }
            if cancel.load(Ordering::Relaxed) {
                break;
            }
        }

        Err(AudioError::NetworkError(format!(
            "Request failed after {} attempts: {}",
            self.max_retries + 1,
            last_error
        )))
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_RETRIES)
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(attempt.min(6)))
}

/// File extension of the URL path, ignoring query and fragment
pub fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let path = path.split("://").nth(1).unwrap_or(path);
    let last = path.rsplit('/').next()?;
    if !path.contains('/') {
        return None;
    }
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 {
        None
    } else {
        Some(ext)
    }
}
