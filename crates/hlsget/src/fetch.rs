//! Single-transfer HTTP operations and the pieces shared with the
//! multi-transfer engine: response streaming, receive pacing, content
//! verification and filename derivation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use regex::Regex;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{HlsgetError, HlsgetResult};
use crate::meter::{ProgressMeter, TransferProgress};

pub const DEFAULT_USER_AGENT: &str = "hlsget/0.6";

/// Per-transfer receive cap, bytes per second.
pub(crate) const MAX_RECEIVE_RATE: u64 = 1024 * 1024;

/// Bodies at most this size are suspicious and get scanned for known
/// failure pages before the transfer counts as succeeded.
const SUSPICIOUS_SIZE: u64 = 1024;

static FILENAME_FROM_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*/([-\w]+(\.\w+)?)$").unwrap());

/// A unit of work for the engine: where to store the response body of
/// which url.
#[derive(Debug, Clone)]
pub struct PathUrl {
    pub path: PathBuf,
    pub url: String,
}

/// A failed transfer. `url` and `filename` stay empty for errors that
/// concern the whole engine rather than one transfer.
#[derive(Debug, Clone)]
pub struct TransferError {
    pub message: String,
    pub url: String,
    pub filename: String,
}

impl TransferError {
    pub fn new(message: impl Into<String>, url: impl Into<String>, path: &Path) -> Self {
        Self {
            message: message.into(),
            url: url.into(),
            filename: path.display().to_string(),
        }
    }

    pub fn global(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            url: String::new(),
            filename: String::new(),
        }
    }
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.filename.is_empty() {
            write!(f, "Error: {}!", self.message)
        } else {
            write!(f, "Error: {} while downloading {}!", self.message, self.filename)
        }
    }
}

/// Outcome of a whole engine run. `succeeded` is in completion order,
/// not submission order.
#[derive(Debug, Default)]
pub struct FetchResults {
    pub succeeded: Vec<PathBuf>,
    pub errors: Vec<TransferError>,
}

/// HTTP download driver. One instance owns one connection pool; the
/// multi-transfer engine in [`fetch_many`](Downloader::fetch_many)
/// shares it across up to five concurrent transfers.
pub struct Downloader {
    pub(crate) client: Client,
    pub(crate) verbose: bool,
    pub(crate) progress: bool,
    user_agent: String,
}

impl Downloader {
    pub fn new() -> Self {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Self {
        assert!(!user_agent.is_empty(), "user agent must not be empty");

        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .expect("constructing the HTTP client cannot fail");

        Self {
            client,
            verbose: false,
            progress: false,
            user_agent: user_agent.to_string(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Enable progress output for single transfers; the engine always
    /// keeps its meter records, this flag decides whether they are
    /// rendered.
    pub fn set_progress(&mut self, progress: bool) {
        self.progress = progress;
    }

    /// Download `url` into memory.
    pub async fn fetch_to_buffer(&self, url: &str) -> HlsgetResult<Vec<u8>> {
        if self.verbose {
            println!("Try to download: {url}");
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(HlsgetError::HttpStatus(response.status()));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Download `url` to `path`, streaming the body straight to disk.
    /// The destination is opened before the request goes out; an open
    /// failure reports an error without performing any request.
    pub async fn fetch_to_file(&self, path: &Path, url: &str) -> HlsgetResult<PathBuf> {
        let mut file = File::create(path).await?;

        if self.verbose {
            println!("Try to download: {url}");
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(HlsgetError::HttpStatus(response.status()));
        }

        if self.progress {
            let meter = ProgressMeter::new();
            meter.set_number_of_downloads(1);
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| url.to_string());
            let record = meter.add(0, &name);

            stream_to_file(response, &mut file, Some(&record), Some(&meter), None).await?;
            meter.finish(0);
            meter.render();
        } else {
            stream_to_file(response, &mut file, None, None, None).await?;
        }

        Ok(path.to_path_buf())
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Append the response body to `file` chunk by chunk, reporting to the
/// progress record, re-rendering the given meter and pacing the
/// receive rate when asked to.
pub(crate) async fn stream_to_file(
    response: reqwest::Response,
    file: &mut File,
    progress: Option<&TransferProgress>,
    meter: Option<&ProgressMeter>,
    mut pacer: Option<&mut ReceivePacer>,
) -> HlsgetResult<()> {
    let total = response.content_length().unwrap_or(0);
    let mut transferred = 0u64;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;

        transferred += chunk.len() as u64;
        if let Some(progress) = progress {
            progress.update(total, transferred);
        }
        if let Some(meter) = meter {
            // the meter throttles itself to one repaint per second
            meter.render();
        }
        if let Some(pacer) = pacer.as_deref_mut() {
            pacer.pace(chunk.len() as u64).await;
        }
    }

    file.flush().await?;
    Ok(())
}

/// Keeps one transfer below a byte-per-second limit by sleeping off the
/// excess of each one-second window.
pub(crate) struct ReceivePacer {
    limit: u64,
    window_start: Instant,
    bytes_in_window: u64,
}

impl ReceivePacer {
    pub(crate) fn new(limit: u64) -> Self {
        Self {
            limit,
            window_start: Instant::now(),
            bytes_in_window: 0,
        }
    }

    pub(crate) async fn pace(&mut self, bytes: u64) {
        if self.window_start.elapsed() >= Duration::from_secs(1) {
            self.window_start = Instant::now();
            self.bytes_in_window = 0;
        }

        self.bytes_in_window += bytes;
        if self.bytes_in_window > self.limit {
            let excess = self.bytes_in_window - self.limit;
            tokio::time::sleep(Duration::from_secs_f64(excess as f64 / self.limit as f64)).await;
        }
    }
}

/// Check a completed transfer for the common failure bodies some CDNs
/// serve with status 200: anything at most 1 KiB is scanned for a rate
/// limit marker or an HTML error title.
pub(crate) async fn verify_file(path: &Path, url: &str) -> Result<(), TransferError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|err| TransferError::new(err.to_string(), url, path))?;

    if metadata.len() > SUSPICIOUS_SIZE {
        return Ok(());
    }

    let contents = tokio::fs::read(path)
        .await
        .map_err(|err| TransferError::new(err.to_string(), url, path))?;
    let contents = String::from_utf8_lossy(&contents);

    for line in contents.lines() {
        if line.contains("error code: 1015") {
            return Err(TransferError::new("rate limit exceeded", url, path));
        }
        if let Some(title) = extract_title(line) {
            return Err(TransferError::new(title, url, path));
        }
    }

    Err(TransferError::new("unknown error", url, path))
}

fn extract_title(line: &str) -> Option<&str> {
    let start = line.find("<title>")? + "<title>".len();
    let end = line[start..].find("</title>")? + start;
    Some(&line[start..end])
}

/// The last path segment of `url`, or an empty string when the url has
/// none (or cannot be parsed at all).
pub fn derive_filename_from_url(url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return String::new();
    };

    FILENAME_FROM_PATH
        .captures(parsed.path())
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_the_last_path_segment() {
        assert_eq!(derive_filename_from_url("https://h/a/b/c.ext?q=1"), "c.ext");
        assert_eq!(derive_filename_from_url("https://h/a/b/c.ext"), "c.ext");
        assert_eq!(derive_filename_from_url("https://h/segment-01.ts"), "segment-01.ts");
        assert_eq!(derive_filename_from_url("https://h/"), "");
        assert_eq!(derive_filename_from_url("not a url"), "");
    }

    #[test]
    fn title_extraction_is_case_sensitive() {
        assert_eq!(extract_title("<html><title>Access denied</title></html>"), Some("Access denied"));
        assert_eq!(extract_title("<TITLE>Access denied</TITLE>"), None);
        assert_eq!(extract_title("no title here"), None);
        assert_eq!(extract_title("<title>unterminated"), None);
    }

    #[test]
    fn transfer_errors_render_with_and_without_filename() {
        let with_file = TransferError::new("timeout", "https://h/a.ts", Path::new("a.ts"));
        assert_eq!(with_file.to_string(), "Error: timeout while downloading a.ts!");

        let global = TransferError::global("driver failed");
        assert_eq!(global.to_string(), "Error: driver failed!");
    }

    #[test]
    #[should_panic(expected = "user agent must not be empty")]
    fn empty_user_agent_is_rejected() {
        let _ = Downloader::with_user_agent("");
    }

    #[test]
    fn default_user_agent_is_set() {
        let downloader = Downloader::new();
        assert_eq!(downloader.user_agent(), DEFAULT_USER_AGENT);
    }
}
