//! Document acquisition: turn a user-supplied path or URL into validated PDF bytes.
//!
//! Remote documents are streamed to `<dir>/<name>.part` and only renamed to
//! their final name once the `%PDF` signature has been confirmed. On any
//! failure the partial file is removed, so a corrupt download never lingers
//! on disk. An existing file in the download directory is never replaced;
//! the new copy gets a `-<n>` suffix. Without a configured download
//! directory the file lives in a `TempDir` owned by the [`Document`] and
//! disappears with it.
//!
//! Some cloud-storage hosts (Google Drive in particular) answer the first
//! request for a large file with a "can't scan for viruses" page instead of
//! the payload. The confirmation token is carried either in a
//! `download_warning*` cookie or inside the HTML; the request is reissued
//! once with `confirm=<token>` appended. An HTML-labelled response that
//! already starts with `%PDF` is taken as the payload.

use crate::config::CorpusConfig;
use crate::error::CorpusError;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_TYPE, SET_COOKIE};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Leading bytes of every PDF file.
pub const PDF_SIGNATURE: &[u8] = b"%PDF";

/// A PDF loaded into memory, ready for text extraction.
#[derive(Debug)]
pub struct Document {
    /// The path or URL the document came from.
    pub source: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
    /// Whether `bytes` starts with the PDF signature.
    pub is_pdf: bool,
    /// Local copy on disk, if any.
    pub local_path: Option<PathBuf>,
    /// Keeps a temporary download directory alive for the document's lifetime.
    _temp_dir: Option<TempDir>,
}

impl Document {
    /// Wrap bytes that are already in memory.
    pub fn from_bytes(source: impl Into<String>, bytes: Vec<u8>) -> Self {
        let is_pdf = has_pdf_signature(&bytes);
        Self {
            source: source.into(),
            bytes,
            is_pdf,
            local_path: None,
            _temp_dir: None,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Whether `bytes` begins with `%PDF`.
pub fn has_pdf_signature(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_SIGNATURE)
}

/// Acquire and validate the document named by `source`.
pub async fn acquire(source: &str, config: &CorpusConfig) -> Result<Document, CorpusError> {
    if is_url(source) {
        download(source, config).await
    } else {
        load_local(source).await
    }
}

/// Read a local file, validating existence and PDF magic bytes.
///
/// A local file that is not a PDF is reported but never deleted.
async fn load_local(path_str: &str) -> Result<Document, CorpusError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(CorpusError::NotFound {
            source_ref: path_str.to_string(),
        });
    }

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(CorpusError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(CorpusError::NotFound {
                source_ref: path_str.to_string(),
            });
        }
    };

    if !has_pdf_signature(&bytes) {
        return Err(CorpusError::InvalidFormat {
            source_ref: path_str.to_string(),
            magic: leading_bytes(&bytes),
        });
    }

    debug!("Loaded local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(Document {
        source: path_str.to_string(),
        bytes,
        is_pdf: true,
        local_path: Some(path),
        _temp_dir: None,
    })
}

/// Download a URL, handling the large-file interstitial, and validate it.
async fn download(url: &str, config: &CorpusConfig) -> Result<Document, CorpusError> {
    let fetch_url = drive_download_url(url).unwrap_or_else(|| url.to_string());
    info!("Downloading PDF from: {}", fetch_url);

    let timeout_secs = config.download_timeout_secs;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| network_error(url, e.to_string()))?;

    let response = fetch(&client, &fetch_url, timeout_secs).await?;

    let body = if let Some(token) = confirm_token_from_cookies(response.headers()) {
        debug!("Large-file interstitial (cookie); retrying with confirmation token");
        Body::Streaming(fetch(&client, &with_confirm_token(&fetch_url, &token), timeout_secs).await?)
    } else if is_html(response.headers()) {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, e, timeout_secs))?;
        if has_pdf_signature(&bytes) {
            debug!("Server labelled a PDF as HTML; keeping the payload");
            Body::Buffered(bytes.to_vec())
        } else {
            match confirm_token_from_body(&String::from_utf8_lossy(&bytes)) {
                Some(token) => {
                    debug!("Large-file interstitial (page); retrying with confirmation token");
                    Body::Streaming(
                        fetch(&client, &with_confirm_token(&fetch_url, &token), timeout_secs).await?,
                    )
                }
                None => {
                    return Err(CorpusError::InvalidFormat {
                        source_ref: url.to_string(),
                        magic: leading_bytes(&bytes),
                    });
                }
            }
        }
    } else {
        Body::Streaming(response)
    };

    let (dir, temp_dir) = match &config.download_dir {
        Some(d) => {
            tokio::fs::create_dir_all(d).await.map_err(|e| {
                CorpusError::Internal(format!("cannot create {}: {e}", d.display()))
            })?;
            (d.clone(), None)
        }
        None => {
            let t = TempDir::new().map_err(|e| CorpusError::Internal(e.to_string()))?;
            (t.path().to_path_buf(), Some(t))
        }
    };

    let final_path = unused_path(&dir, &file_name_for(&fetch_url)).await;
    let part_path = final_path.with_file_name(format!(
        "{}.part",
        final_path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    ));

    let bytes = match write_body(body, &part_path, url, timeout_secs).await {
        Ok(b) => b,
        Err(e) => {
            remove_partial(&part_path).await;
            return Err(e);
        }
    };

    finish_download(url, &part_path, &final_path, &bytes).await?;
    info!("Downloaded {} bytes to: {}", bytes.len(), final_path.display());

    Ok(Document {
        source: url.to_string(),
        bytes,
        is_pdf: true,
        local_path: Some(final_path),
        _temp_dir: temp_dir,
    })
}

async fn fetch(
    client: &reqwest::Client,
    url: &str,
    timeout_secs: u64,
) -> Result<reqwest::Response, CorpusError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(url, e, timeout_secs))?;

    match response.status() {
        s if s.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(CorpusError::NotFound {
            source_ref: url.to_string(),
        }),
        s => Err(network_error(url, format!("HTTP {s}"))),
    }
}

/// Response payload, either still on the wire or already read while
/// looking for an interstitial token.
enum Body {
    Streaming(reqwest::Response),
    Buffered(Vec<u8>),
}

/// Write the body to `part_path`, returning the bytes written.
async fn write_body(
    body: Body,
    part_path: &Path,
    url: &str,
    timeout_secs: u64,
) -> Result<Vec<u8>, CorpusError> {
    let mut file = tokio::fs::File::create(part_path)
        .await
        .map_err(|e| CorpusError::Internal(format!("cannot create {}: {e}", part_path.display())))?;
    let write_err =
        |e: std::io::Error| CorpusError::Internal(format!("write {}: {e}", part_path.display()));

    let bytes = match body {
        Body::Buffered(bytes) => {
            file.write_all(&bytes).await.map_err(write_err)?;
            bytes
        }
        Body::Streaming(response) => {
            let mut bytes = Vec::new();
            let mut stream = response.bytes_stream();
            while let Some(piece) = stream.next().await {
                let piece = piece.map_err(|e| transport_error(url, e, timeout_secs))?;
                file.write_all(&piece).await.map_err(write_err)?;
                bytes.extend_from_slice(&piece);
            }
            bytes
        }
    };
    file.flush().await.map_err(write_err)?;

    Ok(bytes)
}

/// `dir/name`, or `dir/<stem>-<n>.<ext>` when that is already taken.
async fn unused_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (name, String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{stem}-{n}{ext}"));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

/// Validate the signature of a completed download and move it into place.
///
/// On mismatch the partial file is deleted before the error is returned.
async fn finish_download(
    url: &str,
    part_path: &Path,
    final_path: &Path,
    bytes: &[u8],
) -> Result<(), CorpusError> {
    if !has_pdf_signature(bytes) {
        warn!("Download from {} is not a PDF; removing partial file", url);
        remove_partial(part_path).await;
        return Err(CorpusError::InvalidFormat {
            source_ref: url.to_string(),
            magic: leading_bytes(bytes),
        });
    }

    if let Err(e) = tokio::fs::rename(part_path, final_path).await {
        remove_partial(part_path).await;
        return Err(CorpusError::Internal(format!(
            "cannot move download into {}: {e}",
            final_path.display()
        )));
    }
    Ok(())
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial download {}: {}", path.display(), e);
        }
    }
}

// ── URL helpers ──────────────────────────────────────────────────────────

static RE_DRIVE_FILE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/file/d/([0-9A-Za-z_\-]+)").unwrap());
static RE_QUERY_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]id=([0-9A-Za-z_\-]+)").unwrap());
static RE_CONFIRM_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&;]confirm=([0-9A-Za-z_\-]+)").unwrap());
static RE_CONFIRM_INPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"name="confirm"\s+value="([0-9A-Za-z_\-]+)""#).unwrap());

/// Rewrite a Google Drive share link to its direct-download endpoint.
///
/// Returns `None` for URLs on other hosts or without a recognisable file id.
pub fn drive_download_url(url: &str) -> Option<String> {
    if !url.contains("drive.google.com") {
        return None;
    }
    let id = RE_DRIVE_FILE_ID
        .captures(url)
        .or_else(|| RE_QUERY_ID.captures(url))
        .map(|c| c[1].to_string())?;
    Some(format!(
        "https://drive.google.com/uc?id={id}&export=download"
    ))
}

/// Find a `download_warning*` cookie and return its value.
pub fn confirm_token_from_cookies(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim().starts_with("download_warning"))
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Find a confirmation token embedded in an interstitial HTML page.
pub fn confirm_token_from_body(body: &str) -> Option<String> {
    RE_CONFIRM_PARAM
        .captures(body)
        .or_else(|| RE_CONFIRM_INPUT.captures(body))
        .map(|c| c[1].to_string())
}

/// Append `confirm=<token>` to a URL.
pub fn with_confirm_token(url: &str, token: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}confirm={token}")
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
}

/// Pick a file name from the URL path, falling back to `downloaded.pdf`.
fn file_name_for(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

fn leading_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().take(8).copied().collect()
}

fn network_error(url: &str, reason: String) -> CorpusError {
    CorpusError::NetworkError {
        url: url.to_string(),
        reason,
    }
}

fn transport_error(url: &str, e: reqwest::Error, timeout_secs: u64) -> CorpusError {
    if e.is_timeout() {
        network_error(url, format!("timed out after {timeout_secs}s"))
    } else {
        network_error(url, e.to_string())
    }
}
