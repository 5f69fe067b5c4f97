//! Utility functions for log formatting, `data:` URLs and output directories.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation for logging scraped content
//! - Building and decoding `text/html` data URLs for rendered views
//! - File system validation for the views directory

use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

const HTML_DATA_URL_PREFIX: &str = "data:text/html;charset=UTF-8,";

/// Truncate a string for logging purposes.
///
/// Long strings are cut after `max` characters with an ellipsis and a count
/// of the dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Wrap an HTML document into a `data:` URL a tab can be opened at.
pub fn data_url_for(html: &str) -> String {
    format!("{}{}", HTML_DATA_URL_PREFIX, urlencoding::encode(html))
}

/// Decode the body of a `data:` URL. Returns `None` for anything that is not
/// a data URL or whose payload is not valid percent-encoded UTF-8.
///
/// Base64 payloads are not supported.
pub fn decode_data_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    if meta.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return None;
    }
    urlencoding::decode(payload).ok().map(|body| body.into_owned())
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
