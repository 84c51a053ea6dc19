//! Best-effort diagnostic capture (screenshot + page source) on failure.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::webdriver::WebDriver;

fn file_stem(tag: &str) -> String {
    let tag: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}-{}", Local::now().format("%Y-%m-%dT%H-%M-%S-%3f"), tag)
}

/// Writes whatever parts of the snapshot are available. Returns the files
/// written; never fails.
pub fn write_snapshot(logs_dir: &Path, tag: &str, png: Option<&[u8]>, html: Option<&str>) -> Vec<PathBuf> {
    if let Err(e) = fs::create_dir_all(logs_dir) {
        tracing::warn!(dir = %logs_dir.display(), error = %e, "Cannot create logs directory");
        return Vec::new();
    }
    let stem = file_stem(tag);
    let mut written = Vec::new();

    let parts: [(&str, Option<&[u8]>); 2] = [("png", png), ("html", html.map(str::as_bytes))];
    for (ext, bytes) in parts {
        let Some(bytes) = bytes else { continue };
        let path = logs_dir.join(format!("{stem}.{ext}"));
        match fs::write(&path, bytes) {
            Ok(()) => written.push(path),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Snapshot write failed"),
        }
    }
    written
}

pub async fn capture(driver: &WebDriver, logs_dir: &Path, tag: &str) -> Vec<PathBuf> {
    let png = driver
        .screenshot()
        .await
        .map_err(|e| tracing::warn!(error = %e, "Screenshot failed"))
        .ok();
    let html = driver
        .page_source()
        .await
        .map_err(|e| tracing::warn!(error = %e, "Page source unavailable"))
        .ok();

    let written = write_snapshot(logs_dir, tag, png.as_deref(), html.as_deref());
    if !written.is_empty() {
        tracing::info!(files = ?written, "Diagnostic snapshot saved");
    }
    written
}
