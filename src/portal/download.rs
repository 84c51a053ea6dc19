//! Download directory handling: clear, poll for the export, rename it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::artifact;
use crate::error::ScrapeError;

const PARTIAL_SUFFIX: &str = ".crdownload";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    Finished(PathBuf),
    /// Chrome is still writing; the path is the marker file.
    Partial(PathBuf),
}

fn io_error(dir: &Path) -> impl FnOnce(io::Error) -> ScrapeError + '_ {
    move |source| ScrapeError::Io {
        path: dir.to_path_buf(),
        source,
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase().ends_with(suffix))
        .unwrap_or(false)
}

/// Empties `dir` before a run, creating it if needed.
pub fn clear_downloads(dir: &Path) -> Result<usize, ScrapeError> {
    artifact::clear_downloads(dir).map_err(io_error(dir))
}

/// A finished PDF wins over an in-progress marker.
pub fn scan(dir: &Path) -> io::Result<Option<Download>> {
    let mut partial = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if has_suffix(&path, ".pdf") {
            return Ok(Some(Download::Finished(path)));
        }
        if partial.is_none() && has_suffix(&path, PARTIAL_SUFFIX) {
            partial = Some(Download::Partial(path));
        }
    }
    Ok(partial)
}

/// Polls `dir` every `poll` until a PDF or a partial marker shows up.
pub async fn wait_for_download(dir: &Path, poll: Duration, timeout: Duration) -> Result<Download, ScrapeError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = scan(dir).map_err(io_error(dir))? {
            tracing::debug!(?found, "Download detected");
            return Ok(found);
        }
        if Instant::now() >= deadline {
            return Err(ScrapeError::DownloadTimeout(timeout));
        }
        tokio::time::sleep(poll).await;
    }
}

/// Waits for a partial download to complete, then renames the PDF to
/// `<code>.pdf` in the same directory.
pub async fn finalize(
    dir: &Path,
    code: &str,
    download: Download,
    poll: Duration,
    timeout: Duration,
) -> Result<PathBuf, ScrapeError> {
    let finished = match download {
        Download::Finished(path) => path,
        Download::Partial(marker) => {
            tracing::info!(marker = %marker.display(), "Download in progress, waiting for it to finish");
            let deadline = Instant::now() + timeout;
            loop {
                if let Some(Download::Finished(path)) = scan(dir).map_err(io_error(dir))? {
                    break path;
                }
                if Instant::now() >= deadline {
                    return Err(ScrapeError::DownloadTimeout(timeout));
                }
                tokio::time::sleep(poll).await;
            }
        }
    };

    let target = dir.join(format!("{code}.pdf"));
    if finished == target {
        return Ok(target);
    }
    match fs::rename(&finished, &target) {
        Ok(()) => Ok(target),
        Err(e) => {
            tracing::warn!(from = %finished.display(), error = %e, "Could not rename PDF, keeping original name");
            Ok(finished)
        }
    }
}
