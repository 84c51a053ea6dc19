//! Finds the PDF a scraper run left in the downloads directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Files modified this long before the run started still count as fresh.
pub const CLOCK_SLACK: Duration = Duration::from_secs(5);

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("pdf"))
}

fn modified(path: &Path) -> Option<SystemTime> {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => Some(modified),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable download");
            None
        }
    }
}

/// Creates `dir` if needed and removes the files in it. Individual files
/// that cannot be removed are skipped.
pub fn clear_downloads(dir: &Path) -> io::Result<usize> {
    fs::create_dir_all(dir)?;
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not remove old download"),
        }
    }
    tracing::info!(dir = %dir.display(), removed, "Downloads directory cleared");
    Ok(removed)
}

/// Prefers `<code>.pdf`; otherwise picks the newest PDF. Either way only
/// files modified after `started` (minus [`CLOCK_SLACK`]) count. A missing
/// directory finds nothing.
pub fn locate_artifact(dir: &Path, code: &str, started: SystemTime) -> io::Result<Option<PathBuf>> {
    let threshold = started.checked_sub(CLOCK_SLACK).unwrap_or(started);

    let exact = dir.join(format!("{code}.pdf"));
    if exact.is_file() {
        match modified(&exact) {
            Some(at) if at >= threshold => return Ok(Some(exact)),
            Some(_) => tracing::warn!(path = %exact.display(), "Ignoring stale PDF from an earlier run"),
            None => {}
        }
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || !is_pdf(&path) {
            continue;
        }
        let Some(modified) = modified(&path) else { continue };
        if modified < threshold {
            continue;
        }
        if newest.as_ref().map_or(true, |(best, _)| modified > *best) {
            newest = Some((modified, path));
        }
    }

    if let Some((_, path)) = &newest {
        tracing::info!(code, path = %path.display(), "Exact PDF missing, using newest download");
    }
    Ok(newest.map(|(_, path)| path))
}
