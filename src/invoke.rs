//! Runs the scraper program for one code and finds what it produced.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use tokio::process::Command;
use tracing::instrument;

use crate::artifact::{clear_downloads, locate_artifact};
use crate::error::JobError;
use crate::settings::Settings;

pub const ENV_PORTAL_HOST: &str = "PORTAL_HOST";
pub const ENV_PORTAL_NAME: &str = "PORTAL_NAME";
pub const ENV_PORTAL_USER: &str = "PORTAL_USER";
pub const ENV_PORTAL_PASS: &str = "PORTAL_PASS";
pub const ENV_DOWNLOADS_DIR: &str = "DOWNLOADS_DIR";
pub const ENV_LOGS_DIR: &str = "LOGS_DIR";

#[derive(Debug, Clone)]
pub struct ScraperInvoker {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    downloads_dir: PathBuf,
    logs_dir: PathBuf,
}

impl ScraperInvoker {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        timeout: Duration,
        downloads_dir: PathBuf,
        logs_dir: PathBuf,
    ) -> Self {
        Self {
            program,
            args,
            timeout,
            downloads_dir,
            logs_dir,
        }
    }

    /// Spawns the scraper with `code` as its last argument and the portal
    /// coordinates in its environment, waits for it (bounded by the
    /// configured ceiling) and returns the PDF it left behind.
    ///
    /// The downloads directory is emptied first, so a PDF left by an earlier
    /// run is never mistaken for this one. The artifact is searched for even
    /// when the scraper exits non-zero.
    #[instrument(skip(self, settings), fields(program = %self.program.display()))]
    pub async fn run(&self, code: &str, settings: &Settings) -> Result<PathBuf, JobError> {
        clear_downloads(&self.downloads_dir).map_err(|source| JobError::Downloads {
            path: self.downloads_dir.clone(),
            source,
        })?;
        let started = SystemTime::now();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(code)
            .env(ENV_DOWNLOADS_DIR, &self.downloads_dir)
            .env(ENV_LOGS_DIR, &self.logs_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let portal_vars = [
            (ENV_PORTAL_HOST, &settings.portal_host),
            (ENV_PORTAL_NAME, &settings.portal_name),
            (ENV_PORTAL_USER, &settings.portal_user),
            (ENV_PORTAL_PASS, &settings.portal_pass),
        ];
        for (key, value) in portal_vars {
            if let Some(value) = value {
                command.env(key, value);
            }
        }

        let child = command.spawn().map_err(|source| JobError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        tracing::info!(code, "Scraper started");
        // dropping the child on timeout kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|source| JobError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                tracing::error!(code, timeout = ?self.timeout, "Scraper exceeded its time limit, killed");
                return Err(JobError::TimedOut(self.timeout));
            }
        };

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::info!(target: "portal_scraper", "{}", line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::warn!(target: "portal_scraper", "{}", line);
        }

        if output.status.success() {
            tracing::info!(code, elapsed = ?started.elapsed().unwrap_or_default(), "Scraper finished");
        } else {
            tracing::warn!(code, status = %output.status, "Scraper exited with failure");
        }

        match locate_artifact(&self.downloads_dir, code, started) {
            Ok(Some(path)) => Ok(path),
            Ok(None) => Err(JobError::ArtifactNotFound {
                code: code.to_string(),
            }),
            Err(source) => Err(JobError::Downloads {
                path: self.downloads_dir.clone(),
                source,
            }),
        }
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Invoker running `sh -c <script>`; the code arrives as `$1`.
    pub(crate) fn shell_invoker(script: &str, downloads: &TempDir, timeout: Duration) -> ScraperInvoker {
        ScraperInvoker::new(
            PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), script.to_string(), "portal-scraper".to_string()],
            timeout,
            downloads.path().to_path_buf(),
            downloads.path().join("logs"),
        )
    }

    fn settings() -> Settings {
        Settings {
            portal_host: Some("10.48.69.146".to_string()),
            portal_user: Some("4711".to_string()),
            portal_pass: Some("s3cret".to_string()),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_returns_named_pdf_and_passes_env() {
        let downloads = TempDir::new().unwrap();
        let invoker = shell_invoker(
            r#"printf '%s@%s' "$PORTAL_USER" "$PORTAL_HOST" > "$DOWNLOADS_DIR/$1.pdf""#,
            &downloads,
            Duration::from_secs(10),
        );

        let path = invoker.run("12345", &settings()).await.unwrap();
        assert_eq!(path, downloads.path().join("12345.pdf"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "4711@10.48.69.146");
    }

    #[tokio::test]
    async fn test_no_pdf_is_artifact_not_found() {
        let downloads = TempDir::new().unwrap();
        let invoker = shell_invoker("exit 0", &downloads, Duration::from_secs(10));

        let err = invoker.run("12345", &settings()).await.unwrap_err();
        assert!(matches!(err, JobError::ArtifactNotFound { code } if code == "12345"));
    }

    #[tokio::test]
    async fn test_failed_exit_still_searches_downloads() {
        let downloads = TempDir::new().unwrap();
        let invoker = shell_invoker(
            r#"echo partial > "$DOWNLOADS_DIR/export.pdf"; exit 3"#,
            &downloads,
            Duration::from_secs(10),
        );

        let path = invoker.run("999", &settings()).await.unwrap();
        assert_eq!(path, downloads.path().join("export.pdf"));
    }

    #[tokio::test]
    async fn test_early_exit_does_not_return_previous_pdf() {
        let downloads = TempDir::new().unwrap();
        let previous = downloads.path().join("12345.pdf");
        let file = std::fs::File::create(&previous).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(24 * 3600))
            .unwrap();
        drop(file);
        let invoker = shell_invoker(
            "echo 'PORTAL_USER is required' >&2; exit 1",
            &downloads,
            Duration::from_secs(10),
        );

        let err = invoker.run("12345", &settings()).await.unwrap_err();
        assert!(matches!(err, JobError::ArtifactNotFound { code } if code == "12345"));
        assert!(!previous.exists());
    }

    #[tokio::test]
    async fn test_hung_scraper_is_timed_out() {
        let downloads = TempDir::new().unwrap();
        let invoker = shell_invoker("sleep 5", &downloads, Duration::from_millis(100));

        let err = invoker.run("12345", &settings()).await.unwrap_err();
        assert!(matches!(err, JobError::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let downloads = TempDir::new().unwrap();
        let invoker = ScraperInvoker::new(
            PathBuf::from("/nonexistent/portal-scraper"),
            Vec::new(),
            Duration::from_secs(1),
            downloads.path().to_path_buf(),
            downloads.path().join("logs"),
        );

        let err = invoker.run("12345", &settings()).await.unwrap_err();
        assert!(matches!(err, JobError::Spawn { .. }));
    }
}
