use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;

use crate::settings::{Settings, SettingsStore};

/// Portal report bot - returns supplier stock PDFs to a chat group
#[derive(Parser, Debug)]
#[command(name = "portal-report-bot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Bootstrap configuration file (TOML)
    #[arg(short = 'c', long = "config", default_value = "config/bot.toml")]
    pub config: PathBuf,

    /// Announce maintenance once the bot is online: WHEN [MESSAGE...]
    /// (WHEN is `now`, `in 30m`, `in 2h` or `YYYY-MM-DD HH:MM`)
    #[arg(long = "announce", num_args = 1.., value_name = "WHEN")]
    pub announce: Vec<String>,

    /// Exit after the announcement is sent
    #[arg(long = "exit-after", requires = "announce")]
    pub exit_after: bool,

    /// Prompt for missing portal host and credentials before starting
    #[arg(long = "setup")]
    pub setup: bool,
}

/// A maintenance announcement requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceArgs {
    pub when: String,
    pub message: Option<String>,
    pub exit_after: bool,
}

impl Cli {
    pub fn announcement(&self) -> Option<AnnounceArgs> {
        let (when, rest) = self.announce.split_first()?;
        let message = rest.join(" ");
        Some(AnnounceArgs {
            when: when.clone(),
            message: (!message.trim().is_empty()).then_some(message),
            exit_after: self.exit_after,
        })
    }
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, label: &str) -> io::Result<String> {
    write!(output, "{label}: ")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Asks for whatever portal settings are missing and saves the answers.
/// Empty answers leave the value unset.
pub fn run_setup<R: BufRead, W: Write>(
    store: &SettingsStore,
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<Settings> {
    let mut settings = store.read()?;

    if settings.portal_host.is_none() {
        let host = prompt(input, output, "Portal host (IP or URL)")?;
        if !host.is_empty() {
            let name = prompt(input, output, "Store name (optional)")?;
            let name = (!name.is_empty()).then_some(name.as_str());
            settings = store.set_portal_host(&host, name)?;
        }
    }

    if !settings.has_credentials() {
        let user = prompt(input, output, "Portal user")?;
        let pass = prompt(input, output, "Portal password")?;
        if !user.is_empty() && !pass.is_empty() {
            settings = store.set_portal_credentials(&user, &pass)?;
        }
    }

    writeln!(
        output,
        "Portal: {} | credentials: {}",
        settings.portal_host.as_deref().unwrap_or("(not set)"),
        if settings.has_credentials() { "saved" } else { "missing" }
    )?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_announce_splits_when_and_message() {
        let cli = Cli::parse_from([
            "portal-report-bot",
            "--announce",
            "in 30m",
            "Back",
            "soon",
            "--exit-after",
        ]);
        assert_eq!(
            cli.announcement(),
            Some(AnnounceArgs {
                when: "in 30m".into(),
                message: Some("Back soon".into()),
                exit_after: true,
            })
        );
        assert_eq!(cli.config, PathBuf::from("config/bot.toml"));
    }

    #[test]
    fn test_exit_after_requires_announce() {
        assert!(Cli::try_parse_from(["portal-report-bot", "--exit-after"]).is_err());
        assert_eq!(Cli::parse_from(["portal-report-bot"]).announcement(), None);
    }

    #[test]
    fn test_setup_fills_only_missing_values() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        store.set_portal_host("10.0.0.5", None).unwrap();

        let mut input = Cursor::new("clerk\ns3cret\n");
        let mut output = Vec::new();
        let settings = run_setup(&store, &mut input, &mut output).unwrap();

        assert_eq!(settings.portal_host.as_deref(), Some("10.0.0.5"));
        assert_eq!(settings.portal_user.as_deref(), Some("clerk"));
        let shown = String::from_utf8(output).unwrap();
        assert!(!shown.contains("Portal host"));
        assert!(!shown.contains("s3cret"));
    }
}
