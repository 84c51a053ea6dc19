use anyhow::Context;
use clap::Parser;
use futures::stream::{self, StreamExt};

use portal_report_bot::logging;
use portal_report_bot::portal::env::ScraperConfig;
use portal_report_bot::portal::{parse_codes, PortalScraper};

/// Logs into the inventory portal and exports the stock PDF of each supplier
#[derive(Parser, Debug)]
#[command(name = "portal-scraper", version, about, long_about = None)]
struct Args {
    /// Supplier code, or several separated by commas
    #[arg(value_name = "CODE[,CODE...]")]
    codes: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let codes = parse_codes(&args.codes);
    if codes.is_empty() {
        anyhow::bail!("at least one supplier code is required");
    }

    let config = ScraperConfig::from_env().context("reading scraper environment")?;
    let access = config.portal_access()?;
    tracing::info!(codes = ?codes, host = %access.host, webdriver = %config.webdriver_url, "Scraper starting");
    let scraper = PortalScraper::new(config, access);

    let results: Vec<_> = stream::iter(codes)
        .then(|code| {
            let scraper = &scraper;
            async move {
                let outcome = scraper.scrape(&code).await;
                (code, outcome)
            }
        })
        .collect()
        .await;

    let failed: Vec<&str> = results
        .iter()
        .filter(|(_, outcome)| outcome.is_err())
        .map(|(code, _)| code.as_str())
        .collect();
    for (code, outcome) in &results {
        match outcome {
            Ok(path) => tracing::info!(code, path = %path.display(), "Done"),
            Err(e) => tracing::error!(code, error = %e, "Failed"),
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("{} of {} codes failed: {}", failed.len(), results.len(), failed.join(","));
    }
    tracing::info!("All codes processed");
    Ok(())
}
