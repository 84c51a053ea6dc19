use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use teloxide::Bot;
use tracing::instrument;

use portal_report_bot::announce::Announcer;
use portal_report_bot::chat::ChatClient;
use portal_report_bot::cli::{run_setup, AnnounceArgs, Cli};
use portal_report_bot::dashboard::{self, AppState};
use portal_report_bot::inbound::InboundRouter;
use portal_report_bot::invoke::ScraperInvoker;
use portal_report_bot::logging;
use portal_report_bot::pipeline::JobRunner;
use portal_report_bot::queue::QueueService;
use portal_report_bot::retry::{retry, RetryPolicy};
use portal_report_bot::shutdown::{spawn_destination_watchdog, Shutdown};
use portal_report_bot::telegram::{self, TelegramChat};
use portal_report_bot::{AppConfig, SettingsStore};

const CONNECT_POLICY: RetryPolicy = RetryPolicy::fixed(5, Duration::from_secs(5));
const STOP_GRACE: Duration = Duration::from_secs(10);

struct Online {
    telegram: Arc<TelegramChat>,
    store: Arc<SettingsStore>,
    announcer: Arc<Announcer>,
    queue: QueueService,
    announce: Option<AnnounceArgs>,
    watchdog_after: Duration,
    shutdown: Shutdown,
}

/// Connects the chat client, then greets the destination, arms the CLI
/// announcement and the destination watchdog, and drains anything queued.
#[instrument(skip_all)]
async fn bring_online(online: Online) {
    let Online {
        telegram,
        store,
        announcer,
        queue,
        announce,
        watchdog_after,
        shutdown,
    } = online;

    if let Err(e) = retry(CONNECT_POLICY, |_| telegram.connect()).await {
        tracing::error!(attempts = e.attempts, error = %e.last, "Chat client could not connect");
        shutdown.trigger("chat client failed to connect");
        return;
    }

    match store.read() {
        Ok(settings) => match settings.destination_chat_id {
            Some(destination) => {
                match telegram.lookup_destination(destination).await {
                    Ok(name) if settings.destination_name.as_deref() != Some(name.as_str()) => {
                        if let Err(e) = store.set_destination(destination, &name) {
                            tracing::warn!(error = %e, "Could not refresh destination name");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Saved destination is not reachable"),
                }
                let mode = if settings.auto_mode { "ACTIVE" } else { "PAUSED" };
                let greeting = format!("🤖 Bot online. Automatic mode {mode}.");
                if let Err(e) = telegram.send_text(destination, &greeting).await {
                    tracing::warn!(error = %e, "Could not send online message");
                }
            }
            None => tracing::warn!("No destination chat saved, pick one in the dashboard"),
        },
        Err(e) => tracing::error!(error = %e, "Cannot read settings"),
    }

    if let Some(args) = announce {
        match announcer
            .schedule(&args.when, args.message.as_deref(), args.exit_after)
            .await
        {
            Ok(announcement) => tracing::info!(fires_at = %announcement.fires_at, "Command line announcement accepted"),
            Err(e) => tracing::error!(error = %e, "Command line announcement rejected"),
        }
    }

    spawn_destination_watchdog(Arc::clone(&store), watchdog_after, shutdown);
    queue.drain().await;
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let app = AppConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let store = Arc::new(SettingsStore::new(&app.settings_path));
    tracing::info!(settings = %store.path().display(), dashboard = %app.http_bind, "Starting portal report bot");

    if cli.setup {
        let store = Arc::clone(&store);
        tokio::task::spawn_blocking(move || {
            let stdin = io::stdin();
            run_setup(&store, &mut stdin.lock(), &mut io::stdout())
        })
        .await??;
    }

    let shutdown = Shutdown::default();
    let telegram = Arc::new(TelegramChat::new(Bot::new(&app.telegram_token)));
    let chat: Arc<dyn ChatClient> = Arc::clone(&telegram) as Arc<dyn ChatClient>;

    let invoker = ScraperInvoker::new(
        app.scraper_program(),
        app.scraper_args.clone(),
        app.scraper_timeout(),
        app.downloads_dir.clone(),
        app.logs_dir.clone(),
    );
    let runner = JobRunner::new(
        Arc::clone(&chat),
        Arc::clone(&store),
        invoker,
        app.delivery_policy(),
        app.ready_timeout(),
    );
    let queue = QueueService::new(Arc::new(runner));
    let router = Arc::new(InboundRouter::new(
        Arc::clone(&chat),
        Arc::clone(&store),
        queue.clone(),
    ));
    let announcer = Arc::new(Announcer::new(
        Arc::clone(&chat),
        Arc::clone(&store),
        shutdown.clone(),
    ));

    shutdown.spawn_supervised("bring-online", bring_online(Online {
        telegram: Arc::clone(&telegram),
        store: Arc::clone(&store),
        announcer: Arc::clone(&announcer),
        queue: queue.clone(),
        announce: cli.announcement(),
        watchdog_after: Duration::from_secs(app.no_destination_exit_mins * 60),
        shutdown: shutdown.clone(),
    }));

    let state = AppState {
        store: Arc::clone(&store),
        queue: queue.clone(),
        chat: Arc::clone(&chat),
        announcer,
        delivery: app.delivery_policy(),
        started: Instant::now(),
    };
    let mut dashboard = {
        let bind = app.http_bind.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dashboard::serve(&bind, state, shutdown).await })
    };
    let mut dispatcher = tokio::spawn(telegram::run_dispatcher(
        Arc::clone(&telegram),
        router,
        shutdown.clone(),
    ));

    let mut failure: Option<anyhow::Error> = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => shutdown.trigger("ctrl-c"),
        _ = terminate() => shutdown.trigger("SIGTERM"),
        _ = shutdown.wait() => {}
        result = &mut dashboard => {
            failure = Some(match result {
                Ok(Ok(())) => anyhow::anyhow!("dashboard stopped unexpectedly"),
                Ok(Err(e)) => anyhow::Error::new(e).context(format!("dashboard on {}", app.http_bind)),
                Err(e) => anyhow::Error::new(e).context("dashboard task"),
            });
            shutdown.trigger("dashboard stopped");
        }
        result = &mut dispatcher => match result {
            Err(e) if e.is_panic() => shutdown.fail("dispatcher task panicked".to_string()),
            _ => shutdown.trigger("dispatcher ended"),
        },
    }

    let stopping = futures::future::join(dispatcher, dashboard);
    if tokio::time::timeout(STOP_GRACE, stopping).await.is_err() {
        tracing::warn!(grace = ?STOP_GRACE, "Components did not stop in time");
    }

    let pending = queue.snapshot();
    if pending.pending > 0 || pending.processing {
        tracing::warn!(pending = pending.pending, current = ?pending.current, "Exiting with unfinished jobs");
    }

    if let Some(e) = failure {
        return Err(e);
    }
    if let Some(reason) = shutdown.fatal() {
        anyhow::bail!("stopped after fatal error: {reason}");
    }
    if !telegram.is_ready() {
        anyhow::bail!("chat client never became ready");
    }
    tracing::info!("Shut down cleanly");
    Ok(())
}
