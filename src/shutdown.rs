use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::settings::SettingsStore;

/// Process-wide request to shut down in an orderly way.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    fatal: Arc<OnceLock<String>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            fatal: Arc::new(OnceLock::new()),
        }
    }
}

impl Shutdown {
    pub fn trigger(&self, reason: &str) {
        if !self.tx.send_replace(true) {
            tracing::info!(reason, "Shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Shuts down and marks the exit as a failure. The first reason wins.
    pub fn fail(&self, reason: String) {
        tracing::error!(reason = %reason, "Fatal error");
        let _ = self.fatal.set(reason);
        self.trigger("fatal error");
    }

    pub fn fatal(&self) -> Option<&str> {
        self.fatal.get().map(String::as_str)
    }

    /// Spawns a background task whose panic takes the whole process down
    /// through [`fail`](Self::fail). The returned handle completes once the
    /// task has ended either way.
    pub fn spawn_supervised<F>(&self, task: &'static str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = tokio::spawn(future);
        let shutdown = self.clone();
        tokio::spawn(async move {
            match inner.await {
                Ok(()) => {}
                Err(e) if e.is_panic() => shutdown.fail(format!("{task} task panicked")),
                Err(e) => tracing::debug!(task, error = %e, "Task cancelled"),
            }
        })
    }
}

/// Requests shutdown if no destination has been saved once `after` has
/// elapsed. A zero duration disables the check.
pub fn spawn_destination_watchdog(
    store: Arc<SettingsStore>,
    after: Duration,
    shutdown: Shutdown,
) -> Option<JoinHandle<()>> {
    if after.is_zero() {
        return None;
    }
    let watchdog = shutdown.clone();
    Some(watchdog.spawn_supervised("destination watchdog", async move {
        tokio::time::sleep(after).await;
        match store.read() {
            Ok(settings) if settings.destination_chat_id.is_none() => {
                tracing::warn!(after = ?after, "Still no destination chat saved");
                shutdown.trigger("no destination configured");
            }
            Ok(_) => tracing::debug!("Destination present, watchdog done"),
            Err(e) => tracing::warn!(error = %e, "Watchdog could not read settings"),
        }
    }))
}
