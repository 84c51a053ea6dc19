//! Processing of one job: scrape, locate the PDF, deliver it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::types::ChatId;
use tracing::instrument;

use crate::chat::ChatClient;
use crate::error::JobError;
use crate::invoke::ScraperInvoker;
use crate::queue::{Job, JobHandler};
use crate::retry::{retry, RetryPolicy};
use crate::settings::SettingsStore;

/// Sends `path` as a document, retrying per `policy`.
pub async fn deliver(
    chat: &dyn ChatClient,
    to: ChatId,
    path: &Path,
    caption: &str,
    policy: RetryPolicy,
) -> Result<(), JobError> {
    retry(policy, move |_| async move { chat.send_document(to, path, caption).await }).await?;
    tracing::info!(path = %path.display(), "PDF delivered");
    Ok(())
}

pub fn failure_notice(job: &Job, error: &JobError) -> String {
    match error {
        JobError::ArtifactNotFound { .. } => format!(
            "⚠️ PDF not found for code {}. Check the code and the stock.",
            job.code
        ),
        _ => format!(
            "❌ Could not generate or send the PDF for code {}. Check the data and try again.",
            job.code
        ),
    }
}

pub struct JobRunner {
    chat: Arc<dyn ChatClient>,
    store: Arc<SettingsStore>,
    invoker: ScraperInvoker,
    delivery: RetryPolicy,
    ready_timeout: Duration,
}

impl JobRunner {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        store: Arc<SettingsStore>,
        invoker: ScraperInvoker,
        delivery: RetryPolicy,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            chat,
            store,
            invoker,
            delivery,
            ready_timeout,
        }
    }
}

#[async_trait]
impl JobHandler for JobRunner {
    #[instrument(skip(self), fields(code = %job.code))]
    async fn process(&self, job: &Job) -> Result<(), JobError> {
        self.chat.wait_ready(self.ready_timeout).await?;
        // settings are read per job; edits apply to the next one
        let settings = self.store.read()?;

        let ack = format!("🔄 Code {} received. Generating the PDF...", job.code);
        if let Err(e) = self.chat.send_text(job.destination, &ack).await {
            tracing::warn!(error = %e, "Could not acknowledge job");
        }

        let artifact = self.invoker.run(&job.code, &settings).await?;
        tracing::info!(path = %artifact.display(), "PDF located, sending");

        let caption = format!("📄 Report for code {}", job.code);
        deliver(
            self.chat.as_ref(),
            job.destination,
            &artifact,
            &caption,
            self.delivery,
        )
        .await
    }

    async fn report_failure(&self, job: &Job, error: &JobError) {
        let notice = failure_notice(job, error);
        if let Err(e) = self.chat.send_text(job.destination, &notice).await {
            tracing::warn!(code = %job.code, error = %e, "Could not send failure notice");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::chat::fake::FakeChat;
    use crate::invoke::tests::shell_invoker;
    use crate::queue::QueueService;
    use tempfile::TempDir;

    const GROUP: ChatId = ChatId(-100777);
    const QUICK: RetryPolicy = RetryPolicy::fixed(3, Duration::from_millis(1));

    struct Harness {
        chat: Arc<FakeChat>,
        queue: QueueService,
        _downloads: TempDir,
        _data: TempDir,
    }

    fn harness(chat: FakeChat, script: &str) -> Harness {
        let downloads = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let chat = Arc::new(chat);
        let store = Arc::new(SettingsStore::new(data.path().join("settings.json")));
        store.set_destination(GROUP, "Stock room").unwrap();

        let runner = JobRunner::new(
            Arc::clone(&chat) as Arc<dyn ChatClient>,
            store,
            shell_invoker(script, &downloads, Duration::from_secs(10)),
            QUICK,
            Duration::from_secs(1),
        );
        Harness {
            chat,
            queue: QueueService::new(Arc::new(runner)),
            _downloads: downloads,
            _data: data,
        }
    }

    const WRITES_PDF: &str = r#"echo pdf > "$DOWNLOADS_DIR/$1.pdf""#;

    #[tokio::test]
    async fn test_successful_job_acknowledges_and_delivers() {
        let h = harness(FakeChat::default(), WRITES_PDF);

        h.queue.enqueue(Job::new("12345", GROUP));
        h.queue.wait_idle().await;

        let documents = h.chat.documents();
        assert_eq!(documents.len(), 1);
        assert!(documents[0].ends_with("12345.pdf"));
        assert_eq!(
            h.chat.texts(),
            vec!["🔄 Code 12345 received. Generating the PDF...".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_sends_one_notice() {
        let h = harness(FakeChat::default(), "exit 0");

        h.queue.enqueue(Job::new("12345", GROUP));
        h.queue.wait_idle().await;

        let notices: Vec<_> = h
            .chat
            .texts()
            .into_iter()
            .filter(|t| t.contains("PDF not found"))
            .collect();
        assert_eq!(notices.len(), 1);
        assert!(h.chat.documents().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_succeeds_on_third_attempt() {
        let h = harness(FakeChat::failing_documents(2), WRITES_PDF);

        h.queue.enqueue(Job::new("4242", GROUP));
        h.queue.wait_idle().await;

        assert_eq!(*h.chat.document_calls.lock().unwrap(), 3);
        assert_eq!(h.chat.documents().len(), 1);
        assert!(!h.chat.texts().iter().any(|t| t.starts_with("❌")));
    }

    #[tokio::test]
    async fn test_delivery_exhausted_fails_job() {
        let h = harness(FakeChat::failing_documents(3), WRITES_PDF);

        h.queue.enqueue(Job::new("4242", GROUP));
        h.queue.wait_idle().await;

        assert_eq!(*h.chat.document_calls.lock().unwrap(), 3);
        assert!(h.chat.documents().is_empty());
        let failures: Vec<_> = h
            .chat
            .texts()
            .into_iter()
            .filter(|t| t.starts_with("❌"))
            .collect();
        assert_eq!(failures.len(), 1);
    }

    #[tokio::test]
    async fn test_unready_client_fails_job() {
        let chat = FakeChat {
            not_ready: true,
            ..FakeChat::default()
        };
        let h = harness(chat, WRITES_PDF);

        h.queue.enqueue(Job::new("12345", GROUP));
        h.queue.wait_idle().await;

        assert!(h.chat.documents().is_empty());
        assert_eq!(h.chat.texts().len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_reports_exhaustion() {
        let chat = FakeChat::failing_documents(5);
        let err = deliver(&chat, GROUP, Path::new("/tmp/x.pdf"), "c", QUICK)
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::DeliveryExhausted { attempts: 3, .. }));
        assert_eq!(*chat.document_calls.lock().unwrap(), 3);
    }
}
