//! Prioritized locator search with nested-frame fallback.

use std::time::Duration;

use async_trait::async_trait;

use super::Stage;
use crate::error::{ScrapeError, WebDriverError};
use crate::webdriver::{By, ElementRef, WebDriver};

/// Per-frame bound when the direct search has already failed.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// The parts of a browser page the locator search needs.
#[async_trait]
pub trait Document: Send + Sync {
    type Element: Send + Sync;

    async fn wait_for(&self, by: &By, timeout: Duration) -> Result<Self::Element, WebDriverError>;
    async fn frames(&self) -> Result<Vec<Self::Element>, WebDriverError>;
    async fn enter_frame(&self, frame: &Self::Element) -> Result<(), WebDriverError>;
    async fn leave_frames(&self) -> Result<(), WebDriverError>;
}

#[async_trait]
impl Document for WebDriver {
    type Element = ElementRef;

    async fn wait_for(&self, by: &By, timeout: Duration) -> Result<ElementRef, WebDriverError> {
        WebDriver::wait_for(self, by, timeout).await
    }

    async fn frames(&self) -> Result<Vec<ElementRef>, WebDriverError> {
        self.find_all(&By::css("iframe, frame")).await
    }

    async fn enter_frame(&self, frame: &ElementRef) -> Result<(), WebDriverError> {
        WebDriver::enter_frame(self, frame).await
    }

    async fn leave_frames(&self) -> Result<(), WebDriverError> {
        self.enter_default_content().await
    }
}

/// Looks for `by` in the current context, then inside each top-level frame.
/// On success the browsing context stays in the frame that held the element.
pub async fn find_in_frames<D: Document>(
    doc: &D,
    by: &By,
    timeout: Duration,
) -> Result<D::Element, WebDriverError> {
    match doc.wait_for(by, timeout).await {
        Ok(element) => return Ok(element),
        Err(e) if e.is_no_such_element() => {}
        Err(e) => return Err(e),
    }

    doc.leave_frames().await?;
    let frames = doc.frames().await?;
    for (index, frame) in frames.iter().enumerate() {
        doc.leave_frames().await?;
        if let Err(e) = doc.enter_frame(frame).await {
            tracing::debug!(index, error = %e, "Cannot enter frame");
            continue;
        }
        if let Ok(element) = doc.wait_for(by, FRAME_TIMEOUT).await {
            tracing::debug!(index, locator = %by, "Element found inside frame");
            return Ok(element);
        }
    }
    doc.leave_frames().await?;
    Err(WebDriverError::NotFound(by.to_string()))
}

/// First-match-wins over `locators`, each bounded by `timeout_each`.
pub async fn wait_any<D: Document>(
    doc: &D,
    stage: Stage,
    locators: &[By],
    timeout_each: Duration,
) -> Result<D::Element, ScrapeError> {
    for by in locators {
        match find_in_frames(doc, by, timeout_each).await {
            Ok(element) => {
                tracing::debug!(%stage, locator = %by, "Element located");
                return Ok(element);
            }
            Err(e) if e.is_no_such_element() => continue,
            Err(source) => return Err(ScrapeError::WebDriver { stage, source }),
        }
    }
    Err(ScrapeError::NotFound {
        stage,
        tried: locators
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    })
}
