use super::request::ContentKind;
use super::transport::{HttpRequest, ManagementTransport};
use crate::auth::Credential;
use crate::common::{ManagementError, PollFailureReason};
use crate::settings::{DEFAULT_POLL_INTERVAL_MS, PollSettings};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STATUS_SUCCEEDED: &str = "Succeeded";
const STATUS_IN_PROGRESS: &str = "InProgress";

/// Timing of the status polling loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    /// `None` polls until the operation reaches a terminal status
    pub max_polls: Option<u32>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_polls: None,
        }
    }
}

impl From<&PollSettings> for PollerConfig {
    fn from(settings: &PollSettings) -> Self {
        Self {
            interval: settings.interval(),
            max_polls: settings.max_polls,
        }
    }
}

/// Polls the status of an asynchronous Service Management operation until
/// it reaches a terminal status.
pub struct AsyncOperationPoller {
    transport: Arc<dyn ManagementTransport>,
    config: PollerConfig,
    user_agent: String,
}

impl AsyncOperationPoller {
    pub fn new(
        transport: Arc<dyn ManagementTransport>,
        config: PollerConfig,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            config,
            user_agent: user_agent.into(),
        }
    }

    pub fn config(&self) -> PollerConfig {
        self.config
    }

    /// GETs `url` every [`PollerConfig::interval`] until the reported
    /// status is `Succeeded`.
    ///
    /// # Errors
    ///
    /// - [`ManagementError::Cancelled`] when `cancel` fires before a request
    ///   or during the wait between two requests
    /// - [`ManagementError::PollFailure`] for any other status, a non-2xx
    ///   answer, an unreadable response or an exhausted poll bound
    pub async fn poll_until_terminal(
        &self,
        url: &str,
        credential: &Credential,
        content: ContentKind,
        cancel: &CancellationToken,
    ) -> Result<(), ManagementError> {
        let mut polls: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ManagementError::Cancelled);
            }
            if let Some(max_polls) = self.config.max_polls {
                if polls >= max_polls {
                    log::warn!("Giving up on {url} after {polls} polls");
                    return Err(poll_failure(PollFailureReason::Exhausted { polls }));
                }
            }

            polls += 1;
            let status = self.fetch_status(url, credential, content).await?;
            log::debug!("Operation {url} poll #{polls}: {status}");

            match status.as_str() {
                STATUS_SUCCEEDED => return Ok(()),
                STATUS_IN_PROGRESS => {}
                _ => {
                    log::error!("Operation {url} ended with status {status}");
                    return Err(poll_failure(PollFailureReason::Status(status)));
                }
            }

            if cancel.is_cancelled() {
                return Err(ManagementError::Cancelled);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ManagementError::Cancelled),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    async fn fetch_status(
        &self,
        url: &str,
        credential: &Credential,
        content: ContentKind,
    ) -> Result<String, ManagementError> {
        let request = HttpRequest::management(
            Method::GET,
            url.to_string(),
            content,
            &self.user_agent,
            credential,
            None,
        );

        let response = self
            .transport
            .send(&request, credential)
            .await
            .map_err(|e| poll_failure(PollFailureReason::Request(e.to_string())))?;

        if !response.is_success() {
            return Err(poll_failure(PollFailureReason::Http {
                http_status: response.status,
                body: response.body,
            }));
        }

        parse_operation_status(&response.body).ok_or_else(|| {
            poll_failure(PollFailureReason::Request(format!(
                "no status reported while polling: {}",
                response.body
            )))
        })
    }
}

fn poll_failure(reason: PollFailureReason) -> ManagementError {
    ManagementError::PollFailure { reason }
}

/// Extracts the operation status from a JSON (`Status`/`status`) or XML
/// (`<Status>`) status document.
pub fn parse_operation_status(body: &str) -> Option<String> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
        return value
            .get("Status")
            .or_else(|| value.get("status"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
    }

    let document = roxmltree::Document::parse(trimmed).ok()?;
    document
        .descendants()
        .find(|node| node.is_element() && node.tag_name().name() == "Status")
        .and_then(|node| node.text())
        .map(|text| text.trim().to_string())
}
