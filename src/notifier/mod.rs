//! Outbound delivery of due-date notifications.
//!
//! [`NotificationGateway::deliver`] performs exactly one HTTP POST per call.
//! It never retries and never touches task state; remembering a successful
//! delivery is the scanner's job.

use crate::domain::{NotificationPayload, Task};
use crate::errors::DeliveryError;
use reqwest::{Client, StatusCode, header};
use std::time::Duration;


pub const USER_AGENT: &str = "TaskManager-Webhook/1.0";

#[derive(Clone)]
pub struct NotificationGateway {
    client: Client,
    lookahead: Duration,
}

impl NotificationGateway {
    /// Builds a gateway whose requests are bounded by `timeout`.
    ///
    /// `lookahead` only feeds the human readable message in the payload.
    pub fn new(timeout: Duration, lookahead: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(DeliveryError::Transport)?;

        Ok(Self { client, lookahead })
    }

    /// Sends the notification for `task` to its registered webhook.
    ///
    /// # Returns
    /// * `Ok(StatusCode)` - The endpoint answered with a 2xx status.
    /// * `Err(DeliveryError)` - Anything else: no url, transport error, timeout, non-2xx.
    pub async fn deliver(&self, task: &Task) -> Result<StatusCode, DeliveryError> {
        let url = task
            .webhook_target()
            .ok_or_else(|| DeliveryError::InvalidUrl(format!("task {} has no webhook url", task.id)))?;

        let url = reqwest::Url::parse(url)
            .map_err(|e| DeliveryError::InvalidUrl(format!("{url}: {e}")))?;

        let payload = NotificationPayload::for_task(task, self.lookahead);

        tracing::debug!(task_id = task.id, %url, "Sending webhook notification");

        // Dropping the response without reading the body releases the connection.
        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(status)
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}
