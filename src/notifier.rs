//! Alert an external endpoint when a refresh comes from a new IP.
//!
//! Delivery is best effort. Alerts run on detached tasks and their
//! outcome never reaches the request that triggered them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

const MESSAGE: &str = "Login attempt from new IP address";

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("webhook answered with status {status}")]
    Rejected { status: u16 },
}

/// IP change observed on a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpChange {
    pub user_id: String,
    pub old_ip: String,
    pub new_ip: String,
}

#[derive(Serialize)]
struct Payload<'a> {
    user_id: &'a str,
    old_ip: &'a str,
    new_ip: &'a str,
    message: &'static str,
}

#[async_trait]
pub trait AnomalyNotifier: Send + Sync {
    async fn notify(&self, change: &IpChange) -> Result<(), NotifyError>;
}

/// Posts alerts as JSON to a configured URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    /// Create a new [`WebhookNotifier`].
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl AnomalyNotifier for WebhookNotifier {
    async fn notify(&self, change: &IpChange) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&Payload {
                user_id: &change.user_id,
                old_ip: &change.old_ip,
                new_ip: &change.new_ip,
                message: MESSAGE,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected {
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct Disabled;

#[async_trait]
impl AnomalyNotifier for Disabled {
    async fn notify(&self, change: &IpChange) -> Result<(), NotifyError> {
        tracing::debug!(user_id = change.user_id, "no webhook configured, IP change dropped");
        Ok(())
    }
}

/// Send an alert on a detached task.
///
/// Unknown or unchanged addresses are not reported.
pub fn dispatch(notifier: Arc<dyn AnomalyNotifier>, change: IpChange) {
    if change.old_ip.is_empty()
        || change.new_ip.is_empty()
        || change.old_ip == change.new_ip
    {
        tracing::debug!(user_id = change.user_id, "nothing to report, IP change dropped");
        return;
    }

    tokio::spawn(async move {
        match notifier.notify(&change).await {
            Ok(()) => {
                metrics::counter!("ip_change_notifications_total", "outcome" => "sent").increment(1);
            },
            Err(err) => {
                metrics::counter!("ip_change_notifications_total", "outcome" => "failed").increment(1);
                tracing::warn!(
                    user_id = change.user_id,
                    error = %err,
                    "IP change notification failed"
                );
            },
        }
    });
}
