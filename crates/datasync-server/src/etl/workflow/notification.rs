//! Lifecycle notifications emitted when a workflow finishes
//!
//! Delivery failures are logged by the caller and never change a run's
//! terminal status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::etl::error::{EtlError, EtlResult};
use crate::etl::types::{Phase, WorkflowKind, WorkflowStatus};

/// Error messages carried in a notification payload
const MAX_SUMMARY_ERRORS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    DiscoveryCompleted,
    DiscoveryFailed,
    SyncCompleted,
    SyncFailed,
    QualityCheckCompleted,
    QualityCheckFailed,
}

impl NotificationType {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::DiscoveryCompleted => "discovery_completed",
            NotificationType::DiscoveryFailed => "discovery_failed",
            NotificationType::SyncCompleted => "sync_completed",
            NotificationType::SyncFailed => "sync_failed",
            NotificationType::QualityCheckCompleted => "quality_check_completed",
            NotificationType::QualityCheckFailed => "quality_check_failed",
        }
    }

    pub fn for_outcome(kind: WorkflowKind, phase: Phase) -> Self {
        let failed = phase == Phase::Failed;
        match (kind, failed) {
            (WorkflowKind::Discovery, false) => NotificationType::DiscoveryCompleted,
            (WorkflowKind::Discovery, true) => NotificationType::DiscoveryFailed,
            (WorkflowKind::Sync, false) => NotificationType::SyncCompleted,
            (WorkflowKind::Sync, true) => NotificationType::SyncFailed,
            (WorkflowKind::Quality, false) => NotificationType::QualityCheckCompleted,
            (WorkflowKind::Quality, true) => NotificationType::QualityCheckFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub connection_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn from_status(status: &WorkflowStatus) -> Self {
        let summary: Vec<String> = status
            .errors
            .iter()
            .rev()
            .take(MAX_SUMMARY_ERRORS)
            .map(|e| format!("{}: {}", e.object, e.message))
            .collect();
        Self {
            notification_type: NotificationType::for_outcome(status.kind, status.phase),
            connection_id: status.connection_id,
            workflow_id: status.workflow_id.clone(),
            run_id: status.run_id,
            payload: json!({
                "phase": status.phase,
                "progress": status.progress,
                "metrics": status.metrics,
                "error_count": status.errors.len(),
                "recent_errors": summary,
            }),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> EtlResult<()>;
}

/// POSTs the notification as JSON
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> EtlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EtlError::Internal(format!("failed to build webhook client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

fn delivery_error(err: reqwest::Error) -> EtlError {
    EtlError::Connection {
        retryable: err.is_timeout() || err.is_connect(),
        message: format!("webhook delivery failed: {}", err),
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> EtlResult<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(delivery_error)?
            .error_for_status()
            .map_err(delivery_error)?;
        Ok(())
    }
}

/// Writes notifications to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> EtlResult<()> {
        info!(
            notification = notification.notification_type.as_str(),
            workflow_id = %notification.workflow_id,
            connection_id = %notification.connection_id,
            payload = %notification.payload,
            "workflow notification"
        );
        Ok(())
    }
}

/// Where a run's lifecycle notification goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationConfig {
    Webhook { url: String },
    Log,
}

impl NotificationConfig {
    pub fn validate(&self) -> EtlResult<()> {
        match self {
            NotificationConfig::Webhook { url } if !(url.starts_with("http://") || url.starts_with("https://")) => Err(
                EtlError::validation(format!("webhook url must be http(s): {}", url)),
            ),
            _ => Ok(()),
        }
    }

    pub fn build(&self, timeout: Duration) -> EtlResult<Box<dyn Notifier>> {
        Ok(match self {
            NotificationConfig::Webhook { url } => Box::new(WebhookNotifier::new(url.clone(), timeout)?),
            NotificationConfig::Log => Box::new(LogNotifier),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::types::{ErrorEntry, Severity};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn failed_sync() -> WorkflowStatus {
        let mut status = WorkflowStatus::new("sync-shop".into(), Uuid::new_v4(), Uuid::new_v4(), WorkflowKind::Sync);
        status.phase = Phase::Failed;
        status.errors.push(ErrorEntry::from_error(
            "sync-shop",
            &EtlError::Cancelled,
            Severity::Error,
        ));
        status
    }

    #[test]
    fn test_type_for_outcome() {
        assert_eq!(
            NotificationType::for_outcome(WorkflowKind::Quality, Phase::Completed).as_str(),
            "quality_check_completed"
        );
        let notification = Notification::from_status(&failed_sync());
        assert_eq!(notification.notification_type, NotificationType::SyncFailed);
        assert_eq!(notification.payload["error_count"], 1);
        assert_eq!(notification.payload["recent_errors"][0], "sync-shop: cancelled by user");
    }

    #[test]
    fn test_config_validation() {
        let config: NotificationConfig =
            serde_json::from_value(json!({"type": "webhook", "url": "ftp://x"})).unwrap();
        assert!(config.validate().is_err());
        assert!(NotificationConfig::Log.validate().is_ok());
    }

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/etl"))
            .and(body_partial_json(json!({"type": "sync_failed", "workflow_id": "sync-shop"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hooks/etl", server.uri()), Duration::from_secs(2)).unwrap();
        notifier.notify(&Notification::from_status(&failed_sync())).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), Duration::from_secs(2)).unwrap();
        let result = notifier.notify(&Notification::from_status(&failed_sync())).await;
        assert!(matches!(result, Err(EtlError::Connection { .. })));
    }
}
