//! Notification handlers for alert transitions

use std::collections::HashMap;

use super::manager::AlertEvent;

/// Notification target for alert open/resolve events
#[derive(Debug, Clone)]
pub enum NotifyTarget {
    /// Log through tracing
    Log,
    /// HTTP webhook
    Webhook {
        url: String,
        headers: HashMap<String, String>,
    },
}

/// Sends alert transitions to the configured targets
pub struct Notifier {
    client: reqwest::Client,
    targets: Vec<NotifyTarget>,
}

impl Notifier {
    pub fn new(targets: Vec<NotifyTarget>) -> Self {
        Self {
            client: reqwest::Client::new(),
            targets,
        }
    }

    /// Send an event to all targets. Individual target failures are
    /// collected, not short-circuited.
    pub async fn notify(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        let mut errors = Vec::new();

        for target in &self.targets {
            if let Err(e) = self.notify_target(target, event).await {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifierError::Multiple(errors))
        }
    }

    async fn notify_target(
        &self,
        target: &NotifyTarget,
        event: &AlertEvent,
    ) -> Result<(), NotifierError> {
        match target {
            NotifyTarget::Log => {
                match event {
                    AlertEvent::Opened(alert) => {
                        tracing::warn!(
                            alert_id = alert.id,
                            table_id = alert.table_id,
                            monitor = %alert.monitor,
                            "Alert opened: {}",
                            alert.message
                        );
                    }
                    AlertEvent::Resolved(resolved) => {
                        tracing::info!(
                            alert_id = resolved.alert.id,
                            table_id = resolved.alert.table_id,
                            monitor = %resolved.alert.monitor,
                            "Alert resolved"
                        );
                    }
                }
                Ok(())
            }
            NotifyTarget::Webhook { url, headers } => {
                self.send_webhook(url, headers, event).await
            }
        }
    }

    async fn send_webhook(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        event: &AlertEvent,
    ) -> Result<(), NotifierError> {
        let payload = serde_json::json!({
            "event": event,
            "sent_at": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(url).json(&payload);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifierError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(url = %url, "Webhook notification sent");
        Ok(())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(vec![NotifyTarget::Log])
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Multiple notification failures: {0:?}")]
    Multiple(Vec<NotifierError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::manager::Alert;
    use crate::model::MonitorType;

    #[tokio::test]
    async fn test_log_notification_succeeds() {
        let notifier = Notifier::default();
        let event = AlertEvent::Opened(Alert {
            id: 1,
            table_id: 7,
            monitor: MonitorType::Freshness,
            message: "table stale".to_string(),
            opened_at: chrono::Utc::now(),
        });

        assert!(notifier.notify(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_reports_error() {
        let notifier = Notifier::new(vec![NotifyTarget::Webhook {
            url: "http://127.0.0.1:1/hook".to_string(),
            headers: HashMap::new(),
        }]);
        let event = AlertEvent::Opened(Alert {
            id: 2,
            table_id: 7,
            monitor: MonitorType::Volume,
            message: "volume anomaly".to_string(),
            opened_at: chrono::Utc::now(),
        });

        assert!(notifier.notify(&event).await.is_err());
    }
}
