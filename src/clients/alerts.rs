use reqwest::Client;
use serde_json::json;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Posts operator alerts to a Slack-style incoming webhook. Alerting is
/// best-effort; a delivery failure is logged, never propagated.
#[derive(Clone)]
pub struct AlertClient {
    client: Client,
    webhook_url: Option<String>,
}

impl AlertClient {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            webhook_url,
        }
    }

    pub async fn send_alert(&self, title: &str, message: &str, severity: AlertSeverity) {
        let Some(url) = &self.webhook_url else {
            tracing::warn!(%severity, title, message, "alert raised with no webhook configured");
            return;
        };

        let body = json!({
            "text": format!("[{}] {}\n{}", severity, title, message),
        });
        match self.client.post(url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::error!(
                    status = %response.status(),
                    title,
                    "alert webhook rejected delivery"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(title, "alert delivery failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_alert_delivery() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(200)
            .create_async()
            .await;

        let alerts = AlertClient::new(Some(format!("{}/hook", server.url())));
        alerts
            .send_alert("sync failed", "range 100-200", AlertSeverity::Critical)
            .await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unconfigured_webhook_is_a_noop() {
        let alerts = AlertClient::new(None);
        // Must not panic or block.
        alerts
            .send_alert("title", "message", AlertSeverity::Info)
            .await;
    }
}
