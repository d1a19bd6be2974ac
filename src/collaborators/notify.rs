//! Notification capability: chat-bot and generic webhook channels

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::http::{HttpClient, HttpRequest, TransportError};
use crate::config::defaults::NOTIFY_TIMEOUT_SECS;
use crate::config::ChannelConfig;
use crate::types::SecurityAlert;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("channel '{channel}' rejected alert with status {status}")]
    Rejected { channel: String, status: u16 },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel_name(&self) -> &str;

    async fn send(&self, alert: &SecurityAlert) -> Result<(), NotifyError>;
}

/// Build the notifier for one configured channel
pub fn build_notifier(channel: &ChannelConfig, http: Arc<dyn HttpClient>) -> Arc<dyn Notifier> {
    match channel {
        ChannelConfig::Telegram {
            bot_token,
            chat_id,
            api_base,
        } => Arc::new(TelegramNotifier {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.clone(),
            chat_id: chat_id.clone(),
        }),
        ChannelConfig::Webhook { url, token } => Arc::new(WebhookNotifier {
            http,
            url: url.clone(),
            token: token.clone(),
        }),
    }
}

// ============================================================================
// Chat bot
// ============================================================================

pub struct TelegramNotifier {
    http: Arc<dyn HttpClient>,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

/// Markdown body for chat delivery
pub fn format_chat_message(alert: &SecurityAlert) -> String {
    format!(
        "{} *Security Alert*\n\n*Type:* {}\n*Severity:* {}\n*Time:* {}\n*Message:* {}\n*ID:* {}",
        alert.severity.emoji(),
        alert.kind,
        alert.severity,
        alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        alert.message,
        alert.id,
    )
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel_name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, alert: &SecurityAlert) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": format_chat_message(alert),
            "parse_mode": "Markdown",
        });
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let resp = self
            .http
            .request(HttpRequest::post_json(url, body, Duration::from_secs(NOTIFY_TIMEOUT_SECS)))
            .await?;

        if resp.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                channel: self.channel_name().to_string(),
                status: resp.status,
            })
        }
    }
}

// ============================================================================
// Generic webhook
// ============================================================================

pub struct WebhookNotifier {
    http: Arc<dyn HttpClient>,
    url: String,
    token: Option<String>,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel_name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &SecurityAlert) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "id": alert.id,
            "message": alert.message,
            "severity": alert.severity,
            "type": alert.kind,
            "timestamp": alert.timestamp,
        });
        let request = HttpRequest::post_json(&self.url, body, Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .bearer(self.token.as_deref());
        let resp = self.http.request(request).await?;

        if resp.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                channel: self.channel_name().to_string(),
                status: resp.status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::HttpResponse;
    use crate::types::{AlertKind, Severity};
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<HttpRequest>>,
        status: u16,
    }

    #[async_trait]
    impl HttpClient for Recorder {
        async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            Ok(HttpResponse { status: self.status, body: "{}".to_string() })
        }
    }

    #[test]
    fn test_chat_message_contains_fields() {
        let alert = SecurityAlert::new(AlertKind::CriticalFailure, "db down", Severity::Critical);
        let text = format_chat_message(&alert);
        assert!(text.starts_with("🚨"));
        assert!(text.contains("critical_failure"));
        assert!(text.contains("db down"));
        assert!(text.contains(&alert.id.to_string()));
    }

    #[tokio::test]
    async fn test_telegram_posts_to_send_message() {
        let http = Arc::new(Recorder { seen: Mutex::new(Vec::new()), status: 200 });
        let notifier = build_notifier(
            &ChannelConfig::Telegram {
                bot_token: "T0K".to_string(),
                chat_id: "42".to_string(),
                api_base: "https://chat.example/".to_string(),
            },
            http.clone(),
        );
        let alert = SecurityAlert::new(AlertKind::SystemStart, "up", Severity::Info);
        notifier.send(&alert).await.unwrap();

        let seen = http.seen.lock().unwrap();
        assert_eq!(seen[0].url, "https://chat.example/botT0K/sendMessage");
        let body = seen[0].body.as_ref().unwrap();
        assert_eq!(body["chat_id"], "42");
        assert_eq!(body["parse_mode"], "Markdown");
    }

    #[tokio::test]
    async fn test_webhook_rejection_surfaces_status() {
        let http = Arc::new(Recorder { seen: Mutex::new(Vec::new()), status: 502 });
        let notifier = build_notifier(
            &ChannelConfig::Webhook {
                url: "https://hooks.example/alert".to_string(),
                token: Some("s3cret".to_string()),
            },
            http.clone(),
        );
        let alert = SecurityAlert::new(AlertKind::MonitoringAlert, "slow", Severity::Warning);
        let err = notifier.send(&alert).await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { status: 502, .. }));

        let seen = http.seen.lock().unwrap();
        assert_eq!(seen[0].body.as_ref().unwrap()["type"], "monitoring_alert");
        assert_eq!(seen[0].headers[0].1, "Bearer s3cret");
    }
}
