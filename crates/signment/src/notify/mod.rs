//! Notification pipeline: queue, delivery channels and the worker loop.
//!
//! Status changes enqueue notifications; the worker drains the queue and
//! delivers them over SMTP or HTTP webhooks.

pub mod email;
pub mod queue;
pub mod webhook;
pub mod worker;

use serde::{Deserialize, Serialize};

/// Wire format matches the original queue payload:
/// `{"tracking_number": ..., "type": "email"|"webhook", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub tracking_number: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
    /// Delivery attempts so far; bumped on re-queue.
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum NotificationKind {
    Email(EmailPayload),
    Webhook(WebhookPayload),
}

impl NotificationKind {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            NotificationKind::Email(_) => "email",
            NotificationKind::Webhook(_) => "webhook",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailPayload {
    pub status: String,
    /// `;`-joined checkpoint entries
    pub checkpoints: String,
    pub delivery_location: String,
    pub recipient_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    pub status: String,
    /// `;`-joined checkpoint entries
    pub checkpoints: String,
    pub delivery_location: String,
    pub webhook_url: String,
}

pub use queue::NotificationQueue;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_notification_wire_format() {
        let notification = Notification {
            tracking_number: "TRK1".to_string(),
            kind: NotificationKind::Webhook(WebhookPayload {
                status: "In_Transit".to_string(),
                checkpoints: "2025-01-01 12:00 - Lagos, NG - Processed".to_string(),
                delivery_location: "Lagos, NG".to_string(),
                webhook_url: "https://hooks.example.com/x".to_string(),
            }),
            attempts: 0,
        };

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "webhook");
        assert_eq!(json["tracking_number"], "TRK1");
        assert_eq!(json["data"]["status"], "In_Transit");

        let parsed: Notification = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, notification);
    }

    #[test]
    fn test_attempts_defaults_to_zero() {
        let raw = r#"{
            "tracking_number": "TRK2",
            "type": "email",
            "data": {
                "status": "Delivered",
                "checkpoints": "",
                "delivery_location": "London, UK",
                "recipient_email": "user@example.com"
            }
        }"#;
        let parsed: Notification = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.attempts, 0);
        assert_eq!(parsed.kind.label(), "email");
    }
}
