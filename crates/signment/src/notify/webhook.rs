//! Webhook notification delivery: an HTTP POST with the shipment state.

use chrono::Utc;
use serde_json::json;

use crate::core::error::{AppError, AppResult};
use crate::notify::WebhookPayload;

/// Posts one webhook notification. Success is any 2xx response.
pub async fn send_webhook(client: &reqwest::Client, tracking_number: &str, payload: &WebhookPayload) -> AppResult<()> {
    let checkpoints: Vec<&str> = payload.checkpoints.split(';').filter(|c| !c.is_empty()).collect();

    let body = json!({
        "tracking_number": tracking_number,
        "status": payload.status,
        "checkpoints": checkpoints,
        "delivery_location": payload.delivery_location,
        "timestamp": Utc::now().to_rfc3339(),
    });

    let response = client.post(&payload.webhook_url).json(&body).send().await?;

    let status = response.status();
    if status.is_success() {
        log::info!("Webhook notification sent for {} to {}", tracking_number, payload.webhook_url);
        Ok(())
    } else {
        log::warn!(
            "Webhook for {} failed: HTTP {} from {}",
            tracking_number,
            status,
            payload.webhook_url
        );
        Err(AppError::HttpStatus(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_checkpoints_split() {
        // The body construction splits on ';' and drops empties; verify
        // through the same expression the sender uses.
        let payload = WebhookPayload {
            status: "Delivered".to_string(),
            checkpoints: "a;b;;c".to_string(),
            delivery_location: "Lagos, NG".to_string(),
            webhook_url: "https://hooks.example.com/x".to_string(),
        };
        let checkpoints: Vec<&str> = payload.checkpoints.split(';').filter(|c| !c.is_empty()).collect();
        assert_eq!(checkpoints, vec!["a", "b", "c"]);
    }
}
