//! Shipment details service shared by the web tier, the bot and the
//! simulator: cache-through reads, validated writes and notification
//! fan-out on saves.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::core::error::{AppError, AppResult};
use crate::core::validation;
use crate::notify::{EmailPayload, Notification, NotificationKind, NotificationQueue, WebhookPayload};
use crate::sim::{RouteTable, ShipmentStatus};
use crate::storage::db::{self, Shipment, ShipmentDraft};
use crate::storage::{DbPool, ShipmentCache};

/// Shipment state as served to clients: the stored row plus the
/// simulation control flags held in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentDetails {
    pub tracking_number: String,
    pub status: String,
    pub checkpoints: String,
    pub delivery_location: String,
    pub last_updated: String,
    pub recipient_email: Option<String>,
    pub created_at: String,
    pub origin_location: Option<String>,
    pub webhook_url: Option<String>,
    pub email_notifications: bool,
    pub paused: bool,
    pub speed_multiplier: f64,
}

impl ShipmentDetails {
    pub fn checkpoint_list(&self) -> Vec<String> {
        self.checkpoints
            .split(';')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        ShipmentStatus::from_str(&self.status)
            .map(ShipmentStatus::is_terminal)
            .unwrap_or(false)
    }

    async fn from_shipment(shipment: Shipment, cache: &ShipmentCache) -> Self {
        let paused = cache.is_paused(&shipment.tracking_number).await;
        let speed_multiplier = cache.speed_multiplier(&shipment.tracking_number).await;
        Self {
            checkpoints: shipment.checkpoints.unwrap_or_default(),
            tracking_number: shipment.tracking_number,
            status: shipment.status,
            delivery_location: shipment.delivery_location,
            last_updated: shipment.last_updated,
            recipient_email: shipment.recipient_email,
            created_at: shipment.created_at,
            origin_location: shipment.origin_location,
            webhook_url: shipment.webhook_url,
            email_notifications: shipment.email_notifications,
            paused,
            speed_multiplier,
        }
    }
}

/// Fetches shipment details, cache first. The tracking number must
/// already be sanitized.
pub async fn get_shipment_details(
    pool: &Arc<DbPool>,
    cache: &ShipmentCache,
    tracking_number: &str,
) -> AppResult<Option<ShipmentDetails>> {
    if let Some(cached) = cache.get_cached_shipment(tracking_number).await {
        match serde_json::from_str::<ShipmentDetails>(&cached) {
            Ok(details) => return Ok(Some(details)),
            Err(e) => {
                // Stale schema in the cache; fall through to the database
                log::warn!("Discarding unreadable cached shipment {}: {}", tracking_number, e);
                cache.invalidate_shipment(tracking_number).await;
            }
        }
    }

    let conn = db::get_connection(pool)?;
    let Some(shipment) = db::get_shipment(&conn, tracking_number)? else {
        return Ok(None);
    };
    drop(conn);

    let details = ShipmentDetails::from_shipment(shipment, cache).await;
    if let Ok(json) = serde_json::to_string(&details) {
        cache.cache_shipment(tracking_number, &json).await;
    }
    Ok(Some(details))
}

/// Validates and persists a shipment, refreshes the cache and enqueues
/// update notifications.
pub async fn save_shipment(
    pool: &Arc<DbPool>,
    cache: &ShipmentCache,
    queue: &NotificationQueue,
    routes: &RouteTable,
    draft: ShipmentDraft,
) -> AppResult<ShipmentDetails> {
    let Some(tracking_number) = validation::sanitize_tracking_number(&draft.tracking_number) else {
        return Err(AppError::Validation("Invalid tracking number".to_string()));
    };

    if ShipmentStatus::from_str(&draft.status).is_err() {
        return Err(AppError::Validation(format!(
            "Invalid status. Must be one of: {}",
            ShipmentStatus::all_names().join(", ")
        )));
    }

    let known = routes.known_locations();
    if !validation::validate_location(&draft.delivery_location, &known) {
        return Err(AppError::Validation(format!(
            "Invalid delivery location. Must be one of: {}",
            known.join(", ")
        )));
    }
    if let Some(origin) = draft.origin_location.as_deref() {
        if !validation::validate_location(origin, &known) {
            return Err(AppError::Validation(format!(
                "Invalid origin location. Must be one of: {}",
                known.join(", ")
            )));
        }
    }

    if let Some(email) = draft.recipient_email.as_deref() {
        if !email.is_empty() && !validation::validate_email(email) {
            return Err(AppError::Validation("Invalid recipient email".to_string()));
        }
    }
    if let Some(url) = draft.webhook_url.as_deref() {
        if !validation::validate_webhook_url(url) {
            return Err(AppError::Validation("Invalid webhook URL".to_string()));
        }
    }

    let draft = ShipmentDraft {
        tracking_number: tracking_number.clone(),
        ..draft
    };

    let conn = db::get_connection(pool)?;
    let stored = db::upsert_shipment(&conn, &draft)?;
    drop(conn);

    let details = ShipmentDetails::from_shipment(stored, cache).await;
    if let Ok(json) = serde_json::to_string(&details) {
        cache.cache_shipment(&tracking_number, &json).await;
    }

    log::info!("Saved shipment {}: {}", tracking_number, details.status);
    enqueue_update_notifications(queue, &details).await;

    Ok(details)
}

/// Enqueues the email and webhook notifications a state change produces.
/// Failures are logged; a save never fails because a queue push did.
pub async fn enqueue_update_notifications(queue: &NotificationQueue, details: &ShipmentDetails) {
    if details.email_notifications {
        if let Some(recipient) = details.recipient_email.as_deref().filter(|r| !r.is_empty()) {
            let notification = Notification {
                tracking_number: details.tracking_number.clone(),
                kind: NotificationKind::Email(EmailPayload {
                    status: details.status.clone(),
                    checkpoints: details.checkpoints.clone(),
                    delivery_location: details.delivery_location.clone(),
                    recipient_email: recipient.to_string(),
                }),
                attempts: 0,
            };
            if let Err(e) = queue.enqueue(&notification).await {
                log::error!("Failed to enqueue email notification for {}: {}", details.tracking_number, e);
            }
        }
    }

    let webhook_url = details
        .webhook_url
        .clone()
        .or_else(|| crate::core::config::GLOBAL_WEBHOOK_URL.clone());
    if let Some(webhook_url) = webhook_url {
        let notification = Notification {
            tracking_number: details.tracking_number.clone(),
            kind: NotificationKind::Webhook(WebhookPayload {
                status: details.status.clone(),
                checkpoints: details.checkpoints.clone(),
                delivery_location: details.delivery_location.clone(),
                webhook_url,
            }),
            attempts: 0,
        };
        if let Err(e) = queue.enqueue(&notification).await {
            log::error!(
                "Failed to enqueue webhook notification for {}: {}",
                details.tracking_number,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::create_pool;
    use pretty_assertions::assert_eq;
    use tokio::time::Duration;

    fn test_pool() -> Arc<DbPool> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        std::mem::forget(dir);
        Arc::new(create_pool(path.to_str().unwrap()).unwrap())
    }

    fn draft(tn: &str) -> ShipmentDraft {
        ShipmentDraft {
            tracking_number: tn.to_string(),
            status: "Pending".to_string(),
            checkpoints: None,
            delivery_location: "Lagos, NG".to_string(),
            recipient_email: Some("user@example.com".to_string()),
            origin_location: None,
            webhook_url: None,
            email_notifications: true,
        }
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let pool = test_pool();
        let cache = ShipmentCache::in_memory();
        let queue = NotificationQueue::new(cache.clone());
        let routes = RouteTable::default();

        let saved = save_shipment(&pool, &cache, &queue, &routes, draft("trk10"))
            .await
            .unwrap();
        assert_eq!(saved.tracking_number, "TRK10");

        let fetched = get_shipment_details(&pool, &cache, "TRK10").await.unwrap().unwrap();
        assert_eq!(fetched.status, "Pending");
        assert!(!fetched.paused);
        assert_eq!(fetched.speed_multiplier, 1.0);
    }

    #[tokio::test]
    async fn test_save_rejects_bad_inputs() {
        let pool = test_pool();
        let cache = ShipmentCache::in_memory();
        let queue = NotificationQueue::new(cache.clone());
        let routes = RouteTable::default();

        let mut bad_status = draft("TRK11");
        bad_status.status = "Lost".to_string();
        assert!(save_shipment(&pool, &cache, &queue, &routes, bad_status).await.is_err());

        let mut bad_location = draft("TRK11");
        bad_location.delivery_location = "Atlantis".to_string();
        assert!(save_shipment(&pool, &cache, &queue, &routes, bad_location).await.is_err());

        let mut bad_email = draft("TRK11");
        bad_email.recipient_email = Some("nope".to_string());
        assert!(save_shipment(&pool, &cache, &queue, &routes, bad_email).await.is_err());

        let mut bad_webhook = draft("TRK11");
        bad_webhook.webhook_url = Some("ftp://example.com".to_string());
        assert!(save_shipment(&pool, &cache, &queue, &routes, bad_webhook).await.is_err());
    }

    #[tokio::test]
    async fn test_save_enqueues_notifications() {
        let pool = test_pool();
        let cache = ShipmentCache::in_memory();
        let queue = NotificationQueue::new(cache.clone());
        let routes = RouteTable::default();

        let mut d = draft("TRK12");
        d.webhook_url = Some("https://hooks.example.com/x".to_string());
        save_shipment(&pool, &cache, &queue, &routes, d).await.unwrap();

        // email + webhook
        assert_eq!(queue.depth().await, 2);
        let first = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.tracking_number, "TRK12");
    }

    #[tokio::test]
    async fn test_email_disabled_suppresses_email() {
        let pool = test_pool();
        let cache = ShipmentCache::in_memory();
        let queue = NotificationQueue::new(cache.clone());
        let routes = RouteTable::default();

        let mut d = draft("TRK13");
        d.email_notifications = false;
        save_shipment(&pool, &cache, &queue, &routes, d).await.unwrap();
        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let pool = test_pool();
        let cache = ShipmentCache::in_memory();
        assert!(get_shipment_details(&pool, &cache, "TRK404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_details_terminal_flag() {
        let pool = test_pool();
        let cache = ShipmentCache::in_memory();
        let queue = NotificationQueue::new(cache.clone());
        let routes = RouteTable::default();

        let mut d = draft("TRK14");
        d.status = "Delivered".to_string();
        d.recipient_email = None;
        let details = save_shipment(&pool, &cache, &queue, &routes, d).await.unwrap();
        assert!(details.is_terminal());
    }
}
