//! Notification queue backed by a Redis list (in-memory when Redis is
//! unavailable). LPUSH + BRPOP gives FIFO delivery.

use tokio::time::Duration;

use crate::core::error::AppResult;
use crate::core::metrics;
use crate::notify::Notification;
use crate::storage::ShipmentCache;

const QUEUE_KEY: &str = "notification_queue";

/// Handle to the shared notification queue. Clone freely.
#[derive(Clone)]
pub struct NotificationQueue {
    cache: ShipmentCache,
}

impl NotificationQueue {
    pub fn new(cache: ShipmentCache) -> Self {
        Self { cache }
    }

    /// Enqueues a notification. Failures are logged by the caller; a
    /// lost notification never takes the simulation down.
    pub async fn enqueue(&self, notification: &Notification) -> AppResult<()> {
        let payload = serde_json::to_string(notification)?;
        self.cache.lpush(QUEUE_KEY, &payload).await?;
        metrics::record_notification_enqueued(notification.kind.label());
        log::info!(
            "Enqueued {} notification for {}",
            notification.kind.label(),
            notification.tracking_number
        );
        self.refresh_depth_gauge().await;
        Ok(())
    }

    /// Blocking pop with a timeout. A payload that fails to parse is
    /// dropped with an error log so one poison message cannot wedge the
    /// worker.
    pub async fn pop(&self, timeout: Duration) -> AppResult<Option<Notification>> {
        let Some(raw) = self.cache.brpop(QUEUE_KEY, timeout).await? else {
            return Ok(None);
        };
        self.refresh_depth_gauge().await;

        match serde_json::from_str::<Notification>(&raw) {
            Ok(notification) => Ok(Some(notification)),
            Err(e) => {
                log::error!("Dropping malformed notification payload: {} ({})", e, raw);
                Ok(None)
            }
        }
    }

    /// Current queue length.
    pub async fn depth(&self) -> usize {
        self.cache.llen(QUEUE_KEY).await.unwrap_or(0)
    }

    async fn refresh_depth_gauge(&self) {
        metrics::update_queue_depth(self.depth().await);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{EmailPayload, NotificationKind};
    use pretty_assertions::assert_eq;

    fn email_notification(tn: &str) -> Notification {
        Notification {
            tracking_number: tn.to_string(),
            kind: NotificationKind::Email(EmailPayload {
                status: "Delivered".to_string(),
                checkpoints: String::new(),
                delivery_location: "Lagos, NG".to_string(),
                recipient_email: "user@example.com".to_string(),
            }),
            attempts: 0,
        }
    }

    #[tokio::test]
    async fn test_enqueue_pop_fifo() {
        let queue = NotificationQueue::new(ShipmentCache::in_memory());
        queue.enqueue(&email_notification("TRK1")).await.unwrap();
        queue.enqueue(&email_notification("TRK2")).await.unwrap();
        assert_eq!(queue.depth().await, 2);

        let first = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.tracking_number, "TRK1");
        let second = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(second.tracking_number, "TRK2");
        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn test_pop_times_out_empty() {
        let queue = NotificationQueue::new(ShipmentCache::in_memory());
        assert!(queue.pop(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let cache = ShipmentCache::in_memory();
        cache.lpush(QUEUE_KEY, "not json").await.unwrap();
        let queue = NotificationQueue::new(cache);
        assert!(queue.pop(Duration::from_millis(10)).await.unwrap().is_none());
        assert_eq!(queue.depth().await, 0);
    }
}
