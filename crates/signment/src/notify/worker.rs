//! Notification worker: drains the queue and delivers notifications.
//!
//! Runs as its own role (`signment worker`) or inside the all-in-one
//! process. Failed email is re-queued up to the attempt cap; failed
//! webhooks are dropped after the retry policy gives up.

use tokio::time::Duration;

use crate::core::config;
use crate::core::metrics;
use crate::core::retry::{retry, RetryConfig};
use crate::notify::email::Mailer;
use crate::notify::webhook::send_webhook;
use crate::notify::{Notification, NotificationKind, NotificationQueue};

/// How long one BRPOP blocks before the loop re-checks shutdown-free.
const POP_TIMEOUT_SECS: u64 = 30;

/// Runs the worker loop forever.
pub async fn run_worker(queue: NotificationQueue, http: reqwest::Client) {
    log::info!("Starting notification worker");

    let mailer = match Mailer::from_env() {
        Ok(Some(mailer)) => Some(mailer),
        Ok(None) => {
            log::warn!("SMTP not configured; email notifications will be dropped");
            None
        }
        Err(e) => {
            log::error!("Failed to build SMTP transport: {}. Email notifications disabled", e);
            None
        }
    };

    loop {
        match queue.pop(Duration::from_secs(POP_TIMEOUT_SECS)).await {
            Ok(Some(notification)) => {
                process_notification(&queue, &http, mailer.as_ref(), notification).await;
            }
            Ok(None) => {} // timeout, loop around
            Err(e) => {
                log::error!("Notification queue error: {}", e);
                metrics::record_error("redis", "queue_pop");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

async fn process_notification(
    queue: &NotificationQueue,
    http: &reqwest::Client,
    mailer: Option<&Mailer>,
    notification: Notification,
) {
    let kind = notification.kind.label();
    let timer = metrics::NOTIFICATION_DELIVERY_SECONDS
        .with_label_values(&[kind])
        .start_timer();

    match &notification.kind {
        NotificationKind::Email(payload) => {
            let Some(mailer) = mailer else {
                metrics::record_notification_failed("email", "unconfigured");
                return;
            };

            match mailer.send(&notification.tracking_number, payload).await {
                Ok(()) => metrics::record_notification_sent("email"),
                Err(e) => {
                    log::error!(
                        "Failed to send email for {} (attempt {}): {}",
                        notification.tracking_number,
                        notification.attempts + 1,
                        e
                    );
                    metrics::record_notification_failed("email", "smtp");
                    requeue_email(queue, notification.clone()).await;
                }
            }
        }
        NotificationKind::Webhook(payload) => {
            let result = retry(&RetryConfig::delivery(), || {
                send_webhook(http, &notification.tracking_number, payload)
            })
            .await;

            if result.is_ok() {
                metrics::record_notification_sent("webhook");
            } else {
                log::error!(
                    "Webhook delivery for {} gave up after {} attempt(s)",
                    notification.tracking_number,
                    result.attempts
                );
                metrics::record_notification_failed("webhook", "http");
            }
        }
    }

    timer.observe_duration();
}

/// Puts a failed email back on the queue unless it already burned
/// through the attempt budget.
async fn requeue_email(queue: &NotificationQueue, mut notification: Notification) {
    notification.attempts += 1;
    if notification.attempts >= config::retry::MAX_DELIVERY_ATTEMPTS {
        log::error!(
            "Dropping email notification for {} after {} attempts",
            notification.tracking_number,
            notification.attempts
        );
        metrics::record_notification_failed("email", "exhausted");
        return;
    }

    if let Err(e) = queue.enqueue(&notification).await {
        log::error!(
            "Failed to re-queue email notification for {}: {}",
            notification.tracking_number,
            e
        );
    } else {
        log::warn!(
            "Re-queued failed email notification for {} (attempt {})",
            notification.tracking_number,
            notification.attempts
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::EmailPayload;
    use crate::storage::ShipmentCache;

    fn email(tn: &str, attempts: u32) -> Notification {
        Notification {
            tracking_number: tn.to_string(),
            kind: NotificationKind::Email(EmailPayload {
                status: "Delivered".to_string(),
                checkpoints: String::new(),
                delivery_location: "Lagos, NG".to_string(),
                recipient_email: "user@example.com".to_string(),
            }),
            attempts,
        }
    }

    #[tokio::test]
    async fn test_requeue_bumps_attempts() {
        let queue = NotificationQueue::new(ShipmentCache::in_memory());
        requeue_email(&queue, email("TRK1", 0)).await;

        let requeued = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(requeued.attempts, 1);
    }

    #[tokio::test]
    async fn test_requeue_drops_after_budget() {
        let queue = NotificationQueue::new(ShipmentCache::in_memory());
        requeue_email(&queue, email("TRK1", config::retry::MAX_DELIVERY_ATTEMPTS - 1)).await;
        assert!(queue.pop(Duration::from_millis(10)).await.unwrap().is_none());
    }
}
