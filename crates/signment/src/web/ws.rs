//! WebSocket live updates.
//!
//! Replaces the original Socket.IO layer with plain WebSocket JSON
//! frames while keeping the message vocabulary: clients subscribe with
//! `{"action":"track","tracking_number":...}`, unsubscribe with
//! `{"action":"unsubscribe",...}` and receive `tracking_update` events.

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::metrics;
use crate::core::validation::sanitize_tracking_number;
use crate::shipments;
use crate::storage::{DbPool, ShipmentCache};
use crate::web::geocode;

pub type ClientId = u64;

/// Registry of WebSocket subscribers per tracking number.
///
/// The original kept `clients:{tn}` sets in Redis because Socket.IO
/// sessions lived across workers; here a subscription is bound to this
/// process's socket, so the registry is in-process state.
pub struct ClientRegistry {
    next_id: AtomicU64,
    subscriptions: DashMap<String, HashMap<ClientId, mpsc::UnboundedSender<String>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscriptions: DashMap::new(),
        }
    }

    pub fn next_client_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds a client to a tracking number's subscriber set.
    pub fn subscribe(&self, tracking_number: &str, client_id: ClientId, sender: mpsc::UnboundedSender<String>) {
        self.subscriptions
            .entry(tracking_number.to_string())
            .or_default()
            .insert(client_id, sender);
        log::debug!("Client {} subscribed to {}", client_id, tracking_number);
    }

    /// Removes a client from one tracking number's subscriber set.
    pub fn unsubscribe(&self, tracking_number: &str, client_id: ClientId) {
        if let Some(mut subscribers) = self.subscriptions.get_mut(tracking_number) {
            subscribers.remove(&client_id);
        }
        self.subscriptions.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Removes a client everywhere (socket closed).
    pub fn unsubscribe_all(&self, client_id: ClientId) {
        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().remove(&client_id);
        }
        self.subscriptions.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Sends a payload to every subscriber of a tracking number.
    /// Dead senders are pruned. Returns the number of deliveries.
    pub fn broadcast(&self, tracking_number: &str, payload: &str) -> usize {
        let Some(mut subscribers) = self.subscriptions.get_mut(tracking_number) else {
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|client_id, sender| match sender.send(payload.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                log::debug!("Dropping dead client {} for {}", client_id, tracking_number);
                false
            }
        });
        delivered
    }

    /// Number of subscribers for a tracking number.
    pub fn subscriber_count(&self, tracking_number: &str) -> usize {
        self.subscriptions.get(tracking_number).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Incoming client frame.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    action: String,
    tracking_number: Option<String>,
}

/// Builds the `tracking_update` payload for a tracking number,
/// geocoding checkpoint locations for the map view.
pub async fn build_tracking_update(
    pool: &Arc<DbPool>,
    cache: &ShipmentCache,
    http: &reqwest::Client,
    tracking_number: &str,
) -> serde_json::Value {
    match shipments::get_shipment_details(pool, cache, tracking_number).await {
        Ok(Some(details)) => {
            let checkpoints = details.checkpoint_list();
            let coords = geocode::geocode_checkpoints(cache, http, &checkpoints).await;
            json!({
                "event": "tracking_update",
                "tracking_number": details.tracking_number,
                "status": details.status,
                "checkpoints": checkpoints,
                "delivery_location": details.delivery_location,
                "coords": coords,
                "found": true,
                "paused": details.paused,
                "speed_multiplier": details.speed_multiplier,
                "success": true,
            })
        }
        Ok(None) => json!({
            "event": "tracking_update",
            "tracking_number": tracking_number,
            "found": false,
            "error": "Tracking number not found.",
            "error-codes": ["not-found"],
        }),
        Err(e) => {
            log::error!("Failed to build tracking update for {}: {}", tracking_number, e);
            metrics::record_error("database", "tracking_update");
            json!({
                "event": "tracking_update",
                "tracking_number": tracking_number,
                "success": false,
                "error-codes": ["database-error"],
            })
        }
    }
}

/// Pushes the current state of a shipment to its subscribers.
pub async fn broadcast_update(
    pool: &Arc<DbPool>,
    cache: &ShipmentCache,
    clients: &ClientRegistry,
    http: &reqwest::Client,
    tracking_number: &str,
) {
    let Some(tracking_number) = sanitize_tracking_number(tracking_number) else {
        log::error!("Invalid tracking number for broadcast");
        return;
    };

    if clients.subscriber_count(&tracking_number) == 0 {
        log::debug!("No clients for broadcast: {}", tracking_number);
        return;
    }

    let payload = build_tracking_update(pool, cache, http, &tracking_number).await;
    let delivered = clients.broadcast(&tracking_number, &payload.to_string());
    if delivered > 0 {
        metrics::WS_BROADCASTS_TOTAL.inc();
        log::debug!("Broadcast update for {} to {} client(s)", tracking_number, delivered);
    }
}

/// Drives one upgraded WebSocket connection until it closes.
pub async fn handle_socket(
    socket: WebSocket,
    pool: Arc<DbPool>,
    cache: ShipmentCache,
    clients: Arc<ClientRegistry>,
    http: reqwest::Client,
) {
    let client_id = clients.next_client_id();
    metrics::WS_CLIENTS.inc();
    log::debug!("Client {} connected", client_id);

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Everything queued on the channel (greeting, replies, broadcasts)
    // flows to the socket from this single writer task.
    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let _ = tx.send(json!({"event": "status", "message": "Connected to tracking service"}).to_string());

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue, // ping/pong/binary
        };

        let Ok(request) = serde_json::from_str::<ClientFrame>(&text) else {
            let _ = tx.send(json!({"success": false, "error-codes": ["invalid-input-response"]}).to_string());
            continue;
        };

        match request.action.as_str() {
            "track" => {
                let sanitized = request.tracking_number.as_deref().and_then(sanitize_tracking_number);
                let Some(tracking_number) = sanitized else {
                    let _ = tx.send(
                        json!({
                            "event": "tracking_update",
                            "success": false,
                            "error-codes": ["invalid-input-response"],
                        })
                        .to_string(),
                    );
                    continue;
                };

                let payload = build_tracking_update(&pool, &cache, &http, &tracking_number).await;
                if payload["found"].as_bool() == Some(true) {
                    clients.subscribe(&tracking_number, client_id, tx.clone());
                }
                let _ = tx.send(payload.to_string());
            }
            "unsubscribe" => {
                if let Some(tracking_number) = request.tracking_number.as_deref().and_then(sanitize_tracking_number) {
                    clients.unsubscribe(&tracking_number, client_id);
                    log::debug!("Client {} unsubscribed from {}", client_id, tracking_number);
                }
            }
            other => {
                log::debug!("Client {} sent unknown action {:?}", client_id, other);
            }
        }
    }

    clients.unsubscribe_all(client_id);
    writer.abort();
    metrics::WS_CLIENTS.dec();
    log::debug!("Client {} disconnected", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_subscribe_broadcast_unsubscribe() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = registry.next_client_id();
        registry.subscribe("TRK1", id, tx);
        assert_eq!(registry.subscriber_count("TRK1"), 1);

        assert_eq!(registry.broadcast("TRK1", "hello"), 1);
        assert_eq!(rx.try_recv().unwrap(), "hello");

        registry.unsubscribe("TRK1", id);
        assert_eq!(registry.subscriber_count("TRK1"), 0);
        assert_eq!(registry.broadcast("TRK1", "again"), 0);
    }

    #[test]
    fn test_dead_senders_are_pruned() {
        let registry = ClientRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let id = registry.next_client_id();
        registry.subscribe("TRK1", id, tx);
        assert_eq!(registry.broadcast("TRK1", "hello"), 0);
        assert_eq!(registry.subscriber_count("TRK1"), 0);
    }

    #[test]
    fn test_unsubscribe_all_clears_every_subscription() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = registry.next_client_id();
        registry.subscribe("TRK1", id, tx.clone());
        registry.subscribe("TRK2", id, tx);

        registry.unsubscribe_all(id);
        assert_eq!(registry.subscriber_count("TRK1"), 0);
        assert_eq!(registry.subscriber_count("TRK2"), 0);
    }
}
