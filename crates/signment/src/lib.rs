//! Signment - shipment-tracking simulator service
//!
//! This library provides all the core functionality for the Signment
//! service: the shipment store, the status simulation engine, the
//! notification pipeline, the public web tracker and the Telegram
//! admin bot.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics, retry, validation
//! - `storage`: shipment database and cache (Redis with in-memory fallback)
//! - `shipments`: shared shipment-details service (cache-through reads,
//!   validated writes, notification fan-out)
//! - `sim`: status transition table and per-shipment simulation tasks
//! - `notify`: notification queue, email/webhook delivery, worker loop
//! - `web`: public HTTP server and WebSocket live updates
//! - `telegram`: admin bot commands, menus and dispatcher

pub mod app;
pub mod cli;
pub mod core;
pub mod notify;
pub mod shipments;
pub mod sim;
pub mod storage;
pub mod telegram;
pub mod web;

// Re-export commonly used types for convenience
pub use self::core::{config, AppError, AppResult};
pub use notify::{Notification, NotificationQueue};
pub use storage::{create_pool, get_connection, DbConnection, DbPool, ShipmentCache};
