//! Storage: shipment database (SQLite behind an r2d2 pool) and the
//! cache layer (Redis with in-memory fallback).

pub mod cache;
pub mod db;

pub use cache::ShipmentCache;
pub use db::{create_pool, get_connection, DbConnection, DbPool, Shipment, ShipmentDraft};
