//! Public web tier: the tracking page, the track API, WebSocket live
//! updates, broadcast trigger and the health check.

pub mod geocode;
pub mod recaptcha;
pub mod server;
pub mod ws;

pub use server::{build_router, start_web_server};
pub use ws::{broadcast_update, ClientRegistry};
