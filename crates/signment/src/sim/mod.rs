//! Shipment status simulation: the transition table, route templates
//! and the per-shipment background tasks that advance shipments.

pub mod engine;
pub mod routes;
pub mod transitions;

pub use engine::{spawn_simulation, SimRegistry};
pub use routes::RouteTable;
pub use transitions::{ShipmentStatus, TransitionRule, TransitionTable};
