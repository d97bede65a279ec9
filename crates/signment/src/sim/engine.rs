//! Per-shipment simulation tasks.
//!
//! Each tracked, non-terminal shipment gets one background task that
//! walks it through the status state machine: appending route
//! checkpoints, persisting progress, fanning out notifications and
//! broadcasting to WebSocket subscribers. The registry guarantees at
//! most one task per tracking number.

use chrono::Utc;
use dashmap::DashSet;
use std::str::FromStr;
use tokio::time::{Duration, Instant};

use crate::app::AppDeps;
use crate::core::config;
use crate::core::metrics;
use crate::shipments;
use crate::sim::transitions::ShipmentStatus;
use crate::storage::db;
use crate::web::ws;

/// Tracks which shipments currently have a simulation task.
pub struct SimRegistry {
    running: DashSet<String>,
}

impl SimRegistry {
    pub fn new() -> Self {
        Self { running: DashSet::new() }
    }

    /// Claims a slot for a tracking number. False when a task already runs.
    pub fn try_claim(&self, tracking_number: &str) -> bool {
        self.running.insert(tracking_number.to_string())
    }

    pub fn release(&self, tracking_number: &str) {
        self.running.remove(tracking_number);
    }

    pub fn is_running(&self, tracking_number: &str) -> bool {
        self.running.contains(tracking_number)
    }

    pub fn count(&self) -> usize {
        self.running.len()
    }
}

impl Default for SimRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the simulation task for a shipment unless one is already
/// running. The tracking number must be sanitized.
pub fn spawn_simulation(deps: AppDeps, tracking_number: String) {
    if !deps.sims.try_claim(&tracking_number) {
        log::debug!("Simulation already running for {}", tracking_number);
        return;
    }

    metrics::ACTIVE_SIMULATIONS.inc();
    log::info!("Starting simulation for {}", tracking_number);

    tokio::spawn(async move {
        run_simulation(&deps, &tracking_number).await;
        deps.sims.release(&tracking_number);
        metrics::ACTIVE_SIMULATIONS.dec();
        log::info!("Simulation finished for {}", tracking_number);
    });
}

async fn run_simulation(deps: &AppDeps, tracking_number: &str) {
    let started = Instant::now();
    let cap = Duration::from_secs(config::simulation::MAX_SIMULATION_DAYS as u64 * 86400);
    let mut db_failures: u32 = 0;

    loop {
        if started.elapsed() >= cap {
            log::warn!("Simulation for {} hit the {}-day cap", tracking_number, config::simulation::MAX_SIMULATION_DAYS);
            break;
        }

        if deps.cache.is_paused(tracking_number).await {
            log::debug!("Simulation paused for {}", tracking_number);
            tokio::time::sleep(config::simulation::paused_poll()).await;
            continue;
        }

        let step = match advance_shipment(deps, tracking_number).await {
            Ok(step) => {
                db_failures = 0;
                step
            }
            Err(e) => {
                db_failures += 1;
                log::error!(
                    "Simulation step failed for {} ({}/{}): {}",
                    tracking_number,
                    db_failures,
                    config::simulation::MAX_DB_RETRIES,
                    e
                );
                metrics::record_error("database", "simulation");
                if db_failures >= config::simulation::MAX_DB_RETRIES {
                    log::error!("Max retries exceeded, stopping simulation for {}", tracking_number);
                    break;
                }
                tokio::time::sleep(Duration::from_secs(
                    config::retry::EXPONENTIAL_BACKOFF_BASE.pow(db_failures),
                ))
                .await;
                continue;
            }
        };

        let Some(step) = step else {
            // Shipment vanished or reached a terminal state
            break;
        };

        metrics::SIMULATION_TICKS_TOTAL.inc();

        // Push the new state to live subscribers every tick
        ws::broadcast_update(&deps.db, &deps.cache, &deps.clients, &deps.http, tracking_number).await;

        if step.finished {
            break;
        }

        tokio::time::sleep(Duration::from_secs_f64(step.delay_secs)).await;
    }
}

struct StepOutcome {
    delay_secs: f64,
    finished: bool,
}

/// One simulation tick: appends checkpoints, maybe transitions the
/// status, persists and enqueues notifications. Returns `None` when the
/// shipment is gone or already terminal.
async fn advance_shipment(deps: &AppDeps, tracking_number: &str) -> crate::AppResult<Option<StepOutcome>> {
    let conn = db::get_connection(&deps.db)?;
    let Some(shipment) = db::get_shipment(&conn, tracking_number)? else {
        log::warn!("Shipment not found, stopping simulation: {}", tracking_number);
        return Ok(None);
    };

    let status = match ShipmentStatus::from_str(&shipment.status) {
        Ok(status) => status,
        Err(_) => {
            log::error!("Unknown status {:?} on {}, stopping simulation", shipment.status, tracking_number);
            return Ok(None);
        }
    };

    if status.is_terminal() {
        log::info!("Simulation completed for {}: {}", tracking_number, status);
        return Ok(None);
    }

    let mut checkpoints = shipment.checkpoint_list();
    let delivery_location = shipment.delivery_location.clone();
    let origin_location = shipment.origin_or_delivery().to_string();
    let template = deps.routes.template_for(&delivery_location, &origin_location);
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M");

    // Advance along the route while the parcel is still moving inland
    if !matches!(status, ShipmentStatus::OutForDelivery) {
        let next_index = checkpoints.len().min(template.len().saturating_sub(1));
        let next_checkpoint = format!("{} - {} - Processed", timestamp, template[next_index]);
        if !checkpoints.contains(&next_checkpoint) {
            checkpoints.push(next_checkpoint);
        }
    }

    let next_status = deps.transitions.choose_next(status);
    let changed = next_status.map(|next| next != status).unwrap_or(false);
    let new_status = next_status.unwrap_or(status);

    if changed {
        if let Some(event) = deps.transitions.random_event(status) {
            checkpoints.push(format!("{} - {} - {}", timestamp, delivery_location, event));
            log::info!("Event triggered for {}: {}", tracking_number, event);
        }
        match new_status {
            ShipmentStatus::Delivered => {
                checkpoints.push(format!("{} - {} - Delivered", timestamp, delivery_location));
            }
            ShipmentStatus::Returned => {
                checkpoints.push(format!("{} - {} - Returned", timestamp, origin_location));
            }
            _ => {}
        }
        metrics::record_status_transition(&status.to_string(), &new_status.to_string());
        log::info!("Status of {} changed to {}", tracking_number, new_status);
    }

    db::update_progress(&conn, tracking_number, &new_status.to_string(), &checkpoints.join(";"))?;
    drop(conn);
    deps.cache.invalidate_shipment(tracking_number).await;

    if changed {
        if let Some(details) = shipments::get_shipment_details(&deps.db, &deps.cache, tracking_number).await? {
            shipments::enqueue_update_notifications(&deps.queue, &details).await;
        }
    }

    if new_status.is_terminal() {
        log::info!("Simulation completed for {}: {}", tracking_number, new_status);
        return Ok(Some(StepOutcome {
            delay_secs: 0.0,
            finished: true,
        }));
    }

    // Longer routes take proportionally longer per hop; admins can speed
    // a shipment up or slow it down through the multiplier.
    let route_multiplier = 1.0 + (template.len() as f64 / 10.0);
    let speed_multiplier = deps.cache.speed_multiplier(tracking_number).await;
    let delay_secs = deps.transitions.random_delay_secs(status) * route_multiplier / speed_multiplier;

    log::debug!(
        "Simulation for {} sleeping {:.1}s (speed {}x)",
        tracking_number,
        delay_secs,
        speed_multiplier
    );

    Ok(Some(StepOutcome {
        delay_secs,
        finished: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_registry_claims_once() {
        let registry = SimRegistry::new();
        assert!(registry.try_claim("TRK1"));
        assert!(!registry.try_claim("TRK1"));
        assert!(registry.is_running("TRK1"));
        assert_eq!(registry.count(), 1);

        registry.release("TRK1");
        assert!(!registry.is_running("TRK1"));
        assert!(registry.try_claim("TRK1"));
    }

    #[test]
    fn test_registry_tracks_multiple() {
        let registry = SimRegistry::new();
        assert!(registry.try_claim("TRK1"));
        assert!(registry.try_claim("TRK2"));
        assert_eq!(registry.count(), 2);
    }
}
