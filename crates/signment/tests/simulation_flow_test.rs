//! End-to-end simulation test: an Out_for_Delivery shipment has exactly
//! one successor (Delivered, probability 1.0), so the engine finishes
//! its run deterministically on the first tick.

use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

use signment::app::AppDeps;
use signment::notify::{NotificationKind, NotificationQueue};
use signment::shipments;
use signment::sim::{spawn_simulation, RouteTable, SimRegistry, TransitionTable};
use signment::storage::db::{self, create_pool, ShipmentDraft};
use signment::storage::ShipmentCache;

fn test_deps() -> AppDeps {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.sqlite");
    std::mem::forget(dir);

    let cache = ShipmentCache::in_memory();
    AppDeps {
        db: Arc::new(create_pool(path.to_str().unwrap()).unwrap()),
        cache: cache.clone(),
        queue: NotificationQueue::new(cache),
        clients: Arc::new(signment::web::ClientRegistry::new()),
        sims: Arc::new(SimRegistry::new()),
        http: reqwest::Client::new(),
        transitions: Arc::new(TransitionTable::default()),
        routes: Arc::new(RouteTable::default()),
    }
}

async fn seed(deps: &AppDeps, tracking_number: &str, status: &str, webhook: Option<&str>) {
    let draft = ShipmentDraft {
        tracking_number: tracking_number.to_string(),
        status: status.to_string(),
        checkpoints: None,
        delivery_location: "Lagos, NG".to_string(),
        recipient_email: None,
        origin_location: None,
        webhook_url: webhook.map(str::to_string),
        email_notifications: true,
    };
    shipments::save_shipment(&deps.db, &deps.cache, &deps.queue, &deps.routes, draft)
        .await
        .unwrap();
    // Drop the save-time notifications so assertions below only see
    // what the simulation produced.
    while deps.queue.pop(Duration::from_millis(10)).await.unwrap().is_some() {}
}

async fn wait_for_status(deps: &AppDeps, tracking_number: &str, expected: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let conn = db::get_connection(&deps.db).unwrap();
        let shipment = db::get_shipment(&conn, tracking_number).unwrap();
        if let Some(shipment) = &shipment {
            if shipment.status == expected {
                return;
            }
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {} to become {} (currently {:?})",
            tracking_number,
            expected,
            shipment.map(|s| s.status)
        );
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn out_for_delivery_shipment_reaches_delivered() {
    let deps = test_deps();
    seed(&deps, "TRKSIM1", "Out_for_Delivery", Some("https://hooks.example.com/x")).await;

    spawn_simulation(deps.clone(), "TRKSIM1".to_string());
    wait_for_status(&deps, "TRKSIM1", "Delivered").await;

    let conn = db::get_connection(&deps.db).unwrap();
    let shipment = db::get_shipment(&conn, "TRKSIM1").unwrap().unwrap();
    let checkpoints = shipment.checkpoint_list();
    assert!(
        checkpoints.iter().any(|cp| cp.ends_with("- Delivered")),
        "missing Delivered checkpoint: {:?}",
        checkpoints
    );

    // The status change enqueued a webhook notification
    let notification = deps
        .queue
        .pop(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("expected a webhook notification");
    assert_eq!(notification.tracking_number, "TRKSIM1");
    assert!(matches!(notification.kind, NotificationKind::Webhook(_)));
}

#[tokio::test]
async fn registry_releases_after_completion() {
    let deps = test_deps();
    seed(&deps, "TRKSIM2", "Out_for_Delivery", None).await;

    spawn_simulation(deps.clone(), "TRKSIM2".to_string());
    wait_for_status(&deps, "TRKSIM2", "Delivered").await;

    // The engine releases its registry slot after the final tick
    let deadline = Instant::now() + Duration::from_secs(5);
    while deps.sims.is_running("TRKSIM2") {
        assert!(Instant::now() < deadline, "simulation slot was never released");
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn terminal_shipment_does_not_simulate() {
    let deps = test_deps();
    seed(&deps, "TRKSIM3", "Delivered", None).await;

    spawn_simulation(deps.clone(), "TRKSIM3".to_string());

    // The task claims the slot, observes the terminal status and exits
    // without touching the row.
    let deadline = Instant::now() + Duration::from_secs(5);
    while deps.sims.is_running("TRKSIM3") {
        assert!(Instant::now() < deadline, "terminal simulation never exited");
        sleep(Duration::from_millis(50)).await;
    }

    let conn = db::get_connection(&deps.db).unwrap();
    let shipment = db::get_shipment(&conn, "TRKSIM3").unwrap().unwrap();
    assert_eq!(shipment.status, "Delivered");
    assert!(shipment.checkpoint_list().is_empty());
}

#[tokio::test]
async fn paused_shipment_holds_position() {
    let deps = test_deps();
    seed(&deps, "TRKSIM4", "Out_for_Delivery", None).await;
    deps.cache.set_paused("TRKSIM4", true).await.unwrap();

    spawn_simulation(deps.clone(), "TRKSIM4".to_string());
    sleep(Duration::from_millis(300)).await;

    let conn = db::get_connection(&deps.db).unwrap();
    let shipment = db::get_shipment(&conn, "TRKSIM4").unwrap().unwrap();
    assert_eq!(shipment.status, "Out_for_Delivery");
    assert!(deps.sims.is_running("TRKSIM4"));

    // Resuming lets it finish
    deps.cache.set_paused("TRKSIM4", false).await.unwrap();
    wait_for_status(&deps, "TRKSIM4", "Delivered").await;
}
