//! Integration tests for the public web API, driven through the router
//! with tower's `oneshot` so no listener is needed.

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

use signment::app::AppDeps;
use signment::notify::NotificationQueue;
use signment::shipments;
use signment::sim::{RouteTable, SimRegistry, TransitionTable};
use signment::storage::db::{create_pool, ShipmentDraft};
use signment::storage::ShipmentCache;
use signment::web::server::{build_router, WebState};

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

fn test_router(deps: &AppDeps) -> axum::Router {
    build_router(WebState::new(deps.clone()))
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
}

async fn seed_shipment(deps: &AppDeps, tracking_number: &str, status: &str) {
    let draft = ShipmentDraft {
        tracking_number: tracking_number.to_string(),
        status: status.to_string(),
        checkpoints: None,
        delivery_location: "Lagos, NG".to_string(),
        recipient_email: None,
        origin_location: None,
        webhook_url: None,
        email_notifications: true,
    };
    shipments::save_shipment(&deps.db, &deps.cache, &deps.queue, &deps.routes, draft)
        .await
        .unwrap();
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn track_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/track")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn index_serves_tracking_page() {
    let deps = test_deps();
    let response = test_router(&deps)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("track-form"));
    assert!(html.contains("tracking_number"));
}

#[tokio::test]
async fn health_reports_components() {
    let deps = test_deps();
    let response = test_router(&deps)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
    assert_eq!(json["redis"], "unavailable");
}

#[tokio::test]
async fn track_rejects_missing_tracking_number() {
    let deps = test_deps();
    let response = test_router(&deps)
        .oneshot(track_request(serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error-codes"][0], "missing-input");
}

#[tokio::test]
async fn track_rejects_invalid_tracking_number() {
    let deps = test_deps();
    let response = test_router(&deps)
        .oneshot(track_request(serde_json::json!({"tracking_number": "TRK 1; DROP"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error-codes"][0], "invalid-input-response");
}

#[tokio::test]
async fn track_unknown_shipment_is_not_found() {
    let deps = test_deps();
    let response = test_router(&deps)
        .oneshot(track_request(serde_json::json!({"tracking_number": "TRK404"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error-codes"][0], "not-found");
}

#[tokio::test]
async fn track_returns_shipment_details() {
    let deps = test_deps();
    // Delivered so no simulation task is spawned by the request
    seed_shipment(&deps, "TRKDELIVERED", "Delivered").await;

    let response = test_router(&deps)
        .oneshot(track_request(serde_json::json!({"tracking_number": "trkdelivered"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["tracking_number"], "TRKDELIVERED");
    assert_eq!(json["data"]["status"], "Delivered");
    assert_eq!(json["data"]["paused"], false);
}

#[tokio::test]
async fn track_accepts_form_bodies() {
    let deps = test_deps();
    seed_shipment(&deps, "TRKFORM", "Delivered").await;

    let response = test_router(&deps)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/track")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("tracking_number=TRKFORM"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["tracking_number"], "TRKFORM");
}

#[tokio::test]
async fn track_records_recipient_email() {
    let deps = test_deps();
    seed_shipment(&deps, "TRKEMAIL", "Delivered").await;

    let response = test_router(&deps)
        .oneshot(track_request(serde_json::json!({
            "tracking_number": "TRKEMAIL",
            "email": "user@example.com"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["recipient_email"], "user@example.com");
}

#[tokio::test]
async fn broadcast_validates_tracking_number() {
    let deps = test_deps();

    let ok = test_router(&deps)
        .oneshot(Request::builder().uri("/broadcast/TRK1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::NO_CONTENT);

    let bad = test_router(&deps)
        .oneshot(
            Request::builder()
                .uri("/broadcast/%20bad%20tn%20")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}
