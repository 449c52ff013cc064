mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{count, listing_id_for_key, post, Harness};
use estate_feed::server::{router, AppState};

const TOKEN: &str = "test-token";

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Poll `/sync/status` until the run in progress has finished.
async fn wait_for_finish(app: &Router) -> Value {
    for _ in 0..200 {
        let (_, body) = send(app, "GET", "/sync/status", Some(TOKEN), None).await;
        if body["running"] == false {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sync run did not finish");
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let h = Harness::new().await;
    let app = router(AppState::new(h.engine, TOKEN));

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_bad_token_is_rejected() {
    let h = Harness::new().await;
    let app = router(AppState::new(h.engine, TOKEN));

    let (status, body) = send(&app, "GET", "/sync/status", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = send(&app, "GET", "/sync/status", Some("wrong"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "POST",
        "/sync/start",
        Some("wrong"),
        Some(json!({"mode": "incremental"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, "GET", "/sync/status", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
}

#[tokio::test]
async fn test_sync_start_is_single_flight() {
    let h = Harness::new().await;
    h.channel.push(post(1, "2+1, $80,000", 0));
    let gate = h.channel.hold_connect();
    let state = AppState::new(h.engine, TOKEN);
    let app = router(state.clone());

    let start = Some(json!({"mode": "incremental"}));
    let (status, body) = send(&app, "POST", "/sync/start", Some(TOKEN), start.clone()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["running"], true);
    assert_eq!(body["mode"], "incremental");

    let (status, body) = send(&app, "POST", "/sync/start", Some(TOKEN), start.clone()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["running"], true);

    gate.notify_one();
    let finished = wait_for_finish(&app).await;
    assert_eq!(finished["last_exit"], "success");
    assert_eq!(finished["last_report"]["processed"], 1);
    assert!(finished["finished_at"].is_string());

    // Extraction ran over the touched listing
    assert_eq!(finished["last_extraction"]["scanned"], 1);
    let pool = state.controller().engine().pool();
    assert_eq!(count(pool, "listings").await, 1);

    let (status, _) = send(&app, "POST", "/sync/start", Some(TOKEN), start).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_guard_trip_is_reported_as_error() {
    let h = Harness::new().await;
    for id in 1..=25 {
        h.channel.push(post(id, &format!("объявление {} $100,000", id), 1));
    }
    h.engine.run_backfill().await.unwrap();
    for id in 1..=20 {
        h.channel.remove(id);
    }
    let state = AppState::new(h.engine, TOKEN);
    let app = router(state.clone());

    let (status, _) = send(
        &app,
        "POST",
        "/sync/start",
        Some(TOKEN),
        Some(json!({"mode": "check_deleted"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let finished = wait_for_finish(&app).await;
    assert_eq!(finished["last_exit"], "error");
    assert_eq!(finished["mode"], "check_deleted");
    let message = finished["last_error"].as_str().unwrap();
    assert!(message.contains("safety guard"));
    assert!(message.contains("20 of 25"));
    assert!(finished["last_report"].is_null());

    let pool = state.controller().engine().pool();
    assert_eq!(count(pool, "listings").await, 25);
    assert_eq!(count(pool, "excluded_listings").await, 0);
}

#[tokio::test]
async fn test_panicking_run_releases_the_controller() {
    let h = Harness::new().await;
    h.channel.panic_on_connect(true);
    let channel = h.channel.clone();
    let app = router(AppState::new(h.engine, TOKEN));
    let start = Some(json!({"mode": "incremental"}));

    let (status, _) = send(&app, "POST", "/sync/start", Some(TOKEN), start.clone()).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let finished = wait_for_finish(&app).await;
    assert_eq!(finished["last_exit"], "error");
    assert!(finished["last_error"]
        .as_str()
        .unwrap()
        .contains("sync run aborted"));

    channel.panic_on_connect(false);
    let (status, _) = send(&app, "POST", "/sync/start", Some(TOKEN), start).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let finished = wait_for_finish(&app).await;
    assert_eq!(finished["last_exit"], "success");
}

#[tokio::test]
async fn test_listing_get_patch_delete() {
    let h = Harness::new().await;
    h.channel
        .push_photo(post(42, "ЖК Vake Park\n2+1, 85 м²", 1), b"jpeg".to_vec());
    h.engine.run_backfill().await.unwrap();
    let id = listing_id_for_key(h.pool(), 42).await;
    let state = AppState::new(h.engine, TOKEN);
    let app = router(state.clone());
    let uri = format!("/listings/{}", id);

    let (status, body) = send(&app, "GET", "/listings/nope", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, body) = send(&app, "GET", &uri, Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message_id"], 42);
    assert_eq!(body["images"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        "PATCH",
        &uri,
        Some(TOKEN),
        Some(json!({"price_value": 95000, "floor": 4, "district": "Vake"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["price_value"], 95000.0);
    assert_eq!(body["price_currency"], "USD");
    assert_eq!(body["price_usd"], 95000.0);
    assert_eq!(body["floor"], 4);
    assert_eq!(body["district"], "Vake");

    let (status, body) = send(&app, "PATCH", &uri, Some(TOKEN), Some(json!({"floor": null}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["floor"].is_null());
    assert_eq!(body["district"], "Vake");

    let (status, body) = send(
        &app,
        "PATCH",
        &uri,
        Some(TOKEN),
        Some(json!({"condition_norm": "sparkling"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send(
        &app,
        "POST",
        &format!("{}/delete", uri),
        Some(TOKEN),
        Some(json!({"reason": "sold"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], id.as_str());

    let (status, _) = send(&app, "GET", &uri, Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let pool = state.controller().engine().pool();
    let (reason, deleted_by): (String, String) =
        sqlx::query_as("SELECT reason, deleted_by FROM excluded_listings")
            .fetch_one(pool)
            .await
            .unwrap();
    assert_eq!(reason, "sold");
    assert_eq!(deleted_by, "api");
    assert_eq!(count(pool, "media").await, 0);
}

#[tokio::test]
async fn test_delete_without_body_uses_manual_reason() {
    let h = Harness::new().await;
    h.channel.push(post(3, "студия $40,000", 1));
    h.engine.run_backfill().await.unwrap();
    let id = listing_id_for_key(h.pool(), 3).await;
    let state = AppState::new(h.engine, TOKEN);
    let app = router(state.clone());

    let (status, _) = send(&app, "POST", &format!("/listings/{}/delete", id), Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);

    let reason: String = sqlx::query_scalar("SELECT reason FROM excluded_listings")
        .fetch_one(state.controller().engine().pool())
        .await
        .unwrap();
    assert_eq!(reason, "manual");
}
