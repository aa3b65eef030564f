mod common;

use axum::http::StatusCode;
use carddrop_api::handlers::payment_webhooks::{
    SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use common::{cart_event, response_json, single_event, TestApp};
use rust_decimal::Decimal;
use uuid::Uuid;

const SECRET: &str = "whsec_boundary_test_secret";

fn signed_headers(body: &str) -> Vec<(&'static str, String)> {
    let verifier = SignatureVerifier::new(SECRET.to_string(), 300);
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = verifier.sign(&timestamp, body.as_bytes());
    vec![
        (TIMESTAMP_HEADER, timestamp),
        (SIGNATURE_HEADER, signature),
    ]
}

#[tokio::test]
async fn unsigned_deliveries_are_rejected_when_a_secret_is_configured() {
    let app = TestApp::with_webhook_secret(Some(SECRET)).await;
    let body = single_event("evt_unsigned", Uuid::new_v4(), Uuid::new_v4(), 1);

    let response = app.post_webhook(&body, &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tampered_deliveries_are_rejected() {
    let app = TestApp::with_webhook_secret(Some(SECRET)).await;
    let body = single_event("evt_tampered", Uuid::new_v4(), Uuid::new_v4(), 1);
    let mut headers = signed_headers(&body);
    headers[1].1 = "0".repeat(64);

    let response = app.post_webhook(&body, &headers).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signed_delivery_is_processed_end_to_end() {
    let app = TestApp::with_webhook_secret(Some(SECRET)).await;
    let user = Uuid::new_v4();
    let card = app
        .seed_card(Uuid::new_v4(), "Signed Drop", Decimal::from(20), Some(3))
        .await;

    let body = single_event("evt_signed", user, card.id, 2);
    let headers = signed_headers(&body);

    let response = app.post_webhook(&body, &headers).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["status"], "processed");
    assert_eq!(json["fulfilled"], 1);
    assert_eq!(json["failed"], 0);

    assert_eq!(app.reload_card(card.id).await.current_supply, 2);
}

#[tokio::test]
async fn sold_out_single_item_order_asks_for_redelivery() {
    let app = TestApp::new().await;
    let card = app
        .seed_card(Uuid::new_v4(), "Sold Out", Decimal::from(20), Some(0))
        .await;

    let body = single_event("evt_503", Uuid::new_v4(), card.id, 1);
    let response = app.post_webhook(&body, &[]).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn partially_fulfilled_cart_order_is_acknowledged() {
    let app = TestApp::new().await;
    let available = app
        .seed_card(Uuid::new_v4(), "Available", Decimal::from(4), Some(5))
        .await;
    let sold_out = app
        .seed_card(Uuid::new_v4(), "Gone", Decimal::from(4), Some(0))
        .await;

    let body = cart_event(
        "evt_partial_ack",
        Uuid::new_v4(),
        &[(available.id, 1), (sold_out.id, 1)],
    );
    let response = app.post_webhook(&body, &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["status"], "processed");
    assert_eq!(json["fulfilled"], 1);
    assert_eq!(json["failed"], 1);
}

#[tokio::test]
async fn undecodable_bodies_are_acknowledged_and_dropped() {
    let app = TestApp::new().await;

    let response = app.post_webhook("this is not json", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["status"], "dropped");
}

#[tokio::test]
async fn malformed_order_payloads_are_acknowledged_and_dropped() {
    let app = TestApp::new().await;

    let body = serde_json::json!({
        "id": "evt_bad_payload",
        "type": "payment.succeeded",
        "data": { "userId": Uuid::new_v4() }
    })
    .to_string();

    let response = app.post_webhook(&body, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["status"], "dropped");
}

#[tokio::test]
async fn payment_failed_notifications_are_acknowledged() {
    let app = TestApp::new().await;

    let body = serde_json::json!({
        "id": "evt_observed",
        "type": "payment.failed",
        "data": {}
    })
    .to_string();

    let response = app.post_webhook(&body, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["status"], "observed");
}

#[tokio::test]
async fn purchase_history_lists_allocated_units() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let card = app
        .seed_card(Uuid::new_v4(), "History", Decimal::from(11), Some(10))
        .await;

    let body = single_event("evt_history", user, card.id, 3);
    let response = app.post_webhook(&body, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get(&format!("/users/{}/purchases", user)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["pagination"]["total"], 3);
    let serials: Vec<i64> = json["data"]
        .as_array()
        .expect("data array")
        .iter()
        .map(|r| r["serial_number"].as_i64().expect("serial"))
        .collect();
    assert_eq!(serials.len(), 3);
    for serial in 1..=3 {
        assert!(serials.contains(&serial));
    }
}

#[tokio::test]
async fn health_endpoint_reports_database_reachability() {
    let app = TestApp::new().await;

    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["status"], "ok");
}
