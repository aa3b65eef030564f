#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, Response, StatusCode},
    Router,
};
use carddrop_api::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::card,
    events::{self, EventSender},
    AppState,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Helper harness for spinning up an application state backed by a
/// throwaway SQLite database with the embedded migrations applied.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
    _event_task: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_webhook_secret(None).await
    }

    /// Same, with inbound signature verification enabled.
    pub async fn with_webhook_secret(secret: Option<&str>) -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let db_path = tmp.path().join("carddrop_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.webhook_secret = secret.map(|s| s.to_string());
        cfg.db_max_connections = 8;

        let db_cfg = DbConfig {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&db_cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("run migrations");

        let db_arc = Arc::new(pool);
        let (tx, rx) = mpsc::channel(256);
        let event_sender = EventSender::new(tx);

        let state = Arc::new(AppState::new(db_arc, cfg, event_sender));
        let event_task = tokio::spawn(events::process_events(rx, state.memberships.clone()));

        let router = carddrop_api::app(state.clone());

        Self {
            state,
            router,
            _event_task: event_task,
            _tmp: tmp,
        }
    }

    /// Inserts a card row directly; catalog management is outside this crate.
    pub async fn seed_card(
        &self,
        artist_id: Uuid,
        name: &str,
        price: Decimal,
        total_supply: Option<i32>,
    ) -> card::Model {
        let model = card::ActiveModel {
            id: Set(Uuid::new_v4()),
            artist_id: Set(artist_id),
            name: Set(name.to_string()),
            price: Set(price),
            total_supply: Set(total_supply),
            current_supply: Set(0),
            created_at: Set(Utc::now()),
            updated_at: Set(Some(Utc::now())),
        };
        model.insert(&*self.state.db).await.expect("seed card")
    }

    /// Re-reads a card row.
    pub async fn reload_card(&self, card_id: Uuid) -> card::Model {
        card::Entity::find_by_id(card_id)
            .one(&*self.state.db)
            .await
            .expect("query card")
            .expect("card exists")
    }

    /// Posts a raw body to the payment webhook endpoint.
    pub async fn post_webhook(&self, body: &str, headers: &[(&str, String)]) -> Response<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/payments")
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder.body(Body::from(body.to_string())).expect("request");

        self.router.clone().oneshot(request).await.expect("response")
    }

    /// Issues a GET against the app router.
    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request");

        self.router.clone().oneshot(request).await.expect("response")
    }

    /// Polls the member ledger until it reaches `expected` or times out.
    /// Membership updates ride the event loop, so tests wait rather than
    /// assert immediately.
    pub async fn wait_for_member_count(&self, artist_id: Uuid, expected: i32) -> bool {
        for _ in 0..50 {
            let count = self
                .state
                .memberships
                .member_count(artist_id)
                .await
                .expect("member count");
            if count == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        false
    }
}

/// Response body as JSON.
pub async fn response_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected);
}

/// Single-card payment event body.
pub fn single_event(event_id: &str, user_id: Uuid, card_id: Uuid, quantity: i32) -> String {
    serde_json::json!({
        "id": event_id,
        "type": "payment.succeeded",
        "paymentReference": format!("pay_{event_id}"),
        "data": { "userId": user_id, "cardId": card_id, "quantity": quantity }
    })
    .to_string()
}

/// Cart-shaped payment event body.
pub fn cart_event(event_id: &str, user_id: Uuid, items: &[(Uuid, i32)]) -> String {
    let items: Vec<serde_json::Value> = items
        .iter()
        .map(|(card_id, quantity)| {
            serde_json::json!({ "cardId": card_id, "quantity": quantity })
        })
        .collect();
    serde_json::json!({
        "id": event_id,
        "type": "payment.succeeded",
        "paymentReference": format!("pay_{event_id}"),
        "data": { "userId": user_id, "items": items }
    })
    .to_string()
}
