//! Carddrop API Library
//!
//! Backend for the Carddrop storefront: serial-numbered inventory allocation
//! and payment fulfillment for limited-edition artist card drops.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use handlers::payment_webhooks::SignatureVerifier;
use services::{
    allocator::InventoryAllocator, carts::CartService, fulfillment::FulfillmentService,
    memberships::ArtistMembershipService, purchases::PurchaseService,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub allocator: InventoryAllocator,
    pub purchases: PurchaseService,
    pub carts: CartService,
    pub memberships: ArtistMembershipService,
    pub fulfillment: FulfillmentService,
    pub signature_verifier: Option<Arc<SignatureVerifier>>,
}

impl AppState {
    /// Wires the service graph from a connection pool and configuration.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let allocator = InventoryAllocator::new(db.clone());
        let purchases = PurchaseService::new(db.clone());
        let carts = CartService::new(db.clone());
        let memberships = ArtistMembershipService::new(db.clone());
        let fulfillment = FulfillmentService::new(
            db.clone(),
            event_sender.clone(),
            allocator.clone(),
            purchases.clone(),
            carts.clone(),
            config.allocation_retry_attempts,
        );

        let signature_verifier = config.webhook_secret.clone().map(|secret| {
            Arc::new(SignatureVerifier::new(
                secret,
                config.webhook_timestamp_tolerance_secs,
            ))
        });

        Self {
            db,
            config,
            event_sender,
            allocator,
            purchases,
            carts,
            memberships,
            fulfillment,
            signature_verifier,
        }
    }
}

/// Builds the HTTP application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(handlers::health::health_routes())
        .merge(handlers::purchases::purchase_routes())
        .nest("/webhooks", handlers::payment_webhooks::webhook_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
