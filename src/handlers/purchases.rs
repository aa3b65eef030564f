use crate::{
    entities::purchase_record,
    handlers::common::{map_service_error, success_response, PaginatedResponse, PaginationParams},
    errors::ApiError,
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for purchase history endpoints
pub fn purchase_routes() -> Router<Arc<AppState>> {
    Router::new().route("/users/:user_id/purchases", get(list_user_purchases))
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub id: Uuid,
    pub card_id: Uuid,
    pub serial_number: i32,
    pub price_paid: Decimal,
    pub status: purchase_record::PurchaseStatus,
    pub purchased_at: DateTime<Utc>,
}

impl From<purchase_record::Model> for PurchaseResponse {
    fn from(model: purchase_record::Model) -> Self {
        Self {
            id: model.id,
            card_id: model.card_id,
            serial_number: model.serial_number,
            price_paid: model.price_paid,
            status: model.status,
            purchased_at: model.purchased_at,
        }
    }
}

/// Lists a user's purchases for the collection view.
async fn list_user_purchases(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (records, total) = state
        .purchases
        .list_for_user(user_id, pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    let data: Vec<PurchaseResponse> = records.into_iter().map(Into::into).collect();

    Ok(success_response(PaginatedResponse::new(
        data,
        pagination.page,
        pagination.per_page,
        total,
    )))
}
