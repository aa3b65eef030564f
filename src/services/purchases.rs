use crate::{
    db::DbPool,
    entities::purchase_record::{self, Entity as PurchaseRecordEntity, PurchaseStatus},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

/// Input for recording one allocated serial range.
#[derive(Debug, Clone)]
pub struct RecordUnitsInput {
    pub user_id: Uuid,
    pub card_id: Uuid,
    /// First serial of the batch (`previous_count + 1` from the allocator).
    pub first_serial: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub event_id: String,
    pub payment_reference: Option<String>,
}

/// Persists one durable purchase record per allocated unit.
#[derive(Clone)]
pub struct PurchaseService {
    db: Arc<DbPool>,
}

impl PurchaseService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Inserts one completed record per serial in the batch. Runs on the
    /// caller's connection so it can share the allocation transaction.
    ///
    /// A `(card_id, serial_number)` collision means the allocator's guarantee
    /// was violated somewhere upstream; it surfaces as `DuplicateSerial` and
    /// must never be retried.
    pub async fn record_units_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        input: RecordUnitsInput,
    ) -> Result<Vec<purchase_record::Model>, ServiceError> {
        let now = Utc::now();
        let mut records = Vec::with_capacity(input.quantity as usize);

        for offset in 0..input.quantity {
            let serial_number = input.first_serial + offset;
            let record = purchase_record::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(input.user_id),
                card_id: Set(input.card_id),
                serial_number: Set(serial_number),
                price_paid: Set(input.unit_price),
                quantity_in_order: Set(input.quantity),
                event_id: Set(input.event_id.clone()),
                payment_reference: Set(input.payment_reference.clone()),
                status: Set(PurchaseStatus::Completed),
                purchased_at: Set(now),
            };

            let model = record.insert(conn).await.map_err(|e| {
                if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    error!(
                        card_id = %input.card_id,
                        serial_number = serial_number,
                        event_id = %input.event_id,
                        "Serial collision while recording purchase"
                    );
                    ServiceError::DuplicateSerial(format!(
                        "card {} serial {} already recorded",
                        input.card_id, serial_number
                    ))
                } else {
                    ServiceError::DatabaseError(e)
                }
            })?;

            records.push(model);
        }

        Ok(records)
    }

    /// Lists a user's purchase records, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<purchase_record::Model>, u64), ServiceError> {
        let paginator = PurchaseRecordEntity::find()
            .filter(purchase_record::Column::UserId.eq(user_id))
            .order_by_desc(purchase_record::Column::PurchasedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let records = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((records, total))
    }

    /// Count of completed records for a card. Together with the card row's
    /// `current_supply` this is the reconciliation invariant.
    pub async fn completed_count_for_card(&self, card_id: Uuid) -> Result<u64, ServiceError> {
        let count = PurchaseRecordEntity::find()
            .filter(purchase_record::Column::CardId.eq(card_id))
            .filter(purchase_record::Column::Status.eq(PurchaseStatus::Completed))
            .count(&*self.db)
            .await?;
        Ok(count)
    }
}
