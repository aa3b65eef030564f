use crate::{db::DbPool, entities::card::Entity as CardEntity, errors::ServiceError};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DbBackend, EntityTrait, Statement};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Result of a successful allocation: the issued count before this call and
/// the unit price as of allocation time. Serial numbers for the batch are
/// `previous_count + 1 ..= previous_count + quantity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationReceipt {
    pub previous_count: i32,
    pub unit_price: Decimal,
    pub artist_id: Uuid,
}

/// Advances a card's issued-unit counter.
///
/// The advance is one conditional `UPDATE .. RETURNING` statement keyed on the
/// card row, so concurrent allocations serialize per card at the datastore and
/// no two callers can observe the same previous count. A capped card can never
/// be pushed past `total_supply`.
#[derive(Clone)]
pub struct InventoryAllocator {
    db: Arc<DbPool>,
}

impl InventoryAllocator {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Allocates `quantity` units of `card_id` directly against the pool.
    #[instrument(skip(self))]
    pub async fn allocate(
        &self,
        card_id: Uuid,
        quantity: i32,
    ) -> Result<AllocationReceipt, ServiceError> {
        self.allocate_on(&*self.db, card_id, quantity).await
    }

    /// Allocates within a caller-supplied connection or transaction, so the
    /// counter advance can commit atomically with the purchase records.
    pub async fn allocate_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        card_id: Uuid,
        quantity: i32,
    ) -> Result<AllocationReceipt, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "allocation quantity must be positive, got {}",
                quantity
            )));
        }

        let backend = conn.get_database_backend();
        let now = Utc::now();

        let stmt = match backend {
            DbBackend::Postgres => Statement::from_sql_and_values(
                backend,
                r#"UPDATE cards
                   SET current_supply = current_supply + $1, updated_at = $2
                   WHERE id = $3
                     AND (total_supply IS NULL OR current_supply + $1 <= total_supply)
                   RETURNING current_supply - $1 AS previous_count, price, artist_id"#,
                vec![quantity.into(), now.into(), card_id.into()],
            ),
            _ => Statement::from_sql_and_values(
                backend,
                r#"UPDATE cards
                   SET current_supply = current_supply + ?, updated_at = ?
                   WHERE id = ?
                     AND (total_supply IS NULL OR current_supply + ? <= total_supply)
                   RETURNING current_supply - ? AS previous_count, price, artist_id"#,
                vec![
                    quantity.into(),
                    now.into(),
                    card_id.into(),
                    quantity.into(),
                    quantity.into(),
                ],
            ),
        };

        let row = conn.query_one(stmt).await?;

        match row {
            Some(row) => {
                let previous_count: i32 = row.try_get("", "previous_count")?;
                let unit_price: Decimal = row.try_get("", "price")?;
                let artist_id: Uuid = row.try_get("", "artist_id")?;
                Ok(AllocationReceipt {
                    previous_count,
                    unit_price,
                    artist_id,
                })
            }
            // The guarded update matched nothing: either the card does not
            // exist, or granting the request would exceed the cap.
            None => match CardEntity::find_by_id(card_id).one(conn).await? {
                Some(card) => {
                    let remaining = card
                        .total_supply
                        .map(|cap| cap - card.current_supply)
                        .unwrap_or(i32::MAX);
                    warn!(
                        card_id = %card_id,
                        requested = quantity,
                        remaining = remaining,
                        "Allocation refused: insufficient supply"
                    );
                    Err(ServiceError::OutOfStock(format!(
                        "card {} has {} of {} units remaining, requested {}",
                        card_id,
                        remaining,
                        card.total_supply.unwrap_or(0),
                        quantity
                    )))
                }
                None => Err(ServiceError::NotFound(format!("card {} not found", card_id))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_positive_quantity() {
        let db = Arc::new(sea_orm::DatabaseConnection::Disconnected);
        let allocator = InventoryAllocator::new(db);

        let err = allocator.allocate(Uuid::new_v4(), 0).await.unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));

        let err = allocator.allocate(Uuid::new_v4(), -3).await.unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }
}
