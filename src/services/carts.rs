use crate::{
    db::DbPool,
    entities::cart_entry::{self, Entity as CartEntryEntity},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Manages a user's pending cart entries. Creation belongs to the shopping
/// flow; this service exists for the fulfillment pipeline's clearing step and
/// for the shopping flow's persistence seam.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
}

impl CartService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Adds a pending entry for a user.
    #[instrument(skip(self))]
    pub async fn add_entry(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        quantity: i32,
    ) -> Result<cart_entry::Model, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "cart quantity must be positive, got {}",
                quantity
            )));
        }

        let entry = cart_entry::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            card_id: Set(card_id),
            quantity: Set(quantity),
            created_at: Set(Utc::now()),
        };

        Ok(entry.insert(&*self.db).await?)
    }

    /// All pending entries for a user.
    #[instrument(skip(self))]
    pub async fn entries_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<cart_entry::Model>, ServiceError> {
        let entries = CartEntryEntity::find()
            .filter(cart_entry::Column::UserId.eq(user_id))
            .all(&*self.db)
            .await?;
        Ok(entries)
    }

    /// Removes every entry for the user. Returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn clear_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = CartEntryEntity::delete_many()
            .filter(cart_entry::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Removes the user's entries for the given cards only, leaving the rest
    /// of the cart visible. Returns the number of rows removed.
    #[instrument(skip(self, card_ids))]
    pub async fn clear_cards_for_user(
        &self,
        user_id: Uuid,
        card_ids: &[Uuid],
    ) -> Result<u64, ServiceError> {
        if card_ids.is_empty() {
            return Ok(0);
        }

        let result = CartEntryEntity::delete_many()
            .filter(cart_entry::Column::UserId.eq(user_id))
            .filter(cart_entry::Column::CardId.is_in(card_ids.iter().copied()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
