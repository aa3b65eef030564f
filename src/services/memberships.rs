use crate::{
    db::DbPool,
    entities::{
        artist_member,
        artist_member_ledger::{self, Entity as LedgerEntity},
        card::Entity as CardEntity,
    },
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DbBackend, EntityTrait, Set, SqlErr, Statement,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Maintains the per-artist distinct-purchaser ledger.
///
/// Best-effort from the pipeline's point of view: invoked off the success
/// path, and a failure here never unwinds an allocation. The membership row's
/// uniqueness constraint is what keeps the count from ever running high; a
/// user is counted at most once per artist no matter how purchases interleave.
#[derive(Clone)]
pub struct ArtistMembershipService {
    db: Arc<DbPool>,
}

impl ArtistMembershipService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Registers a purchase by `user_id` of `card_id`. Increments the card's
    /// artist member counter iff this is the user's first purchase from that
    /// artist. Returns whether a new member was counted.
    #[instrument(skip(self))]
    pub async fn on_purchase(&self, user_id: Uuid, card_id: Uuid) -> Result<bool, ServiceError> {
        let card = CardEntity::find_by_id(card_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("card {} not found", card_id)))?;
        let artist_id = card.artist_id;

        let txn = self.db.begin().await?;

        let member = artist_member::ActiveModel {
            id: Set(Uuid::new_v4()),
            artist_id: Set(artist_id),
            user_id: Set(user_id),
            first_purchase_at: Set(Utc::now()),
        };

        match member.insert(&txn).await {
            Ok(_) => {}
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                debug!(
                    artist_id = %artist_id,
                    user_id = %user_id,
                    "User already counted for artist"
                );
                txn.rollback().await?;
                return Ok(false);
            }
            Err(e) => return Err(ServiceError::DatabaseError(e)),
        }

        Self::increment_ledger(&txn, artist_id).await?;

        txn.commit().await?;

        info!(artist_id = %artist_id, user_id = %user_id, "New artist member counted");
        Ok(true)
    }

    /// Current member count for an artist. Zero when no ledger row exists yet.
    pub async fn member_count(&self, artist_id: Uuid) -> Result<i32, ServiceError> {
        let row = LedgerEntity::find_by_id(artist_id).one(&*self.db).await?;
        Ok(row.map(|r| r.member_count).unwrap_or(0))
    }

    async fn increment_ledger<C: ConnectionTrait>(
        conn: &C,
        artist_id: Uuid,
    ) -> Result<(), ServiceError> {
        let affected = conn
            .execute(Self::increment_stmt(conn.get_database_backend(), artist_id))
            .await?
            .rows_affected();

        if affected > 0 {
            return Ok(());
        }

        // First member for this artist; create the ledger row. A concurrent
        // creator loses the insert race and falls back to the increment.
        let ledger = artist_member_ledger::ActiveModel {
            artist_id: Set(artist_id),
            member_count: Set(1),
            updated_at: Set(Some(Utc::now())),
        };

        match ledger.insert(conn).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                conn.execute(Self::increment_stmt(conn.get_database_backend(), artist_id))
                    .await?;
                Ok(())
            }
            Err(e) => Err(ServiceError::DatabaseError(e)),
        }
    }

    fn increment_stmt(backend: DbBackend, artist_id: Uuid) -> Statement {
        let now = Utc::now();
        match backend {
            DbBackend::Postgres => Statement::from_sql_and_values(
                backend,
                r#"UPDATE artist_member_ledgers
                   SET member_count = member_count + 1, updated_at = $1
                   WHERE artist_id = $2"#,
                vec![now.into(), artist_id.into()],
            ),
            _ => Statement::from_sql_and_values(
                backend,
                r#"UPDATE artist_member_ledgers
                   SET member_count = member_count + 1, updated_at = ?
                   WHERE artist_id = ?"#,
                vec![now.into(), artist_id.into()],
            ),
        }
    }
}
