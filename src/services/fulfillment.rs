use crate::{
    db::DbPool,
    entities::fulfillment_key,
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        allocator::InventoryAllocator,
        carts::CartService,
        purchases::{PurchaseService, RecordUnitsInput},
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DbErr, Set, SqlErr, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
pub const PAYMENT_FAILED: &str = "payment.failed";

/// Inbound payment notification, already authenticated at the boundary.
/// `id` is the provider's opaque event identifier; redeliveries reuse it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// One `(card, quantity)` pair of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub card_id: Uuid,
    pub quantity: i32,
}

/// The two payload shapes the provider sends: the legacy single-card form and
/// the compact cart form (ids and quantities only).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OrderPayload {
    #[serde(rename_all = "camelCase")]
    Cart { user_id: Uuid, items: Vec<LineItem> },
    #[serde(rename_all = "camelCase")]
    Single {
        user_id: Uuid,
        card_id: Uuid,
        quantity: i32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderShape {
    Single,
    Cart,
}

/// Per-item result of a processed order.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Fulfilled {
        card_id: Uuid,
        artist_id: Uuid,
        serial_start: i32,
        quantity: i32,
        unit_price: Decimal,
    },
    SkippedDuplicate {
        card_id: Uuid,
    },
    Failed {
        card_id: Uuid,
        reason: String,
    },
}

/// Order-level result returned to the webhook boundary.
#[derive(Debug)]
pub enum FulfillmentOutcome {
    /// A payment-succeeded order was processed (possibly partially).
    Processed(FulfillmentSummary),
    /// A payment-failed notification was observed; nothing was allocated.
    Observed,
    /// Unrecognized event type; acknowledged and dropped.
    Ignored,
}

#[derive(Debug)]
pub struct FulfillmentSummary {
    pub event_id: String,
    pub user_id: Uuid,
    pub outcomes: Vec<ItemOutcome>,
    pub cart_entries_removed: u64,
}

impl FulfillmentSummary {
    pub fn fulfilled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Fulfilled { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::SkippedDuplicate { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Failed { .. }))
            .count()
    }
}

/// Drives a payment notification through idempotency check, allocation and
/// recording, then clears the payer's fulfilled cart entries.
///
/// Each line item runs in its own transaction: the idempotency key insert,
/// the counter advance and the purchase rows commit together or not at all.
#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    allocator: InventoryAllocator,
    purchases: PurchaseService,
    carts: CartService,
    retry_attempts: u32,
}

impl FulfillmentService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        allocator: InventoryAllocator,
        purchases: PurchaseService,
        carts: CartService,
        retry_attempts: u32,
    ) -> Self {
        Self {
            db,
            event_sender,
            allocator,
            purchases,
            carts,
            retry_attempts: retry_attempts.max(1),
        }
    }

    /// Entry point for the webhook boundary. Dispatches on event type.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process_event(
        &self,
        event: PaymentEvent,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        match event.event_type.as_str() {
            PAYMENT_SUCCEEDED => {
                let summary = self.process_payment_succeeded(&event).await?;
                Ok(FulfillmentOutcome::Processed(summary))
            }
            PAYMENT_FAILED => {
                // Observational only; reserved for future notification logic.
                self.event_sender
                    .send_or_log(Event::PaymentFailureObserved {
                        event_id: event.id.clone(),
                    })
                    .await;
                Ok(FulfillmentOutcome::Observed)
            }
            other => {
                info!(event_type = %other, "Ignoring unhandled event type");
                Ok(FulfillmentOutcome::Ignored)
            }
        }
    }

    async fn process_payment_succeeded(
        &self,
        event: &PaymentEvent,
    ) -> Result<FulfillmentSummary, ServiceError> {
        let (user_id, items, shape) = parse_order(&event.data)?;

        let mut outcomes = Vec::with_capacity(items.len());

        for item in &items {
            match self.process_line_item(event, user_id, item).await {
                Ok(outcome) => {
                    match &outcome {
                        ItemOutcome::Fulfilled {
                            card_id,
                            artist_id,
                            serial_start,
                            quantity,
                            ..
                        } => {
                            // Dispatched only after the item's transaction has
                            // committed; the ledger update rides the event loop.
                            self.event_sender
                                .send_or_log(Event::UnitsAllocated {
                                    event_id: event.id.clone(),
                                    user_id,
                                    card_id: *card_id,
                                    artist_id: *artist_id,
                                    serial_start: *serial_start,
                                    quantity: *quantity,
                                })
                                .await;
                        }
                        ItemOutcome::SkippedDuplicate { card_id } => {
                            self.event_sender
                                .send_or_log(Event::LineItemSkipped {
                                    event_id: event.id.clone(),
                                    card_id: *card_id,
                                })
                                .await;
                        }
                        ItemOutcome::Failed { .. } => {}
                    }
                    outcomes.push(outcome);
                }
                Err(e) if shape == OrderShape::Single => {
                    // A one-item order fails as a whole; the boundary asks the
                    // sender to redeliver. The cart is left untouched.
                    error!(
                        event_id = %event.id,
                        card_id = %item.card_id,
                        error = %e,
                        "Single-item order failed"
                    );
                    counter!("carddrop_fulfillment.item_failures", 1);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        card_id = %item.card_id,
                        error = %e,
                        "Line item failed; continuing with remaining items"
                    );
                    counter!("carddrop_fulfillment.item_failures", 1);
                    self.event_sender
                        .send_or_log(Event::LineItemFailed {
                            event_id: event.id.clone(),
                            card_id: item.card_id,
                            reason: e.to_string(),
                        })
                        .await;
                    outcomes.push(ItemOutcome::Failed {
                        card_id: item.card_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let cart_entries_removed = self.clear_fulfilled_entries(user_id, &outcomes).await;

        info!(
            event_id = %event.id,
            user_id = %user_id,
            items = items.len(),
            cart_entries_removed = cart_entries_removed,
            "Order processed"
        );

        Ok(FulfillmentSummary {
            event_id: event.id.clone(),
            user_id,
            outcomes,
            cart_entries_removed,
        })
    }

    /// Processes one line item, retrying bounded times on transient
    /// datastore contention before giving up on the item.
    async fn process_line_item(
        &self,
        event: &PaymentEvent,
        user_id: Uuid,
        item: &LineItem,
    ) -> Result<ItemOutcome, ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_line_item(event, user_id, item).await {
                Err(ServiceError::AllocationConflict(msg)) if attempt < self.retry_attempts => {
                    warn!(
                        event_id = %event.id,
                        card_id = %item.card_id,
                        attempt = attempt,
                        "Transient allocation conflict, retrying: {}",
                        msg
                    );
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                other => return other,
            }
        }
    }

    async fn try_line_item(
        &self,
        event: &PaymentEvent,
        user_id: Uuid,
        item: &LineItem,
    ) -> Result<ItemOutcome, ServiceError> {
        let txn = self.db.begin().await.map_err(classify_db_error)?;

        // Idempotency guard: the unique (event_id, card_id) insert makes a
        // concurrent or repeated delivery fail here instead of re-allocating.
        let key = fulfillment_key::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(event.id.clone()),
            card_id: Set(item.card_id),
            user_id: Set(user_id),
            quantity: Set(item.quantity),
            created_at: Set(Utc::now()),
        };

        match key.insert(&txn).await {
            Ok(_) => {}
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                txn.rollback().await.map_err(classify_db_error)?;
                counter!("carddrop_fulfillment.duplicates_skipped", 1);
                return Ok(ItemOutcome::SkippedDuplicate {
                    card_id: item.card_id,
                });
            }
            Err(e) => return Err(classify_db_error(e)),
        }

        let receipt = self
            .allocator
            .allocate_on(&txn, item.card_id, item.quantity)
            .await
            .map_err(reclassify)?;

        let serial_start = receipt.previous_count + 1;
        self.purchases
            .record_units_on(
                &txn,
                RecordUnitsInput {
                    user_id,
                    card_id: item.card_id,
                    first_serial: serial_start,
                    quantity: item.quantity,
                    // Authoritative price: what the allocator read under the
                    // row update, not a value from checkout-session creation.
                    unit_price: receipt.unit_price,
                    event_id: event.id.clone(),
                    payment_reference: event.payment_reference.clone(),
                },
            )
            .await
            .map_err(reclassify)?;

        txn.commit().await.map_err(classify_db_error)?;

        counter!(
            "carddrop_fulfillment.units_allocated",
            item.quantity as u64
        );

        Ok(ItemOutcome::Fulfilled {
            card_id: item.card_id,
            artist_id: receipt.artist_id,
            serial_start,
            quantity: item.quantity,
            unit_price: receipt.unit_price,
        })
    }

    /// Clears the payer's entries for the cards that were fulfilled or were
    /// duplicates of an earlier delivery. Entries for failed items stay in
    /// the cart so the user can still see and retry them. Non-critical: a
    /// failure is logged and swallowed, the order is already durable.
    async fn clear_fulfilled_entries(&self, user_id: Uuid, outcomes: &[ItemOutcome]) -> u64 {
        let cleared_cards: Vec<Uuid> = outcomes
            .iter()
            .filter_map(|o| match o {
                ItemOutcome::Fulfilled { card_id, .. }
                | ItemOutcome::SkippedDuplicate { card_id } => Some(*card_id),
                ItemOutcome::Failed { .. } => None,
            })
            .collect();

        if cleared_cards.is_empty() {
            return 0;
        }

        match self
            .carts
            .clear_cards_for_user(user_id, &cleared_cards)
            .await
        {
            Ok(removed) => {
                if removed > 0 {
                    self.event_sender
                        .send_or_log(Event::CartCleared {
                            user_id,
                            entries_removed: removed,
                        })
                        .await;
                }
                removed
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to clear cart entries");
                0
            }
        }
    }
}

/// Normalizes the two payload shapes into a validated item list.
fn parse_order(data: &serde_json::Value) -> Result<(Uuid, Vec<LineItem>, OrderShape), ServiceError> {
    let payload: OrderPayload = serde_json::from_value(data.clone()).map_err(|_| {
        ServiceError::MalformedPayload(
            "order payload matches neither the single-card nor the cart shape".to_string(),
        )
    })?;

    let (user_id, items, shape) = match payload {
        OrderPayload::Single {
            user_id,
            card_id,
            quantity,
        } => (
            user_id,
            vec![LineItem { card_id, quantity }],
            OrderShape::Single,
        ),
        OrderPayload::Cart { user_id, items } => (user_id, items, OrderShape::Cart),
    };

    if items.is_empty() {
        return Err(ServiceError::MalformedPayload(
            "order contains no line items".to_string(),
        ));
    }

    if let Some(bad) = items.iter().find(|i| i.quantity < 1) {
        return Err(ServiceError::MalformedPayload(format!(
            "line item for card {} has non-positive quantity {}",
            bad.card_id, bad.quantity
        )));
    }

    Ok((user_id, items, shape))
}

/// Re-runs classification on errors that bubbled up already wrapped.
fn reclassify(e: ServiceError) -> ServiceError {
    match e {
        ServiceError::DatabaseError(db) => classify_db_error(db),
        other => other,
    }
}

/// Separates retryable datastore contention from hard failures. Lock and
/// serialization errors surface differently per backend, so this goes by the
/// driver message.
fn classify_db_error(e: DbErr) -> ServiceError {
    let msg = e.to_string();
    let lowered = msg.to_lowercase();
    if lowered.contains("database is locked")
        || lowered.contains("deadlock")
        || lowered.contains("could not serialize")
        || lowered.contains("lock timeout")
    {
        ServiceError::AllocationConflict(msg)
    } else {
        ServiceError::DatabaseError(e)
    }
}
