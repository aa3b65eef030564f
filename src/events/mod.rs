use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::memberships::ArtistMembershipService;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A contiguous serial range was allocated and durably recorded.
    UnitsAllocated {
        event_id: String,
        user_id: Uuid,
        card_id: Uuid,
        artist_id: Uuid,
        serial_start: i32,
        quantity: i32,
    },

    /// A redelivered line item was suppressed by the idempotency guard.
    LineItemSkipped { event_id: String, card_id: Uuid },

    /// A line item could not be fulfilled (logged, order continues).
    LineItemFailed {
        event_id: String,
        card_id: Uuid,
        reason: String,
    },

    /// Cart entries removed after an order was processed.
    CartCleared { user_id: Uuid, entries_removed: u64 },

    /// A payment failure notification was observed (no allocation performed).
    PaymentFailureObserved { event_id: String },
}

/// Consumes the event channel and drives best-effort side effects off the
/// fulfillment success path. Must never feed back into allocation.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, memberships: ArtistMembershipService) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::UnitsAllocated {
                ref event_id,
                user_id,
                card_id,
                artist_id,
                serial_start,
                quantity,
            } => {
                info!(
                    event_id = %event_id,
                    card_id = %card_id,
                    artist_id = %artist_id,
                    serial_start = serial_start,
                    quantity = quantity,
                    "Units allocated"
                );
                if let Err(e) = memberships.on_purchase(user_id, card_id).await {
                    // Best-effort: the purchase itself is already durable.
                    error!(
                        user_id = %user_id,
                        card_id = %card_id,
                        error = %e,
                        "Failed to update artist membership"
                    );
                }
            }
            Event::LineItemSkipped {
                ref event_id,
                card_id,
            } => {
                info!(event_id = %event_id, card_id = %card_id, "Duplicate line item skipped");
            }
            Event::LineItemFailed {
                ref event_id,
                card_id,
                ref reason,
            } => {
                warn!(event_id = %event_id, card_id = %card_id, reason = %reason, "Line item failed");
            }
            Event::CartCleared {
                user_id,
                entries_removed,
            } => {
                info!(user_id = %user_id, entries_removed = entries_removed, "Cart cleared");
            }
            Event::PaymentFailureObserved { ref event_id } => {
                info!(event_id = %event_id, "Payment failure observed");
            }
        }
    }

    info!("Event processing loop stopped");
}
