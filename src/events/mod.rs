use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::notifications::OrderConfirmation;

/// Handle for publishing domain events to the background worker
#[derive(Clone, Debug)]
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

    /// Publishes without waiting for channel capacity; drops and logs when full
    pub fn publish(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping event: {}", e);
            counter!("storefront.events.dropped", 1);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        total_amount: Decimal,
    },
    OrderCanceled {
        order_id: Uuid,
        restored_units: i64,
    },
    PaymentCaptured {
        order_id: Uuid,
        capture_id: String,
    },
    PaymentRefunded {
        order_id: Uuid,
    },
    OrderConfirmationRequested(OrderConfirmation),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderPlaced { .. } => "order_placed",
            Event::OrderCanceled { .. } => "order_canceled",
            Event::PaymentCaptured { .. } => "payment_captured",
            Event::PaymentRefunded { .. } => "payment_refunded",
            Event::OrderConfirmationRequested(_) => "order_confirmation_requested",
        }
    }
}

/// Drains the event channel until every sender is dropped
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("storefront.events.processed", 1, "event" => event.name());

        if let Err(e) = handle_event(&event) {
            error!(event = event.name(), error = %e, "Failed to handle event");
        }
    }

    info!("Event processing loop stopped");
}

fn handle_event(event: &Event) -> Result<(), String> {
    match event {
        Event::OrderPlaced {
            order_id,
            order_number,
            total_amount,
        } => {
            info!(%order_id, %order_number, %total_amount, "order placed");
        }
        Event::OrderCanceled {
            order_id,
            restored_units,
        } => {
            info!(%order_id, restored_units, "order canceled");
        }
        Event::PaymentCaptured {
            order_id,
            capture_id,
        } => {
            info!(%order_id, %capture_id, "payment captured");
        }
        Event::PaymentRefunded { order_id } => {
            info!(%order_id, "payment refunded");
        }
        Event::OrderConfirmationRequested(confirmation) => {
            if confirmation.email.trim().is_empty() {
                return Err(format!(
                    "order {} has no recipient for its confirmation",
                    confirmation.order_number
                ));
            }
            // Rendering and delivery happen outside this service
            info!(
                order_number = %confirmation.order_number,
                email = %confirmation.email,
                lines = confirmation.lines.len(),
                "order confirmation handed off"
            );
        }
    }
    Ok(())
}
