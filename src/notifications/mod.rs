use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::entities::{order, order_item};
use crate::events::{Event, EventSender};
use crate::services::pricing::round_money;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel closed: {0}")]
    ChannelClosed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationLine {
    pub name: String,
    pub quantity: i32,
    pub subtotal: Decimal,
}

/// Everything a confirmation message needs, detached from the database rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub email: String,
    pub order_id: Uuid,
    pub order_number: String,
    pub currency: String,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total_amount: Decimal,
    pub lines: Vec<ConfirmationLine>,
}

impl OrderConfirmation {
    pub fn from_order(order: &order::Model, items: &[order_item::Model]) -> Self {
        let lines = items
            .iter()
            .map(|item| ConfirmationLine {
                name: item
                    .product_snapshot
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Item")
                    .to_string(),
                quantity: item.quantity,
                subtotal: round_money(item.subtotal),
            })
            .collect();

        Self {
            email: order.email.clone(),
            order_id: order.id,
            order_number: order.order_number.clone(),
            currency: order.currency.clone(),
            subtotal: round_money(order.subtotal),
            delivery_fee: round_money(order.delivery_fee),
            discount: round_money(order.discount),
            tax: round_money(order.tax),
            total_amount: round_money(order.total_amount),
            lines,
        }
    }
}

/// Outbound customer notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotifyError>;
}

/// Hands confirmations to the background event worker
pub struct QueuedNotifier {
    events: EventSender,
}

impl QueuedNotifier {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Notifier for QueuedNotifier {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotifyError> {
        self.events
            .send(Event::OrderConfirmationRequested(confirmation))
            .await
            .map_err(NotifyError::ChannelClosed)
    }
}
