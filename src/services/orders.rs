use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::middleware_helpers::{with_retry, DbRetryPolicy, RetryConfig};
use crate::repositories::{CatalogStore, OrderFilter, OrderLedger, StockRef};

pub const DEFAULT_CANCELLATION_REASON: &str = "Cancelled by customer";

#[derive(Debug, Clone)]
pub struct OrderDetail {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusView {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub order: order::Model,
    pub restored_units: i64,
}

/// Rejects orders that can no longer be canceled
fn ensure_cancellable(order: &order::Model) -> Result<(), ServiceError> {
    match order.status {
        s if s.has_shipped() => Err(ServiceError::OrderAlreadyShipped(order.order_number.clone())),
        OrderStatus::Canceled => Err(ServiceError::OrderAlreadyCanceled(
            order.order_number.clone(),
        )),
        s if s.is_cancellable() => Ok(()),
        s => Err(ServiceError::InvalidStatus(format!(
            "order {} is {} and cannot be canceled",
            order.order_number, s
        ))),
    }
}

/// Reads and cancellations on the order ledger
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    retry: RetryConfig,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, retry: RetryConfig) -> Self {
        Self {
            db,
            event_sender,
            retry,
        }
    }

    #[instrument(skip(self, actor))]
    pub async fn get(&self, actor: &Actor, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let scope = actor.order_scope()?;
        let order = OrderLedger::find_for_owner(&*self.db, order_id, scope)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;
        let items = OrderLedger::items_for(&*self.db, order.id).await?;
        Ok(OrderDetail { order, items })
    }

    #[instrument(skip(self, actor))]
    pub async fn status(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<OrderStatusView, ServiceError> {
        let scope = actor.order_scope()?;
        let order = OrderLedger::find_for_owner(&*self.db, order_id, scope)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;
        Ok(OrderStatusView {
            order_id: order.id,
            order_number: order.order_number,
            status: order.status,
            payment_status: order.payment_status,
            updated_at: order.updated_at,
        })
    }

    /// Customers see their own orders, admins see everything
    #[instrument(skip(self, actor))]
    pub async fn list(
        &self,
        actor: &Actor,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let filter = OrderFilter {
            user_id: actor.order_scope()?,
            status,
        };
        Ok(OrderLedger::list(&*self.db, &filter, page, per_page).await?)
    }

    /// Cancels the order and returns every reserved unit to stock
    #[instrument(skip(self, actor, reason))]
    pub async fn cancel_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<CancelOutcome, ServiceError> {
        let scope = actor.order_scope()?;
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CANCELLATION_REASON.to_string());

        let outcome = with_retry(&self.retry, DbRetryPolicy, || {
            self.cancel_once(order_id, scope, &reason)
        })
        .await?;

        counter!("storefront.orders.canceled", 1);
        info!(
            order_id = %outcome.order.id,
            order_number = %outcome.order.order_number,
            restored_units = outcome.restored_units,
            "Order canceled"
        );
        self.event_sender.publish(Event::OrderCanceled {
            order_id: outcome.order.id,
            restored_units: outcome.restored_units,
        });
        Ok(outcome)
    }

    async fn cancel_once(
        &self,
        order_id: Uuid,
        scope: Option<Uuid>,
        reason: &str,
    ) -> Result<CancelOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderLedger::find_for_owner(&txn, order_id, scope)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;
        ensure_cancellable(&order)?;

        if !OrderLedger::cancel(&txn, order.id, reason).await? {
            // Lost the race: report whatever state the winner left behind
            let current = OrderLedger::find_by_id(&txn, order.id)
                .await?
                .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;
            ensure_cancellable(&current)?;
            return Err(ServiceError::InvalidStatus(format!(
                "order {} changed during cancellation",
                current.order_number
            )));
        }

        let mut restored_units = 0i64;
        for item in OrderLedger::items_for(&txn, order.id).await? {
            let stock = StockRef::for_line(item.product_id, item.variant_id);
            if CatalogStore::increment_stock(&txn, stock, item.quantity).await? {
                restored_units += i64::from(item.quantity);
            } else {
                warn!(order_id = %order.id, ?stock, "Stock row missing, units not restored");
            }
        }

        let order = OrderLedger::find_by_id(&txn, order.id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;
        txn.commit().await?;

        Ok(CancelOutcome {
            order,
            restored_units,
        })
    }
}
