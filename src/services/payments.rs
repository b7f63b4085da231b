//! PayPal capture and webhook reconciliation.
//!
//! Both paths funnel into the same guarded ledger updates, so a capture that
//! arrives twice (redirect plus webhook, or a redelivered webhook) is applied
//! once and keeps the first `paid_at`.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::clients::PaymentGateway;
use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::entities::PaymentMethod;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::notifications::{Notifier, OrderConfirmation};
use crate::repositories::OrderLedger;
use crate::services::post_commit::open_payment_order;
use crate::webhooks::{WebhookAction, WebhookEvent};

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub order: order::Model,
    pub capture_status: String,
    pub already_captured: bool,
}

#[derive(Debug, Clone)]
pub struct PaymentOrderOutcome {
    pub order: order::Model,
    pub approval_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    AlreadyApplied,
    /// A capture for an order that can no longer take payment
    Mismatch,
    Ignored,
}

impl WebhookOutcome {
    fn as_str(self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::AlreadyApplied => "already_applied",
            WebhookOutcome::Mismatch => "mismatch",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub paypal_order_id: Option<String>,
    pub paypal_capture_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub provider_status: Option<String>,
    pub payer_email: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    event_sender: EventSender,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
            event_sender,
        }
    }

    /// Opens (or replaces) the external payment order for an unpaid PayPal order
    #[instrument(skip(self, actor))]
    pub async fn create_payment_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<PaymentOrderOutcome, ServiceError> {
        let scope = actor.order_scope()?;
        let order = OrderLedger::find_for_owner(&*self.db, order_id, scope)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        if order.payment_method != PaymentMethod::PayPal {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} is not paid with paypal",
                order.order_number
            )));
        }
        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} is already paid",
                order.order_number
            )));
        }
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} is {}",
                order.order_number, order.status
            )));
        }

        let items = OrderLedger::items_for(&*self.db, order.id).await?;
        let created = open_payment_order(&self.db, self.gateway.as_ref(), &order, &items).await?;
        if let Some(previous) = &order.paypal_order_id {
            info!(%previous, replacement = %created.external_id, "Replaced PayPal order");
        }

        let order = self.reload(order.id).await?;
        Ok(PaymentOrderOutcome {
            order,
            approval_url: created.approval_url,
        })
    }

    /// Captures an approved PayPal order and records the payment
    #[instrument(skip(self))]
    pub async fn capture(&self, paypal_order_id: &str) -> Result<CaptureOutcome, ServiceError> {
        let order = OrderLedger::find_by_paypal_order_id(&*self.db, paypal_order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(paypal_order_id.to_string()))?;

        if order.payment_status == PaymentStatus::Paid {
            info!(order_id = %order.id, "Order already paid, skipping capture");
            return Ok(CaptureOutcome {
                order,
                capture_status: "COMPLETED".to_string(),
                already_captured: true,
            });
        }

        ensure_capturable(&order)?;

        let capture = self.gateway.capture_order(paypal_order_id).await?;
        let capture_ref = capture.capture_id.clone().unwrap_or_default();
        let mismatch = || ServiceError::PaymentMismatch {
            paypal_order_id: paypal_order_id.to_string(),
            capture_id: capture_ref.clone(),
        };

        let txn = self.db.begin().await?;
        let located = match OrderLedger::find_by_paypal_order_id(&txn, paypal_order_id).await? {
            Some(order) => order,
            None => {
                error!(
                    %paypal_order_id,
                    capture_id = %capture_ref,
                    "Captured payment has no matching order"
                );
                return Err(mismatch());
            }
        };
        if !located.status.accepts_payment() {
            error!(
                order_id = %located.id,
                status = %located.status,
                capture_id = %capture_ref,
                "Captured payment for an order that was closed meanwhile"
            );
            return Err(mismatch());
        }

        let newly_paid = if capture.is_completed() {
            OrderLedger::mark_paid(&txn, located.id, capture.capture_id.as_deref()).await?
        } else {
            if let Some(capture_id) = capture.capture_id.as_deref() {
                OrderLedger::record_pending_capture(&txn, located.id, capture_id).await?;
            }
            warn!(order_id = %located.id, status = %capture.status, "Capture not completed yet");
            false
        };
        txn.commit().await?;

        let order = self.reload(located.id).await?;
        if newly_paid {
            self.payment_applied(&order).await;
        }

        let already_captured = !newly_paid && capture.is_completed();
        Ok(CaptureOutcome {
            order,
            capture_status: capture.status,
            already_captured,
        })
    }

    /// Applies a webhook delivery. Database errors bubble up so the processor retries.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, event_id = ?event.id))]
    pub async fn handle_webhook(&self, event: &WebhookEvent) -> Result<WebhookOutcome, ServiceError> {
        let outcome = match event.action() {
            WebhookAction::CaptureCompleted {
                paypal_order_id,
                capture_id,
            } => self.apply_capture_completed(paypal_order_id, capture_id).await?,
            WebhookAction::CaptureRefunded { capture_id } => {
                self.apply_capture_refunded(capture_id).await?
            }
            WebhookAction::Unhandled(event_type) => {
                info!(%event_type, "Ignoring webhook event");
                WebhookOutcome::Ignored
            }
        };

        counter!(
            "storefront.payments.webhooks",
            1,
            "event_type" => event.event_type.clone(),
            "outcome" => outcome.as_str()
        );
        Ok(outcome)
    }

    async fn apply_capture_completed(
        &self,
        paypal_order_id: Option<String>,
        capture_id: Option<String>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let mut order = match paypal_order_id.as_deref() {
            Some(id) => OrderLedger::find_by_paypal_order_id(&*self.db, id).await?,
            None => None,
        };
        if order.is_none() {
            if let Some(capture_id) = capture_id.as_deref() {
                order = OrderLedger::find_by_capture_id(&*self.db, capture_id).await?;
            }
        }
        let Some(order) = order else {
            warn!(?paypal_order_id, ?capture_id, "Capture webhook matches no order");
            return Ok(WebhookOutcome::Ignored);
        };

        let txn = self.db.begin().await?;
        let applied = OrderLedger::mark_paid(&txn, order.id, capture_id.as_deref()).await?;
        txn.commit().await?;

        let order = self.reload(order.id).await?;
        if !applied {
            // A recorded paid_at means this capture settled before, even if
            // the order has been refunded since.
            if order.paid_at.is_some() {
                info!(order_id = %order.id, "Capture already recorded");
                return Ok(WebhookOutcome::AlreadyApplied);
            }
            error!(
                order_id = %order.id,
                status = %order.status,
                payment_status = %order.payment_status,
                ?capture_id,
                "Capture webhook for an order that cannot take payment"
            );
            return Ok(WebhookOutcome::Mismatch);
        }

        self.payment_applied(&order).await;
        Ok(WebhookOutcome::Applied)
    }

    async fn apply_capture_refunded(
        &self,
        capture_id: Option<String>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let Some(capture_id) = capture_id else {
            warn!("Refund webhook carries no capture reference");
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(order) = OrderLedger::find_by_capture_id(&*self.db, &capture_id).await? else {
            warn!(%capture_id, "Refund webhook matches no order");
            return Ok(WebhookOutcome::Ignored);
        };

        if !OrderLedger::mark_refunded(&*self.db, order.id).await? {
            info!(order_id = %order.id, "Refund already recorded");
            return Ok(WebhookOutcome::AlreadyApplied);
        }

        counter!("storefront.payments.refunded", 1);
        info!(order_id = %order.id, %capture_id, "Order refunded");
        self.event_sender
            .publish(Event::PaymentRefunded { order_id: order.id });
        Ok(WebhookOutcome::Applied)
    }

    /// Stored payment state, enriched with the provider's view while unpaid
    #[instrument(skip(self, actor))]
    pub async fn payment_status(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<PaymentStatusView, ServiceError> {
        let scope = actor.order_scope()?;
        let order = OrderLedger::find_for_owner(&*self.db, order_id, scope)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        let (provider_status, payer_email) = match (&order.paypal_order_id, order.payment_status) {
            (Some(reference), status) if status != PaymentStatus::Paid => {
                let details = self.gateway.get_order_details(reference).await?;
                (Some(details.status), details.payer_email)
            }
            _ => (None, None),
        };

        Ok(PaymentStatusView {
            order_id: order.id,
            order_number: order.order_number,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            paypal_order_id: order.paypal_order_id,
            paypal_capture_id: order.paypal_capture_id,
            paid_at: order.paid_at,
            provider_status,
            payer_email,
        })
    }

    async fn reload(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        OrderLedger::find_by_id(&*self.db, order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))
    }

    /// Event and confirmation for a payment recorded for the first time
    async fn payment_applied(&self, order: &order::Model) {
        counter!("storefront.payments.captured", 1);
        info!(order_id = %order.id, order_number = %order.order_number, "Payment recorded");

        self.event_sender.publish(Event::PaymentCaptured {
            order_id: order.id,
            capture_id: order.paypal_capture_id.clone().unwrap_or_default(),
        });

        let items = match OrderLedger::items_for(&*self.db, order.id).await {
            Ok(items) => items,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Could not load items for confirmation");
                return;
            }
        };
        if let Err(e) = self
            .notifier
            .send_order_confirmation(OrderConfirmation::from_order(order, &items))
            .await
        {
            warn!(order_id = %order.id, error = %e, "Order confirmation not sent");
        }
    }
}

/// Rejects captures for orders that are closed or whose payment already moved on
fn ensure_capturable(order: &order::Model) -> Result<(), ServiceError> {
    if order.status == OrderStatus::Canceled {
        return Err(ServiceError::OrderAlreadyCanceled(order.order_number.clone()));
    }
    if !order.status.accepts_payment() || !order.payment_status.is_settleable() {
        return Err(ServiceError::InvalidStatus(format!(
            "order {} is {} with payment {}",
            order.order_number, order.status, order.payment_status
        )));
    }
    Ok(())
}
