//! Side effects that run after a checkout has committed.
//!
//! Each task is isolated: a failure is logged and reported in the
//! [`PostCommitReport`] but never undoes the committed order.

use metrics::counter;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clients::{
    PaymentGateway, PaymentLineItem, PaymentOrderCreated, PaymentOrderRequest, PaymentShipping,
};
use crate::entities::{order, order_item, PaymentMethod};
use crate::errors::ServiceError;
use crate::notifications::{Notifier, OrderConfirmation};
use crate::repositories::OrderLedger;
use crate::services::pricing::round_money;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCommitTask {
    CreatePaymentOrder,
    SendConfirmation,
}

impl PostCommitTask {
    /// Redirect methods confirm after capture; everything else confirms right away
    pub fn for_method(method: PaymentMethod) -> Vec<PostCommitTask> {
        if method.requires_redirect() {
            vec![PostCommitTask::CreatePaymentOrder]
        } else {
            vec![PostCommitTask::SendConfirmation]
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostCommitReport {
    pub payment_order_id: Option<String>,
    pub approval_url: Option<String>,
    pub payment_order_failed: bool,
    pub confirmation_queued: bool,
}

/// Builds the processor request from the frozen order totals
pub fn payment_order_request(
    order: &order::Model,
    items: &[order_item::Model],
) -> PaymentOrderRequest {
    let items = items
        .iter()
        .map(|item| {
            let snapshot = &item.product_snapshot;
            let product_name = snapshot
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("Item");
            let name = match snapshot.get("variant_name").and_then(|v| v.as_str()) {
                Some(variant) => format!("{} ({})", product_name, variant),
                None => product_name.to_string(),
            };
            PaymentLineItem {
                name,
                sku: snapshot
                    .get("sku")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                quantity: item.quantity,
                unit_amount: round_money(item.unit_price),
            }
        })
        .collect();

    PaymentOrderRequest {
        order_id: order.id,
        reference: order.order_number.clone(),
        currency: order.currency.clone(),
        item_total: round_money(order.subtotal),
        tax_total: round_money(order.tax),
        shipping: round_money(order.delivery_fee),
        discount: round_money(order.discount),
        total: round_money(order.total_amount),
        items,
        ship_to: Some(PaymentShipping {
            full_name: order.shipping_name.clone(),
            line1: order.shipping_line1.clone(),
            line2: order.shipping_line2.clone(),
            city: order.shipping_city.clone(),
            state: order.shipping_state.clone(),
            postal_code: order.shipping_postal_code.clone(),
            country_code: order.shipping_country.clone(),
        }),
    }
}

/// Creates the external payment order and stores its id on the order
pub async fn open_payment_order(
    db: &DatabaseConnection,
    gateway: &dyn PaymentGateway,
    order: &order::Model,
    items: &[order_item::Model],
) -> Result<PaymentOrderCreated, ServiceError> {
    let created = gateway
        .create_order(&payment_order_request(order, items))
        .await?;
    OrderLedger::set_paypal_order_id(db, order.id, &created.external_id).await?;
    Ok(created)
}

#[derive(Clone)]
pub struct PostCommitRunner {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl PostCommitRunner {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
        }
    }

    pub async fn run(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
        tasks: &[PostCommitTask],
    ) -> PostCommitReport {
        let mut report = PostCommitReport::default();

        for task in tasks {
            match task {
                PostCommitTask::CreatePaymentOrder => {
                    match open_payment_order(&self.db, self.gateway.as_ref(), order, items).await {
                        Ok(created) => {
                            info!(
                                order_id = %order.id,
                                paypal_order_id = %created.external_id,
                                "Payment order created"
                            );
                            report.payment_order_id = Some(created.external_id);
                            report.approval_url = created.approval_url;
                        }
                        Err(e) => {
                            counter!("storefront.checkout.payment_order_failures", 1);
                            error!(
                                order_id = %order.id,
                                error = %e,
                                "Payment order creation failed; order stays pending"
                            );
                            report.payment_order_failed = true;
                        }
                    }
                }
                PostCommitTask::SendConfirmation => {
                    let confirmation = OrderConfirmation::from_order(order, items);
                    match self.notifier.send_order_confirmation(confirmation).await {
                        Ok(()) => report.confirmation_queued = true,
                        Err(e) => {
                            warn!(order_id = %order.id, error = %e, "Order confirmation not sent")
                        }
                    }
                }
            }
        }

        report
    }
}
