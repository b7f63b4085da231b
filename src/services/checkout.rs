//! Cart and direct-order checkout.
//!
//! One attempt runs entirely inside a database transaction: lines are
//! resolved against the catalog, priced, written to the order ledger, stock
//! is decremented with guarded updates and the cart is converted. Any error
//! drops the transaction, which rolls everything back. External calls happen
//! only after commit, through [`PostCommitRunner`].

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DatabaseConnection, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::config::CheckoutConfig;
use crate::entities::order::{OrderStatus, PaymentStatus};
use crate::entities::{
    order, order_item, product, product_variant, PaymentMethod, ShippingMethod,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::middleware_helpers::{with_retry, DbRetryPolicy, RetryConfig};
use crate::repositories::{CartStore, CatalogStore, OrderLedger, StockRef};
use crate::services::order_number::{self, is_order_number_conflict, OrderNumberFn};
use crate::services::post_commit::{PostCommitRunner, PostCommitTask};
use crate::services::pricing::{self, CouponOutcome, PriceLine, PricingPolicy, Quote};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub name: String,
    pub phone: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
}

/// Customer-supplied order details shared by both entry points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutInput {
    pub email: Option<String>,
    pub shipping: ShippingDetails,
    pub shipping_method: ShippingMethod,
    pub coupon_code: Option<String>,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceOrderInput {
    pub details: CheckoutInput,
    pub items: Vec<OrderLineInput>,
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payment_method_defaulted: bool,
    pub coupon: CouponOutcome,
    pub approval_url: Option<String>,
    pub payment_order_failed: bool,
}

/// A purchasable line checked against the catalog
#[derive(Debug, Clone)]
pub(crate) struct ResolvedLine {
    pub product: product::Model,
    pub variant: Option<product_variant::Model>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl ResolvedLine {
    pub fn stock_ref(&self) -> StockRef {
        StockRef::for_line(self.product.id, self.variant.as_ref().map(|v| v.id))
    }

    fn label(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{} ({})", self.product.name, variant.sku),
            None => self.product.name.clone(),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        json!({
            "name": self.product.name,
            "slug": self.product.slug,
            "image_url": self.product.image_url,
            "variant_name": self.variant.as_ref().map(|v| v.name.clone()),
            "sku": self.variant.as_ref().map(|v| v.sku.clone()),
            "attributes": self.variant.as_ref().and_then(|v| v.attributes.clone()),
            "unit_price": self.unit_price.to_string(),
        })
    }
}

/// Loads product and variant for a line and checks that enough stock is on hand
pub(crate) async fn resolve_line<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    quantity: i32,
) -> Result<ResolvedLine, ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be at least 1, got {}",
            quantity
        )));
    }

    let product = CatalogStore::find_product(conn, product_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or(ServiceError::ProductNotFound(product_id))?;

    let variant = match variant_id {
        Some(variant_id) => {
            let variant = CatalogStore::find_variant(conn, variant_id)
                .await?
                .filter(|v| v.product_id == product.id)
                .ok_or(ServiceError::InvalidVariant {
                    variant_id,
                    product_id,
                })?;
            Some(variant)
        }
        None => None,
    };

    let (available, unit_price) = match &variant {
        Some(v) => (v.stock_quantity, v.effective_price(product.price)),
        None => (product.stock_quantity, product.price),
    };

    let line = ResolvedLine {
        product,
        variant,
        quantity,
        unit_price,
    };
    if available < quantity {
        return Err(ServiceError::InsufficientStock(format!(
            "{}: requested {}, available {}",
            line.label(),
            quantity,
            available
        )));
    }
    Ok(line)
}

/// Where the lines of an attempt come from
#[derive(Debug, Clone)]
enum LineSource {
    Cart(Uuid),
    Explicit(Vec<OrderLineInput>),
}

/// Everything an attempt needs besides the order number
#[derive(Debug, Clone)]
struct CheckoutPlan {
    source: LineSource,
    user_id: Option<Uuid>,
    email: String,
    payment_method: PaymentMethod,
    details: CheckoutInput,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    policy: PricingPolicy,
    config: CheckoutConfig,
    currency: String,
    order_numbers: OrderNumberFn,
    event_sender: EventSender,
    post_commit: PostCommitRunner,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        policy: PricingPolicy,
        config: CheckoutConfig,
        currency: impl Into<String>,
        event_sender: EventSender,
        post_commit: PostCommitRunner,
    ) -> Self {
        let order_numbers = order_number::generator(config.order_number_prefix.clone());
        Self {
            db,
            policy,
            config,
            currency: currency.into(),
            order_numbers,
            event_sender,
            post_commit,
        }
    }

    /// Replaces the order number source
    pub fn with_order_numbers(mut self, order_numbers: OrderNumberFn) -> Self {
        self.order_numbers = order_numbers;
        self
    }

    /// Converts the caller's active cart into an order
    #[instrument(skip(self, actor, input), fields(user_id = ?actor.user_id()))]
    pub async fn checkout_cart(
        &self,
        actor: &Actor,
        input: CheckoutInput,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let owner = actor.cart_owner()?;
        let email = resolve_email(actor, input.email.as_deref())?;
        let (payment_method, payment_method_defaulted) =
            parse_payment_method(input.payment_method.as_deref());

        let cart = CartStore::get_or_create(&*self.db, &owner, self.config.cart_ttl_days).await?;
        info!(cart_id = %cart.id, "Checking out cart");

        let plan = CheckoutPlan {
            source: LineSource::Cart(cart.id),
            user_id: actor.user_id(),
            email,
            payment_method,
            details: input,
        };
        self.execute(plan, payment_method_defaulted).await
    }

    /// Places an order from an explicit item list without touching any cart
    #[instrument(skip(self, actor, input), fields(user_id = ?actor.user_id(), lines = input.items.len()))]
    pub async fn place_order(
        &self,
        actor: &Actor,
        input: PlaceOrderInput,
    ) -> Result<CheckoutOutcome, ServiceError> {
        if input.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "at least one item is required".to_string(),
            ));
        }
        let email = resolve_email(actor, input.details.email.as_deref())?;
        let (payment_method, payment_method_defaulted) =
            parse_payment_method(input.details.payment_method.as_deref());

        let plan = CheckoutPlan {
            source: LineSource::Explicit(input.items),
            user_id: actor.user_id(),
            email,
            payment_method,
            details: input.details,
        };
        self.execute(plan, payment_method_defaulted).await
    }

    async fn execute(
        &self,
        plan: CheckoutPlan,
        payment_method_defaulted: bool,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let retry = RetryConfig::with_max_attempts(self.config.transaction_max_attempts);
        let max_numbers = self.config.order_number_max_attempts.max(1);
        let mut conflicts = 0;

        let (order, items, coupon) = loop {
            let number = (self.order_numbers)();
            let attempt = with_retry(&retry, DbRetryPolicy, || self.place_once(&plan, &number)).await;
            match attempt {
                Ok(placed) => break placed,
                Err(ServiceError::DatabaseError(e)) if is_order_number_conflict(&e) => {
                    conflicts += 1;
                    counter!("storefront.checkout.order_number_conflicts", 1);
                    if conflicts >= max_numbers {
                        return Err(ServiceError::OrderNumberConflict(conflicts));
                    }
                    warn!(order_number = %number, attempt = conflicts, "Order number taken, retrying");
                }
                Err(e) => {
                    if matches!(e, ServiceError::InsufficientStock(_)) {
                        counter!("storefront.checkout.stock_conflicts", 1);
                    }
                    counter!("storefront.checkout.failed", 1, "reason" => e.code());
                    return Err(e);
                }
            }
        };

        counter!("storefront.checkout.completed", 1, "payment_method" => order.payment_method.to_string());
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "Order placed"
        );
        self.event_sender.publish(Event::OrderPlaced {
            order_id: order.id,
            order_number: order.order_number.clone(),
            total_amount: order.total_amount,
        });

        let tasks = PostCommitTask::for_method(order.payment_method);
        let report = self.post_commit.run(&order, &items, &tasks).await;

        // Re-read so the response carries the stored payment reference
        let order = if report.payment_order_id.is_some() {
            OrderLedger::find_by_id(&*self.db, order.id)
                .await?
                .unwrap_or(order)
        } else {
            order
        };

        Ok(CheckoutOutcome {
            order,
            items,
            payment_method_defaulted,
            coupon,
            approval_url: report.approval_url,
            payment_order_failed: report.payment_order_failed,
        })
    }

    async fn place_once(
        &self,
        plan: &CheckoutPlan,
        order_number: &str,
    ) -> Result<(order::Model, Vec<order_item::Model>, CouponOutcome), ServiceError> {
        let txn = self.db.begin().await?;

        let requested: Vec<OrderLineInput> = match &plan.source {
            LineSource::Cart(cart_id) => CartStore::list_items(&txn, *cart_id)
                .await?
                .into_iter()
                .map(|item| OrderLineInput {
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    quantity: item.quantity,
                })
                .collect(),
            LineSource::Explicit(items) => items.clone(),
        };
        if requested.is_empty() {
            return Err(ServiceError::CartEmpty);
        }

        let mut lines = Vec::with_capacity(requested.len());
        for line in &requested {
            lines.push(resolve_line(&txn, line.product_id, line.variant_id, line.quantity).await?);
        }

        let quote = pricing::quote(
            &price_lines(&lines),
            plan.details.shipping_method,
            plan.details.coupon_code.as_deref(),
            &self.policy,
        )?;

        let order = OrderLedger::insert_order(&txn, self.new_order(plan, order_number, &quote))
            .await?;

        let now = Utc::now();
        let item_rows = lines
            .iter()
            .zip(&quote.line_subtotals)
            .map(|(line, subtotal)| order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product.id),
                variant_id: Set(line.variant.as_ref().map(|v| v.id)),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                subtotal: Set(*subtotal),
                discount: Set(Decimal::ZERO),
                product_snapshot: Set(line.snapshot()),
                created_at: Set(now),
            })
            .collect();
        let items = OrderLedger::insert_items(&txn, item_rows).await?;

        for line in &lines {
            if !CatalogStore::decrement_stock(&txn, line.stock_ref(), line.quantity).await? {
                return Err(ServiceError::InsufficientStock(format!(
                    "{}: stock changed during checkout",
                    line.label()
                )));
            }
        }

        if let LineSource::Cart(cart_id) = &plan.source {
            if !CartStore::mark_converted(&txn, *cart_id).await? {
                return Err(ServiceError::CartNotFound(cart_id.to_string()));
            }
            CartStore::clear_items(&txn, *cart_id).await?;
        }

        txn.commit().await?;
        Ok((order, items, quote.coupon))
    }

    fn new_order(&self, plan: &CheckoutPlan, order_number: &str, quote: &Quote) -> order::ActiveModel {
        let now = Utc::now();
        let shipping = &plan.details.shipping;
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number.to_string()),
            user_id: Set(plan.user_id),
            email: Set(plan.email.clone()),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(plan.payment_method),
            shipping_method: Set(plan.details.shipping_method),
            currency: Set(self.currency.clone()),
            subtotal: Set(quote.subtotal),
            tax: Set(quote.tax),
            delivery_fee: Set(quote.delivery_fee),
            discount: Set(quote.discount),
            total_amount: Set(quote.total_amount),
            coupon_code: Set(quote.coupon.applied_code().map(str::to_string)),
            shipping_name: Set(shipping.name.clone()),
            shipping_phone: Set(shipping.phone.clone()),
            shipping_line1: Set(shipping.line1.clone()),
            shipping_line2: Set(shipping.line2.clone()),
            shipping_city: Set(shipping.city.clone()),
            shipping_state: Set(shipping.state.clone()),
            shipping_postal_code: Set(shipping.postal_code.clone()),
            shipping_country: Set(shipping.country.clone()),
            paypal_order_id: Set(None),
            paypal_capture_id: Set(None),
            cancellation_reason: Set(None),
            placed_at: Set(now),
            paid_at: Set(None),
            shipped_at: Set(None),
            cancelled_at: Set(None),
            refunded_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
    }
}

pub(crate) fn price_lines(lines: &[ResolvedLine]) -> Vec<PriceLine> {
    lines
        .iter()
        .map(|line| PriceLine {
            unit_price: line.unit_price,
            quantity: line.quantity,
        })
        .collect()
}

/// Unknown or missing methods fall back to cash on delivery
pub fn parse_payment_method(raw: Option<&str>) -> (PaymentMethod, bool) {
    let trimmed = raw.map(str::trim).filter(|s| !s.is_empty());
    match trimmed.map(PaymentMethod::from_str) {
        Some(Ok(method)) => (method, false),
        Some(Err(_)) => {
            warn!(payment_method = ?trimmed, "Unrecognized payment method, using cash_on_delivery");
            (PaymentMethod::CashOnDelivery, true)
        }
        None => {
            warn!("No payment method given, using cash_on_delivery");
            (PaymentMethod::CashOnDelivery, true)
        }
    }
}

fn resolve_email(actor: &Actor, supplied: Option<&str>) -> Result<String, ServiceError> {
    let supplied = supplied.map(str::trim).filter(|s| !s.is_empty());
    actor
        .email()
        .or(supplied)
        .map(str::to_string)
        .ok_or_else(|| ServiceError::ValidationError("a contact email is required".to_string()))
}
