use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::common::{money, success_response, validate_input, PaginatedResponse, PaginationParams};
use crate::auth::Actor;
use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::entities::{order_item, PaymentMethod, ShippingMethod};
use crate::errors::ServiceError;
use crate::services::orders::OrderStatusView;
use crate::{ApiResult, AppState};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddressResponse {
    pub name: String,
    pub phone: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub sku: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl From<&order_item::Model> for OrderItemResponse {
    fn from(item: &order_item::Model) -> Self {
        let snapshot = &item.product_snapshot;
        Self {
            id: item.id,
            product_id: item.product_id,
            variant_id: item.variant_id,
            name: snapshot
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            sku: snapshot
                .get("sku")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            quantity: item.quantity,
            unit_price: money(item.unit_price),
            subtotal: money(item.subtotal),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub shipping_method: ShippingMethod,
    pub currency: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub delivery_fee: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub coupon_code: Option<String>,
    pub shipping_address: ShippingAddressResponse,
    pub paypal_order_id: Option<String>,
    pub paypal_capture_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub placed_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItemResponse>>,
}

impl OrderResponse {
    pub fn new(order: &order::Model, items: Option<&[order_item::Model]>) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            email: order.email.clone(),
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            shipping_method: order.shipping_method,
            currency: order.currency.clone(),
            subtotal: money(order.subtotal),
            tax: money(order.tax),
            delivery_fee: money(order.delivery_fee),
            discount: money(order.discount),
            total_amount: money(order.total_amount),
            coupon_code: order.coupon_code.clone(),
            shipping_address: ShippingAddressResponse {
                name: order.shipping_name.clone(),
                phone: order.shipping_phone.clone(),
                line1: order.shipping_line1.clone(),
                line2: order.shipping_line2.clone(),
                city: order.shipping_city.clone(),
                state: order.shipping_state.clone(),
                postal_code: order.shipping_postal_code.clone(),
                country: order.shipping_country.clone(),
            },
            paypal_order_id: order.paypal_order_id.clone(),
            paypal_capture_id: order.paypal_capture_id.clone(),
            cancellation_reason: order.cancellation_reason.clone(),
            placed_at: order.placed_at,
            paid_at: order.paid_at,
            cancelled_at: order.cancelled_at,
            refunded_at: order.refunded_at,
            items: items.map(|items| items.iter().map(OrderItemResponse::from).collect()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub restored_units: i64,
}

fn parse_status(raw: Option<&str>) -> Result<Option<OrderStatus>, ServiceError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => OrderStatus::from_str(s)
            .map(Some)
            .map_err(|_| ServiceError::ValidationError(format!("Unknown order status: {}", s))),
    }
}

/// List the caller's orders (all orders for admins)
pub async fn list_orders(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<ListOrdersParams>,
) -> ApiResult<PaginatedResponse<OrderResponse>> {
    let status = parse_status(params.status.as_deref())?;
    let (page, per_page) = PaginationParams {
        page: params.page,
        per_page: params.per_page,
    }
    .resolve(&state.config);

    let (orders, total) = state.orders.list(&actor, status, page, per_page).await?;
    let items = orders.iter().map(|o| OrderResponse::new(o, None)).collect();
    success_response(
        "Orders retrieved",
        PaginatedResponse::new(items, page, per_page, total),
    )
}

pub async fn get_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let detail = state.orders.get(&actor, order_id).await?;
    success_response(
        "Order retrieved",
        OrderResponse::new(&detail.order, Some(&detail.items)),
    )
}

pub async fn get_order_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderStatusView> {
    let view = state.orders.status(&actor, order_id).await?;
    success_response("Order status retrieved", view)
}

/// Cancel an order and put its units back on the shelf
pub async fn cancel_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
    body: Option<Json<CancelOrderRequest>>,
) -> ApiResult<CancelOrderResponse> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    validate_input(&request)?;

    let outcome = state
        .orders
        .cancel_order(&actor, order_id, request.reason)
        .await?;
    success_response(
        "Order canceled",
        CancelOrderResponse {
            order: OrderResponse::new(&outcome.order, None),
            restored_units: outcome.restored_units,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_parsing() {
        assert_eq!(parse_status(None).unwrap(), None);
        assert_eq!(parse_status(Some("")).unwrap(), None);
        assert_eq!(
            parse_status(Some("Shipped")).unwrap(),
            Some(OrderStatus::Shipped)
        );
        assert!(matches!(
            parse_status(Some("lost")),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
