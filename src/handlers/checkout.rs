use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::common::{created_response, validate_input};
use super::orders::OrderResponse;
use crate::auth::Actor;
use crate::entities::ShippingMethod;
use crate::services::checkout::{
    CheckoutInput, CheckoutOutcome, OrderLineInput, PlaceOrderInput, ShippingDetails,
};
use crate::services::pricing::CouponOutcome;
use crate::{ApiResult, AppState};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddressRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    #[validate(length(max = 255))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub city: String,
    #[validate(length(max = 120))]
    pub state: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    /// ISO 3166-1 alpha-2
    #[validate(length(equal = 2))]
    pub country: String,
}

impl From<ShippingAddressRequest> for ShippingDetails {
    fn from(req: ShippingAddressRequest) -> Self {
        Self {
            name: req.name.trim().to_string(),
            phone: req.phone,
            line1: req.line1.trim().to_string(),
            line2: req.line2,
            city: req.city.trim().to_string(),
            state: req.state,
            postal_code: req.postal_code.trim().to_string(),
            country: req.country.to_uppercase(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[validate]
    pub shipping_address: ShippingAddressRequest,
    #[serde(default)]
    pub shipping_method: ShippingMethod,
    #[validate(length(max = 32))]
    pub coupon_code: Option<String>,
    pub payment_method: Option<String>,
}

impl From<CheckoutRequest> for CheckoutInput {
    fn from(req: CheckoutRequest) -> Self {
        Self {
            email: req.email,
            shipping: req.shipping_address.into(),
            shipping_method: req.shipping_method,
            coupon_code: req.coupon_code,
            payment_method: req.payment_method,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    #[serde(flatten)]
    #[validate]
    pub details: CheckoutRequest,
    #[validate(length(min = 1, max = 100))]
    #[validate]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub payment_method_defaulted: bool,
    pub coupon: CouponOutcome,
    pub approval_url: Option<String>,
    pub payment_order_failed: bool,
}

impl From<CheckoutOutcome> for CheckoutResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        Self {
            order: OrderResponse::new(&outcome.order, Some(&outcome.items)),
            payment_method_defaulted: outcome.payment_method_defaulted,
            coupon: outcome.coupon,
            approval_url: outcome.approval_url,
            payment_order_failed: outcome.payment_order_failed,
        }
    }
}

/// Convert the caller's cart into an order
pub async fn checkout_cart(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CheckoutRequest>,
) -> ApiResult<CheckoutResponse> {
    validate_input(&payload)?;
    let outcome = state.checkout.checkout_cart(&actor, payload.into()).await?;
    created_response("Order placed", outcome.into())
}

/// Place an order from an explicit item list
pub async fn place_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<PlaceOrderRequest>,
) -> ApiResult<CheckoutResponse> {
    validate_input(&payload)?;

    let input = PlaceOrderInput {
        details: payload.details.into(),
        items: payload
            .items
            .iter()
            .map(|i| OrderLineInput {
                product_id: i.product_id,
                variant_id: i.variant_id,
                quantity: i.quantity,
            })
            .collect(),
    };
    let outcome = state.checkout.place_order(&actor, input).await?;
    created_response("Order placed", outcome.into())
}
