use axum::{extract::State, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::common::{money, success_response, validate_input};
use crate::auth::Actor;
use crate::entities::cart::CartStatus;
use crate::services::cart::{AddItemInput, CartView};
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub delivery_fee: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub id: Uuid,
    pub status: CartStatus,
    pub items: Vec<CartLineResponse>,
    pub totals: Option<CartTotals>,
}

impl From<CartView> for CartResponse {
    fn from(view: CartView) -> Self {
        let line_totals = view
            .preview
            .as_ref()
            .map(|q| q.line_subtotals.clone())
            .unwrap_or_default();
        let items = view
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| CartLineResponse {
                id: item.id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
                unit_price: money(item.unit_price),
                line_total: line_totals
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| money(item.unit_price * Decimal::from(item.quantity))),
            })
            .collect();

        Self {
            id: view.cart.id,
            status: view.cart.status,
            items,
            totals: view.preview.map(|q| CartTotals {
                subtotal: q.subtotal,
                discount: q.discount,
                tax: q.tax,
                delivery_fee: q.delivery_fee,
                total_amount: q.total_amount,
            }),
        }
    }
}

pub async fn get_cart(State(state): State<AppState>, actor: Actor) -> ApiResult<CartResponse> {
    let view = state.carts.get_cart(&actor).await?;
    success_response("Cart retrieved", view.into())
}

/// Add a product (or variant) to the caller's cart
pub async fn add_item(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<AddCartItemRequest>,
) -> ApiResult<CartResponse> {
    validate_input(&payload)?;
    let view = state
        .carts
        .add_item(
            &actor,
            AddItemInput {
                product_id: payload.product_id,
                variant_id: payload.variant_id,
                quantity: payload.quantity,
            },
        )
        .await?;
    success_response("Item added to cart", view.into())
}
