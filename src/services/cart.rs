use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::Actor;
use crate::entities::{cart, cart_item, ShippingMethod};
use crate::errors::ServiceError;
use crate::repositories::CartStore;
use crate::services::checkout::resolve_line;
use crate::services::pricing::{self, PriceLine, PricingPolicy, Quote};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CartView {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
    /// Standard-delivery preview without coupons; `None` for an empty cart
    pub preview: Option<Quote>,
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    policy: PricingPolicy,
    cart_ttl_days: i64,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, policy: PricingPolicy, cart_ttl_days: i64) -> Self {
        Self {
            db,
            policy,
            cart_ttl_days,
        }
    }

    #[instrument(skip(self, actor))]
    pub async fn add_item(
        &self,
        actor: &Actor,
        input: AddItemInput,
    ) -> Result<CartView, ServiceError> {
        let owner = actor.cart_owner()?;
        let cart = CartStore::get_or_create(&*self.db, &owner, self.cart_ttl_days).await?;

        let already_in_cart: i32 = CartStore::list_items(&*self.db, cart.id)
            .await?
            .iter()
            .filter(|i| i.product_id == input.product_id && i.variant_id == input.variant_id)
            .map(|i| i.quantity)
            .sum();

        // Stock is checked for the combined quantity, nothing is reserved yet
        let line = resolve_line(
            &*self.db,
            input.product_id,
            input.variant_id,
            already_in_cart + input.quantity,
        )
        .await?;

        CartStore::add_item(
            &*self.db,
            cart.id,
            input.product_id,
            input.variant_id,
            input.quantity,
            line.unit_price,
        )
        .await?;
        info!(cart_id = %cart.id, product_id = %input.product_id, "Item added to cart");

        self.view_of(cart).await
    }

    #[instrument(skip(self, actor))]
    pub async fn get_cart(&self, actor: &Actor) -> Result<CartView, ServiceError> {
        let owner = actor.cart_owner()?;
        let cart = CartStore::get_or_create(&*self.db, &owner, self.cart_ttl_days).await?;
        self.view_of(cart).await
    }

    async fn view_of(&self, cart: cart::Model) -> Result<CartView, ServiceError> {
        let items = CartStore::list_items(&*self.db, cart.id).await?;
        let preview = if items.is_empty() {
            None
        } else {
            let lines: Vec<PriceLine> = items
                .iter()
                .map(|i| PriceLine {
                    unit_price: i.unit_price,
                    quantity: i.quantity,
                })
                .collect();
            Some(pricing::quote(&lines, ShippingMethod::Standard, None, &self.policy)?)
        };
        Ok(CartView {
            cart,
            items,
            preview,
        })
    }
}
