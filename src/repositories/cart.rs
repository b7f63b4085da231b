use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use uuid::Uuid;

use crate::entities::cart::{self, CartStatus};
use crate::entities::cart_item;

/// Who a cart belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwner {
    User(Uuid),
    Session(String),
}

pub struct CartStore;

impl CartStore {
    pub async fn find_active<C: ConnectionTrait>(
        conn: &C,
        owner: &CartOwner,
    ) -> Result<Option<cart::Model>, DbErr> {
        let query = cart::Entity::find().filter(cart::Column::Status.eq(CartStatus::Active));
        let query = match owner {
            CartOwner::User(user_id) => query.filter(cart::Column::UserId.eq(*user_id)),
            CartOwner::Session(session_id) => query
                .filter(cart::Column::SessionId.eq(session_id.as_str()))
                .filter(cart::Column::UserId.is_null()),
        };
        query
            .order_by_desc(cart::Column::CreatedAt)
            .one(conn)
            .await
    }

    pub async fn create<C: ConnectionTrait>(
        conn: &C,
        owner: &CartOwner,
        ttl_days: i64,
    ) -> Result<cart::Model, DbErr> {
        let now = Utc::now();
        let (user_id, session_id) = match owner {
            CartOwner::User(id) => (Some(*id), None),
            CartOwner::Session(session) => (None, Some(session.clone())),
        };

        cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            session_id: Set(session_id),
            status: Set(CartStatus::Active),
            expires_at: Set(now + Duration::days(ttl_days)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await
    }

    pub async fn get_or_create<C: ConnectionTrait>(
        conn: &C,
        owner: &CartOwner,
        ttl_days: i64,
    ) -> Result<cart::Model, DbErr> {
        match Self::find_active(conn, owner).await? {
            Some(cart) => Ok(cart),
            None => Self::create(conn, owner, ttl_days).await,
        }
    }

    pub async fn list_items<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, DbErr> {
        cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::AddedAt)
            .all(conn)
            .await
    }

    /// Adds a line, or bumps the quantity of the existing line for the same product and variant
    pub async fn add_item<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
        unit_price: Decimal,
    ) -> Result<cart_item::Model, DbErr> {
        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(match variant_id {
                Some(id) => cart_item::Column::VariantId.eq(id),
                None => cart_item::Column::VariantId.is_null(),
            })
            .one(conn)
            .await?;

        let item = match existing {
            Some(item) => {
                let new_quantity = item.quantity + quantity;
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(new_quantity);
                active.unit_price = Set(unit_price);
                active.update(conn).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart_id),
                    product_id: Set(product_id),
                    variant_id: Set(variant_id),
                    quantity: Set(quantity),
                    unit_price: Set(unit_price),
                    added_at: Set(Utc::now()),
                }
                .insert(conn)
                .await?
            }
        };

        cart::Entity::update_many()
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart_id))
            .exec(conn)
            .await?;

        Ok(item)
    }

    /// Flips an active cart to converted. Returns `false` if another checkout got there first.
    pub async fn mark_converted<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<bool, DbErr> {
        let result = cart::Entity::update_many()
            .col_expr(cart::Column::Status, Expr::value(CartStatus::Converted))
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn clear_items<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<u64, DbErr> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}
