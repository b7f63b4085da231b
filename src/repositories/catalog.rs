use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entities::{product, product_variant};

/// Row whose `stock_quantity` backs a purchasable line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StockRef {
    Product(Uuid),
    Variant(Uuid),
}

impl StockRef {
    pub fn for_line(product_id: Uuid, variant_id: Option<Uuid>) -> Self {
        match variant_id {
            Some(id) => StockRef::Variant(id),
            None => StockRef::Product(product_id),
        }
    }
}

pub struct CatalogStore;

impl CatalogStore {
    pub async fn find_product<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<product::Model>, DbErr> {
        product::Entity::find_by_id(id).one(conn).await
    }

    pub async fn find_variant<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<product_variant::Model>, DbErr> {
        product_variant::Entity::find_by_id(id).one(conn).await
    }

    /// Decrements stock only when enough is left. Returns `false` when the
    /// guard rejected the update, leaving the row untouched.
    pub async fn decrement_stock<C: ConnectionTrait>(
        conn: &C,
        stock: StockRef,
        quantity: i32,
    ) -> Result<bool, DbErr> {
        let now = Utc::now();
        let result = match stock {
            StockRef::Product(id) => {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::StockQuantity,
                        Expr::col(product::Column::StockQuantity).sub(quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(now))
                    .filter(product::Column::Id.eq(id))
                    .filter(product::Column::StockQuantity.gte(quantity))
                    .exec(conn)
                    .await?
            }
            StockRef::Variant(id) => {
                product_variant::Entity::update_many()
                    .col_expr(
                        product_variant::Column::StockQuantity,
                        Expr::col(product_variant::Column::StockQuantity).sub(quantity),
                    )
                    .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                    .filter(product_variant::Column::Id.eq(id))
                    .filter(product_variant::Column::StockQuantity.gte(quantity))
                    .exec(conn)
                    .await?
            }
        };
        Ok(result.rows_affected == 1)
    }

    /// Adds stock back. Returns `false` if the row no longer exists.
    pub async fn increment_stock<C: ConnectionTrait>(
        conn: &C,
        stock: StockRef,
        quantity: i32,
    ) -> Result<bool, DbErr> {
        let now = Utc::now();
        let result = match stock {
            StockRef::Product(id) => {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::StockQuantity,
                        Expr::col(product::Column::StockQuantity).add(quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(now))
                    .filter(product::Column::Id.eq(id))
                    .exec(conn)
                    .await?
            }
            StockRef::Variant(id) => {
                product_variant::Entity::update_many()
                    .col_expr(
                        product_variant::Column::StockQuantity,
                        Expr::col(product_variant::Column::StockQuantity).add(quantity),
                    )
                    .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                    .filter(product_variant::Column::Id.eq(id))
                    .exec(conn)
                    .await?
            }
        };
        Ok(result.rows_affected == 1)
    }
}
