use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::entities::order_item;

/// Statuses a capture may move forward to `processing`
const CAPTURE_ADVANCES_FROM: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::OnHold];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

pub struct OrderLedger;

impl OrderLedger {
    pub async fn insert_order<C: ConnectionTrait>(
        conn: &C,
        order: order::ActiveModel,
    ) -> Result<order::Model, DbErr> {
        order.insert(conn).await
    }

    pub async fn insert_items<C: ConnectionTrait>(
        conn: &C,
        items: Vec<order_item::ActiveModel>,
    ) -> Result<Vec<order_item::Model>, DbErr> {
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            inserted.push(item.insert(conn).await?);
        }
        Ok(inserted)
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<Option<order::Model>, DbErr> {
        order::Entity::find_by_id(order_id).one(conn).await
    }

    /// Looks an order up on behalf of a caller; `None` owner means unrestricted
    pub async fn find_for_owner<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        owner: Option<Uuid>,
    ) -> Result<Option<order::Model>, DbErr> {
        let mut query = order::Entity::find_by_id(order_id);
        if let Some(user_id) = owner {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        query.one(conn).await
    }

    pub async fn find_by_paypal_order_id<C: ConnectionTrait>(
        conn: &C,
        paypal_order_id: &str,
    ) -> Result<Option<order::Model>, DbErr> {
        order::Entity::find()
            .filter(order::Column::PaypalOrderId.eq(paypal_order_id))
            .one(conn)
            .await
    }

    pub async fn find_by_capture_id<C: ConnectionTrait>(
        conn: &C,
        capture_id: &str,
    ) -> Result<Option<order::Model>, DbErr> {
        order::Entity::find()
            .filter(order::Column::PaypalCaptureId.eq(capture_id))
            .one(conn)
            .await
    }

    pub async fn items_for<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, DbErr> {
        order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(conn)
            .await
    }

    /// Newest first. `page` is 1-based.
    pub async fn list<C: ConnectionTrait>(
        conn: &C,
        filter: &OrderFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), DbErr> {
        let mut query = order::Entity::find();
        if let Some(user_id) = filter.user_id {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(order::Column::PlacedAt)
            .order_by_desc(order::Column::Id)
            .paginate(conn, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    pub async fn set_paypal_order_id<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        paypal_order_id: &str,
    ) -> Result<bool, DbErr> {
        let result = order::Entity::update_many()
            .col_expr(
                order::Column::PaypalOrderId,
                Expr::value(Some(paypal_order_id.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Records a completed capture. Returns `false` when the order was already
    /// settled or closed, in which case the stored payment state is kept.
    pub async fn mark_paid<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        capture_id: Option<&str>,
    ) -> Result<bool, DbErr> {
        let now = Utc::now();
        let mut update = order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
            .col_expr(order::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(order::Column::UpdatedAt, Expr::value(now));
        if let Some(capture_id) = capture_id {
            update = update.col_expr(
                order::Column::PaypalCaptureId,
                Expr::value(Some(capture_id.to_string())),
            );
        }

        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.is_in(PaymentStatus::SETTLEABLE))
            .filter(order::Column::Status.is_not_in(OrderStatus::CLOSED))
            .exec(conn)
            .await?;
        if result.rows_affected != 1 {
            return Ok(false);
        }

        order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Processing))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(CAPTURE_ADVANCES_FROM))
            .exec(conn)
            .await?;
        Ok(true)
    }

    /// Stores the capture reference of a capture the processor has not completed yet
    pub async fn record_pending_capture<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        capture_id: &str,
    ) -> Result<bool, DbErr> {
        let result = order::Entity::update_many()
            .col_expr(
                order::Column::PaypalCaptureId,
                Expr::value(Some(capture_id.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(order::Column::Status.is_not_in(OrderStatus::CLOSED))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Returns `false` on redelivery so the first `refunded_at` survives
    pub async fn mark_refunded<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<bool, DbErr> {
        let now = Utc::now();
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Refunded))
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Refunded),
            )
            .col_expr(order::Column::RefundedAt, Expr::value(Some(now)))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Refunded))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Cancels an order that is still in a cancellable status. Returns `false`
    /// if the guard rejected the update.
    pub async fn cancel<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        reason: &str,
    ) -> Result<bool, DbErr> {
        let now = Utc::now();
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Canceled))
            .col_expr(order::Column::CancelledAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::CancellationReason,
                Expr::value(Some(reason.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(OrderStatus::CANCELLABLE))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }
}
