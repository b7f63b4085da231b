use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Order of record. Money columns are frozen at creation; status fields move forward only.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    #[sea_orm(nullable)]
    pub user_id: Option<Uuid>,
    pub email: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub shipping_method: ShippingMethod,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub tax: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub delivery_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,
    pub shipping_name: String,
    #[sea_orm(nullable)]
    pub shipping_phone: Option<String>,
    pub shipping_line1: String,
    #[sea_orm(nullable)]
    pub shipping_line2: Option<String>,
    pub shipping_city: String,
    #[sea_orm(nullable)]
    pub shipping_state: Option<String>,
    pub shipping_postal_code: String,
    pub shipping_country: String,
    #[sea_orm(nullable)]
    pub paypal_order_id: Option<String>,
    #[sea_orm(nullable)]
    pub paypal_capture_id: Option<String>,
    #[sea_orm(nullable)]
    pub cancellation_reason: Option<String>,
    pub placed_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub shipped_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if !insert {
            active_model.updated_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "packed")]
    Packed,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "canceled")]
    Canceled,
    #[sea_orm(string_value = "returned")]
    Returned,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "on_hold")]
    OnHold,
}

impl OrderStatus {
    /// Statuses from which a customer or admin may still cancel
    pub const CANCELLABLE: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Packed,
        OrderStatus::OnHold,
    ];

    pub fn is_cancellable(self) -> bool {
        Self::CANCELLABLE.contains(&self)
    }

    pub fn has_shipped(self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Delivered)
    }

    /// Canceled, refunded and returned orders never take another payment
    pub const CLOSED: [OrderStatus; 3] = [
        OrderStatus::Canceled,
        OrderStatus::Refunded,
        OrderStatus::Returned,
    ];

    pub fn accepts_payment(self) -> bool {
        !Self::CLOSED.contains(&self)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "partially_refunded")]
    PartiallyRefunded,
    #[sea_orm(string_value = "authorized")]
    Authorized,
    #[sea_orm(string_value = "voided")]
    Voided,
}

impl PaymentStatus {
    /// Payment states a completed capture may still settle to `paid`
    pub const SETTLEABLE: [PaymentStatus; 3] = [
        PaymentStatus::Pending,
        PaymentStatus::Authorized,
        PaymentStatus::Failed,
    ];

    pub fn is_settleable(self) -> bool {
        Self::SETTLEABLE.contains(&self)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PaymentMethod {
    #[default]
    #[sea_orm(string_value = "cash_on_delivery")]
    CashOnDelivery,
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "bank_transfer")]
    BankTransfer,
    #[sea_orm(string_value = "paypal")]
    #[strum(serialize = "paypal")]
    #[serde(rename = "paypal")]
    PayPal,
}

impl PaymentMethod {
    /// Methods settled through an external redirect flow
    pub fn requires_redirect(self) -> bool {
        matches!(self, PaymentMethod::PayPal)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ShippingMethod {
    #[default]
    #[sea_orm(string_value = "standard")]
    Standard,
    #[sea_orm(string_value = "free_shipping")]
    FreeShipping,
}
