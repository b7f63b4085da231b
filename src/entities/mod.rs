pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod product;
pub mod product_variant;

pub use order::{OrderStatus, PaymentMethod, PaymentStatus, ShippingMethod};
