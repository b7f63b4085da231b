pub mod cart;
pub mod checkout;
pub mod order_number;
pub mod orders;
pub mod payments;
pub mod post_commit;
pub mod pricing;
