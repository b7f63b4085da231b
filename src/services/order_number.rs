use chrono::Utc;
use rand::{distributions::Uniform, Rng};
use sea_orm::{DbErr, SqlErr};
use std::sync::Arc;

const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 6;

/// Source of candidate order numbers, swappable in tests
pub type OrderNumberFn = Arc<dyn Fn() -> String + Send + Sync>;

/// `<prefix>-<YYYYMMDDHHMMSS>-<6 uppercase alphanumerics>`
pub fn generate(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let dist = Uniform::from(0..SUFFIX_ALPHABET.len());
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.sample(dist)] as char)
        .collect();
    format!("{}-{}-{}", prefix, Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

pub fn generator(prefix: impl Into<String>) -> OrderNumberFn {
    let prefix = prefix.into();
    Arc::new(move || generate(&prefix))
}

/// True when the insert lost a race on `orders.order_number`
pub fn is_order_number_conflict(err: &DbErr) -> bool {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message)) => message.contains("order_number"),
        _ => false,
    }
}
