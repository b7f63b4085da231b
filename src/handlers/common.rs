use axum::{http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::services::pricing::round_money;
use crate::{ApiResponse, ApiResult};

/// Standard success response
pub fn success_response<T: Serialize>(message: &str, data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(message, data))))
}

/// Standard created response
pub fn created_response<T: Serialize>(message: &str, data: T) -> ApiResult<T> {
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_status(StatusCode::CREATED, message, data)),
    ))
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

/// Money as it leaves the API: two fraction digits
pub fn money(value: Decimal) -> Decimal {
    round_money(value)
}

/// Pagination parameters for list operations
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub per_page: Option<u64>,
}

impl PaginationParams {
    /// 1-based page and a page size bounded by the configured maximum
    pub fn resolve(&self, cfg: &AppConfig) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(cfg.api_default_page_size)
            .clamp(1, cfg.api_max_page_size.max(1));
        (page, per_page)
    }
}

/// Standard paginated response wrapper
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, page: u64, per_page: u64, total: u64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + per_page - 1) / per_page
        };
        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "storefront_unit_test_signing_key_9f8e7d6c5b4a_qwerty_zxcvbn_10293847".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    #[test]
    fn pagination_defaults_and_caps() {
        let cfg = cfg();
        assert_eq!(PaginationParams::default().resolve(&cfg), (1, 20));
        let params = PaginationParams {
            page: Some(0),
            per_page: Some(10_000),
        };
        assert_eq!(params.resolve(&cfg), (1, 100));
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = PaginatedResponse::new(vec![1, 2], 1, 20, 41);
        assert_eq!(page.total_pages, 3);
        assert_eq!(PaginatedResponse::<u8>::new(vec![], 1, 20, 0).total_pages, 0);
    }
}
