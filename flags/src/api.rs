use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::flag_definitions::ValueError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("flagKeys must not be empty")]
    EmptyFlagKeys,

    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("rolloutPercentage must be between 0 and 100")]
    RolloutPercentageOutOfRange,

    #[error("authentication required")]
    Unauthenticated,

    #[error("administrator privilege required")]
    Forbidden,

    #[error("invalid flag value: {0}")]
    Value(#[from] ValueError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for FlagError {
    fn into_response(self) -> Response {
        let status = match self {
            FlagError::EmptyFlagKeys
            | FlagError::Validation { .. }
            | FlagError::RolloutPercentageOutOfRange
            | FlagError::Value(_) => StatusCode::BAD_REQUEST,

            FlagError::Unauthenticated => StatusCode::UNAUTHORIZED,
            FlagError::Forbidden => StatusCode::FORBIDDEN,

            FlagError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        ApiResponse {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct PagedResponse<T: Serialize> {
    pub success: bool,
    pub data: Vec<T>,
    pub pagination: Pagination,
}
