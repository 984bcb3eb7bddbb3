//! Structured API error responses with stable error codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error
/// handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (3xxx)
    /// Request body is malformed
    InvalidRequestBody,
    /// Field value is invalid
    InvalidFieldValue,

    // Resource errors (4xxx)
    /// Merchant not found
    MerchantNotFound,
    /// Customer not found
    CustomerNotFound,
    /// Reward not found or inactive
    RewardNotFound,
    /// Redemption not found
    RedemptionNotFound,
    /// Token not found
    TokenNotFound,

    // Business-rule rejections (5xxx)
    /// No points rule configured yet
    RulesMissing,
    /// Balance below the reward cost
    InsufficientPoints,
    /// Customer is blocked
    CustomerBlocked,
    /// Token is revoked
    TokenInactive,
    /// Idempotency-key conflict that could not be resolved to an entry
    IdempotencyConflict,

    // Infrastructure errors (8xxx)
    /// Database operation failed
    DatabaseError,
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::InvalidRequestBody => 3001,
            ErrorCode::InvalidFieldValue => 3002,

            ErrorCode::MerchantNotFound => 4001,
            ErrorCode::CustomerNotFound => 4002,
            ErrorCode::RewardNotFound => 4003,
            ErrorCode::RedemptionNotFound => 4004,
            ErrorCode::TokenNotFound => 4005,

            ErrorCode::RulesMissing => 5001,
            ErrorCode::InsufficientPoints => 5002,
            ErrorCode::CustomerBlocked => 5003,
            ErrorCode::TokenInactive => 5004,
            ErrorCode::IdempotencyConflict => 5005,

            ErrorCode::DatabaseError => 8001,
            ErrorCode::InternalError => 8999,
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequestBody | ErrorCode::InvalidFieldValue => StatusCode::BAD_REQUEST,

            ErrorCode::MerchantNotFound
            | ErrorCode::CustomerNotFound
            | ErrorCode::RewardNotFound
            | ErrorCode::RedemptionNotFound
            | ErrorCode::TokenNotFound => StatusCode::NOT_FOUND,

            ErrorCode::RulesMissing | ErrorCode::InsufficientPoints => StatusCode::CONFLICT,
            ErrorCode::CustomerBlocked | ErrorCode::TokenInactive => StatusCode::FORBIDDEN,
            ErrorCode::IdempotencyConflict => StatusCode::INTERNAL_SERVER_ERROR,

            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code_str = match self {
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::InvalidFieldValue => "INVALID_FIELD_VALUE",
            ErrorCode::MerchantNotFound => "MERCHANT_NOT_FOUND",
            ErrorCode::CustomerNotFound => "CUSTOMER_NOT_FOUND",
            ErrorCode::RewardNotFound => "REWARD_NOT_FOUND",
            ErrorCode::RedemptionNotFound => "REDEMPTION_NOT_FOUND",
            ErrorCode::TokenNotFound => "TOKEN_NOT_FOUND",
            ErrorCode::RulesMissing => "RULES_MISSING",
            ErrorCode::InsufficientPoints => "INSUFFICIENT_POINTS",
            ErrorCode::CustomerBlocked => "CUSTOMER_BLOCKED",
            ErrorCode::TokenInactive => "TOKEN_INACTIVE",
            ErrorCode::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", code_str)
    }
}

/// Structured error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

/// Detailed error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code for easy categorization
    pub numeric_code: u32,

    /// Human-readable error message
    pub message: String,

    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.to_string();
        let mut response = (status, Json(self)).into_response();

        if let Ok(code_value) = axum::http::HeaderValue::from_str(&code_str) {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-error-code"),
                code_value,
            );
        }

        response
    }
}

impl From<crate::infra::LedgerError> for ApiError {
    fn from(err: crate::infra::LedgerError) -> Self {
        use crate::infra::LedgerError;

        match err {
            LedgerError::Database(e) => {
                ApiError::new(ErrorCode::DatabaseError, format!("database error: {}", e))
            }
            LedgerError::MerchantNotFound(id) => ApiError::new(
                ErrorCode::MerchantNotFound,
                format!("merchant not found: {}", id),
            ),
            LedgerError::CustomerNotFound(id) => ApiError::new(
                ErrorCode::CustomerNotFound,
                format!("customer not found: {}", id),
            ),
            LedgerError::CustomerBlocked(id) => ApiError::new(
                ErrorCode::CustomerBlocked,
                format!("customer is blocked: {}", id),
            ),
            LedgerError::RewardNotFound(id) => ApiError::new(
                ErrorCode::RewardNotFound,
                format!("reward not found: {}", id),
            ),
            LedgerError::RedemptionNotFound(id) => ApiError::new(
                ErrorCode::RedemptionNotFound,
                format!("redemption not found: {}", id),
            ),
            LedgerError::TokenNotFound => ApiError::new(ErrorCode::TokenNotFound, "token not found"),
            LedgerError::TokenInactive => {
                ApiError::new(ErrorCode::TokenInactive, "token is not active")
            }
            LedgerError::RulesMissing(id) => ApiError::new(
                ErrorCode::RulesMissing,
                format!("no points rule configured for merchant {}", id),
            ),
            LedgerError::InsufficientPoints { balance, required } => ApiError::new(
                ErrorCode::InsufficientPoints,
                format!("insufficient points: balance {balance}, required {required}"),
            )
            .with_details(serde_json::json!({
                "balance": balance,
                "required": required,
            })),
            LedgerError::IdempotencyConflict(key) => ApiError::new(
                ErrorCode::IdempotencyConflict,
                format!("idempotency conflict for key {key:?}"),
            ),
            LedgerError::Validation(msg) => ApiError::new(ErrorCode::InvalidFieldValue, msg),
            LedgerError::Internal(msg) => ApiError::new(ErrorCode::InternalError, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MerchantId;
    use crate::infra::LedgerError;

    #[test]
    fn error_code_numeric() {
        assert_eq!(ErrorCode::InvalidRequestBody.numeric_code(), 3001);
        assert_eq!(ErrorCode::MerchantNotFound.numeric_code(), 4001);
        assert_eq!(ErrorCode::InsufficientPoints.numeric_code(), 5002);
        assert_eq!(ErrorCode::InternalError.numeric_code(), 8999);
    }

    #[test]
    fn error_code_http_status() {
        assert_eq!(
            ErrorCode::CustomerNotFound.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ErrorCode::InsufficientPoints.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCode::CustomerBlocked.http_status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ErrorCode::IdempotencyConflict.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn insufficient_points_carries_details() {
        let api: ApiError = LedgerError::InsufficientPoints {
            balance: 10,
            required: 50,
        }
        .into();
        assert_eq!(api.error.code, ErrorCode::InsufficientPoints);
        let details = api.error.details.unwrap();
        assert_eq!(details["balance"], 10);
        assert_eq!(details["required"], 50);
    }

    #[test]
    fn rules_missing_maps_to_conflict() {
        let api: ApiError = LedgerError::RulesMissing(MerchantId::new()).into();
        assert_eq!(api.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn error_serialization() {
        let error = ApiError::new(ErrorCode::RewardNotFound, "reward not found");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("REWARD_NOT_FOUND"));
        assert!(json.contains("4003"));
    }
}
