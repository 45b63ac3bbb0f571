use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use payclaim_core::VerifyError;
use payclaim_ingest::SyncError;
use payclaim_storage::StoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    code: &'static str,
    message: String,
}

/// Every failure leaves the service as `{ ok: false, code, message }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "invalid_input", "Method not allowed")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            ok: false,
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<VerifyError> for ApiError {
    fn from(e: VerifyError) -> Self {
        let status = match e {
            VerifyError::InvalidInput(_) | VerifyError::AmountMismatch => StatusCode::BAD_REQUEST,
            VerifyError::NotFound => StatusCode::NOT_FOUND,
            VerifyError::AlreadyUsed => StatusCode::CONFLICT,
            VerifyError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Store details stay in the logs.
        let message = match &e {
            VerifyError::ServerError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        ApiError::new(status, e.code(), message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("rejected request body: {rejection}");
        ApiError::invalid_input(
            "Invalid input parameters. Check transactionId, amount, or provider.",
        )
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        if let StoreError::InvalidRecord(reason) = e {
            return ApiError::invalid_input(reason);
        }
        tracing::error!("store failure: {e}");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "Internal server error",
        )
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::UnknownPayment(_) => ApiError::not_found(e.to_string()),
            SyncError::InvalidTransition { .. } => {
                ApiError::new(StatusCode::CONFLICT, "invalid_transition", e.to_string())
            }
            SyncError::EmptyCorrection => ApiError::invalid_input(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_errors_map_to_statuses() {
        let cases = [
            (VerifyError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (VerifyError::AmountMismatch, StatusCode::BAD_REQUEST),
            (VerifyError::NotFound, StatusCode::NOT_FOUND),
            (VerifyError::AlreadyUsed, StatusCode::CONFLICT),
            (VerifyError::ServerError("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn server_error_hides_detail() {
        let api = ApiError::from(VerifyError::ServerError("database is locked".into()));
        assert_eq!(api.code, "server_error");
        assert!(!api.message.contains("locked"));
    }

    #[test]
    fn invalid_record_is_client_error() {
        let api = ApiError::from(StoreError::InvalidRecord("observedAt year 10000".into()));
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.code, "invalid_input");

        let api = ApiError::from(StoreError::Corrupt("bad".into()));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
