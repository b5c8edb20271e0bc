use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use boxoffice_booking::CoordinatorError;
use boxoffice_catalog::{CatalogError, PricingError};
use boxoffice_core::{BoxError, CoreError, SeatConflict};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    #[error("{message}")]
    ConflictError { kind: &'static str, message: String, seats: Option<SeatConflict> },
    #[error("{0}")]
    ExpiredError(String),
    #[error("{0}")]
    PaymentFailed(String),
    #[error("{0}")]
    UpstreamError(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::AuthenticationError(_) => "UNAUTHENTICATED",
            AppError::AuthorizationError(_) => "NOT_OWNER",
            AppError::ValidationError(_) => "INVALID_INPUT",
            AppError::NotFoundError(_) => "NOT_FOUND",
            AppError::ConflictError { kind, .. } => *kind,
            AppError::ExpiredError(_) => "EXPIRED",
            AppError::PaymentFailed(_) => "PAYMENT_FAILED",
            AppError::UpstreamError(_) => "UPSTREAM_FAILURE",
            AppError::Unavailable(_) => "UNAVAILABLE",
            AppError::InternalServerError(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            AppError::AuthorizationError(_) => StatusCode::FORBIDDEN,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFoundError(_) => StatusCode::NOT_FOUND,
            AppError::ConflictError { .. } => StatusCode::CONFLICT,
            AppError::ExpiredError(_) => StatusCode::GONE,
            AppError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        let message = match &self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                "Internal Server Error".to_string()
            }
            AppError::UpstreamError(msg) | AppError::Unavailable(msg) => {
                tracing::error!(kind, "{}", msg);
                msg.clone()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "success": false,
            "error": message,
            "kind": kind,
        });
        if let AppError::ConflictError { seats: Some(conflict), .. } = &self {
            body["alreadyBooked"] = json!(conflict.already_booked);
            body["alreadyLocked"] = json!(conflict.already_locked);
        }

        (status, Json(body)).into_response()
    }
}

impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::InvalidInput(msg) => AppError::ValidationError(msg),
            CoordinatorError::UnknownShow(id) => AppError::NotFoundError(format!("Unknown show: {}", id)),
            CoordinatorError::NoReservation(msg) => AppError::NotFoundError(msg),
            CoordinatorError::Conflict(conflict) => AppError::ConflictError {
                kind: "CONFLICT",
                message: format!("Seats unavailable: {}", conflict),
                seats: Some(conflict),
            },
            e @ CoordinatorError::NotOwner { .. } => AppError::AuthorizationError(e.to_string()),
            e @ CoordinatorError::Expired { .. } => AppError::ExpiredError(e.to_string()),
            CoordinatorError::UpstreamFailure(msg) => AppError::UpstreamError(msg),
            e @ CoordinatorError::InvalidTransition { .. } => AppError::ConflictError {
                kind: "INVALID_TRANSITION",
                message: e.to_string(),
                seats: None,
            },
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => AppError::ValidationError(msg),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            e @ CatalogError::DuplicateShow(_) => AppError::ConflictError {
                kind: "DUPLICATE_SHOW",
                message: e.to_string(),
                seats: None,
            },
            CatalogError::InvalidLayout(msg) => AppError::ValidationError(msg),
        }
    }
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl From<BoxError> for AppError {
    fn from(err: BoxError) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}
