use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use mall_order_engine::{EngineError, GatewayError, SqliteDatabaseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("The caller could not be identified. {0}")]
    MissingCaller(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

impl ServerError {
    /// The machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Engine(e) => e.code(),
            Self::MissingCaller(_) => "UNAUTHENTICATED",
            Self::InvalidRequestBody(_) | Self::InvalidRequestPath(_) => "INVALID_PARAMETER",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCaller(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::Engine(e) => match e {
                EngineError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
                EngineError::UnsupportedPaymentMethod(_) => StatusCode::BAD_REQUEST,
                EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
                EngineError::ProductNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
                EngineError::InsufficientStock { .. } => StatusCode::CONFLICT,
                EngineError::PaymentStateInvalid { .. } => StatusCode::CONFLICT,
                EngineError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
                EngineError::PayeeMisconfigured(_) => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::GatewayFailure(_) => StatusCode::BAD_GATEWAY,
                EngineError::RefundFailed(_) => StatusCode::BAD_GATEWAY,
                EngineError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "code": self.code(), "error": self.to_string() }).to_string())
    }
}

impl From<SqliteDatabaseError> for ServerError {
    fn from(e: SqliteDatabaseError) -> Self {
        Self::InitializeError(format!("Database error: {e}"))
    }
}

impl From<GatewayError> for ServerError {
    fn from(e: GatewayError) -> Self {
        Self::ConfigurationError(format!("Payment gateway error: {e}"))
    }
}
