use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use fee_payment_engine::{PaymentGatewayError, StudentApiError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("The request conflicts with the current state of the payment. {0}")]
    Conflict(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<StudentApiError> for ServerError {
    fn from(e: StudentApiError) -> Self {
        match e {
            StudentApiError::DatabaseError(e) => Self::BackendError(format!("Database error: {e}")),
            StudentApiError::QueryError(e) => Self::InvalidRequestPath(e),
        }
    }
}

impl From<PaymentGatewayError> for ServerError {
    fn from(e: PaymentGatewayError) -> Self {
        match e {
            PaymentGatewayError::PaymentNotFound(_) | PaymentGatewayError::StudentNotFound(_) => {
                Self::NoRecordFound(e.to_string())
            },
            PaymentGatewayError::IllegalStatusTransition { .. } |
            PaymentGatewayError::StudentMismatch { .. } |
            PaymentGatewayError::AllocationConflict(_) |
            PaymentGatewayError::PaymentAlreadyExists(_) |
            PaymentGatewayError::StudentAlreadyExists(_) => Self::Conflict(e.to_string()),
            PaymentGatewayError::CurrencyMismatch { .. } | PaymentGatewayError::NonPositiveAmount(_) => {
                Self::InvalidRequestBody(e.to_string())
            },
            PaymentGatewayError::StudentError(e) => e.into(),
            PaymentGatewayError::DatabaseError(_) | PaymentGatewayError::UnsupportedAction(_) => {
                Self::BackendError(e.to_string())
            },
        }
    }
}
