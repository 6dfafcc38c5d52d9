use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum AduanaError {
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Malformed record: {message}")]
    MalformedRecord { message: String },

    #[error("Session has no items to publish")]
    EmptySession,

    #[error("Session {session_id} is busy publishing; retry when it finishes")]
    SessionBusy { session_id: String },

    #[error("Document processing error: {message}")]
    DocumentProcessing { message: String },

    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl AduanaError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn malformed_record(message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            message: message.into(),
        }
    }

    pub fn session_busy(session_id: impl ToString) -> Self {
        Self::SessionBusy {
            session_id: session_id.to_string(),
        }
    }

    pub fn document_processing(message: impl Into<String>) -> Self {
        Self::DocumentProcessing {
            message: message.into(),
        }
    }

    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::MalformedRecord { .. } => "MALFORMED_RECORD",
            Self::EmptySession => "EMPTY_SESSION",
            Self::SessionBusy { .. } => "SESSION_BUSY",
            Self::DocumentProcessing { .. } => "DOCUMENT_PROCESSING_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Internal { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::MalformedRecord { .. } => 422,
            Self::EmptySession => 422,
            Self::SessionBusy { .. } => 409,
            Self::DocumentProcessing { .. } => 422,
            Self::ExternalService { .. } => 502,
            Self::NotFound { .. } => 404,
            Self::Configuration { .. } => 500,
            Self::Internal { .. } => 500,
        }
    }

    /// Whether the user can resolve the error by retrying or adding data.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::SessionBusy { .. } | Self::ExternalService { .. } | Self::EmptySession
        )
    }
}

pub type AduanaResult<T> = Result<T, AduanaError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub message: String,
    pub retriable: bool,
    pub details: Option<serde_json::Value>,
}

impl From<AduanaError> for ErrorResponse {
    fn from(error: AduanaError) -> Self {
        let details = match &error {
            AduanaError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            AduanaError::ExternalService { service, .. } => {
                Some(serde_json::json!({ "service": service }))
            }
            _ => None,
        };
        Self {
            error: error.error_code().to_string(),
            code: error.error_code().to_string(),
            message: error.to_string(),
            retriable: error.is_retriable(),
            details,
        }
    }
}

// Conversion from common error types
impl From<reqwest::Error> for AduanaError {
    fn from(error: reqwest::Error) -> Self {
        Self::external_service("HTTP Client", error.to_string())
    }
}

impl From<serde_json::Error> for AduanaError {
    fn from(error: serde_json::Error) -> Self {
        Self::validation("JSON", error.to_string())
    }
}

impl From<std::io::Error> for AduanaError {
    fn from(error: std::io::Error) -> Self {
        Self::internal(error.to_string())
    }
}

impl From<config::ConfigError> for AduanaError {
    fn from(error: config::ConfigError) -> Self {
        Self::configuration(error.to_string())
    }
}
