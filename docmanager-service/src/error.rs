use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::status::ProcessingStatus;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Tag not found: {tag_id}")]
    TagNotFound { tag_id: String },

    #[error("Document {document_id} is not associated with tag {tag_id}")]
    DocumentTagNotFound { document_id: String, tag_id: String },

    #[error("Tag with label '{label}' already exists")]
    DuplicateTag { label: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    #[error("{0}")]
    Ollama(#[from] OllamaError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Object storage error")]
    Storage(#[from] StorageError),

    #[error("Queue error")]
    Queue(#[from] QueueError),

    #[error("Document processing failed")]
    Processing(#[from] ProcessingError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Ollama client errors
#[derive(Error, Debug)]
pub enum OllamaError {
    #[error("Connection failed to Ollama at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Generation failed (status {status}): {message}")]
    Generation { status: u16, message: String },

    #[error("Invalid response from Ollama")]
    InvalidResponse {
        #[source]
        source: reqwest::Error,
    },

    #[error("Ollama returned an empty embedding")]
    EmptyEmbedding,
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },
}

/// Object storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Invalid object key: {key}")]
    InvalidKey { key: String },

    #[error("Object I/O failed for {key}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Signed URL is invalid or expired")]
    InvalidSignature,
}

/// Message queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Malformed message {message_id}")]
    MalformedMessage {
        message_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode message")]
    Encode(#[source] serde_json::Error),
}

/// Document processing errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Failed to extract text from page {page}")]
    TextExtraction {
        page: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Upload exceeds the {max} byte limit")]
    UploadTooLarge { max: u64 },

    #[error("Nothing to summarize")]
    NothingToSummarize,
}

/// API error response (matches Axum's built-in JsonRejection format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. }
            | ServiceError::TagNotFound { .. }
            | ServiceError::DocumentTagNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Storage(StorageError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::DuplicateTag { .. } | ServiceError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            ServiceError::InvalidRequest { .. }
            | ServiceError::Storage(StorageError::InvalidKey { .. }) => StatusCode::BAD_REQUEST,
            ServiceError::Storage(StorageError::InvalidSignature) => StatusCode::FORBIDDEN,
            ServiceError::Ollama(OllamaError::ModelNotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. })
            | ServiceError::Processing(ProcessingError::UploadTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::Processing(ProcessingError::NothingToSummarize) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::TagNotFound { .. } => "tag_not_found",
            ServiceError::DocumentTagNotFound { .. } => "document_tag_not_found",
            ServiceError::DuplicateTag { .. } => "duplicate_tag",
            ServiceError::InvalidTransition { .. } => "invalid_status_transition",
            ServiceError::Ollama(OllamaError::Connection { .. }) => "ollama_connection",
            ServiceError::Ollama(OllamaError::ModelNotFound { .. }) => "ollama_model_not_found",
            ServiceError::Ollama(OllamaError::Generation { .. }) => "ollama_generation",
            ServiceError::Ollama(OllamaError::InvalidResponse { .. })
            | ServiceError::Ollama(OllamaError::EmptyEmbedding) => "ollama_invalid_response",
            ServiceError::Database(_) => "database_error",
            ServiceError::Storage(StorageError::NotFound { .. }) => "object_not_found",
            ServiceError::Storage(StorageError::InvalidKey { .. }) => "invalid_object_key",
            ServiceError::Storage(StorageError::InvalidSignature) => "invalid_signature",
            ServiceError::Storage(StorageError::Io { .. }) => "storage_io_error",
            ServiceError::Queue(_) => "queue_error",
            ServiceError::Processing(ProcessingError::TextExtraction { .. }) => {
                "text_extraction_error"
            }
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                "unsupported_format"
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. })
            | ServiceError::Processing(ProcessingError::UploadTooLarge { .. }) => "file_too_large",
            ServiceError::Processing(ProcessingError::NothingToSummarize) => {
                "nothing_to_summarize"
            }
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }

    /// Whether a worker should leave the message for redelivery rather than
    /// failing the document.
    ///
    /// I/O against the object store, model connectivity and server-side
    /// model failures, and a busy database are transient. Everything that
    /// would fail identically on the next attempt is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Storage(StorageError::Io { .. }) => true,
            ServiceError::Ollama(OllamaError::Connection { .. }) => true,
            ServiceError::Ollama(OllamaError::Generation { status, .. }) => *status >= 500,
            ServiceError::Database(DatabaseError::Query(e))
            | ServiceError::Database(DatabaseError::Connection(e)) => is_busy(e),
            _ => false,
        }
    }
}

fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        if status.is_server_error() {
            tracing::error!(error = %format_error_chain(&self), code = %code, "Request failed");
        }

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error and its full source chain on one line.
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let not_found = ServiceError::DocumentNotFound {
            document_id: "abc".to_string(),
        };
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let transition = ServiceError::InvalidTransition {
            from: ProcessingStatus::Completed,
            to: ProcessingStatus::Processing,
        };
        assert_eq!(transition.status_code(), StatusCode::CONFLICT);
        assert_eq!(transition.error_code(), "invalid_status_transition");

        let too_large = ServiceError::Processing(ProcessingError::FileTooLarge { size: 10, max: 5 });
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_transient_classification() {
        let io = ServiceError::Storage(StorageError::Io {
            key: "documents/a.pdf".to_string(),
            source: std::io::Error::other("disk"),
        });
        assert!(io.is_transient());

        let server_side = ServiceError::Ollama(OllamaError::Generation {
            status: 503,
            message: "loading".to_string(),
        });
        assert!(server_side.is_transient());

        let rejected = ServiceError::Ollama(OllamaError::Generation {
            status: 400,
            message: "bad input".to_string(),
        });
        assert!(!rejected.is_transient());

        assert!(
            !ServiceError::Processing(ProcessingError::UnsupportedFormat {
                format: "text/plain".to_string()
            })
            .is_transient()
        );
        assert!(
            !ServiceError::Storage(StorageError::NotFound {
                key: "gone".to_string()
            })
            .is_transient()
        );
    }

    #[test]
    fn test_format_error_chain() {
        let error = ServiceError::Storage(StorageError::Io {
            key: "documents/a.pdf".to_string(),
            source: std::io::Error::other("disk full"),
        });
        assert_eq!(
            format_error_chain(&error),
            "Object storage error: Object I/O failed for documents/a.pdf: disk full"
        );
    }
}
