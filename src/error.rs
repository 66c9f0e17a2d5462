//! # Error Handling
//!
//! Custom error types and their conversion to HTTP responses.
//!
//! The pipeline has three isolated failure domains, each with its own
//! variant and status code: saving the upload (500), running the external
//! normalization tool (400), and model inference (500). A failure in one
//! domain never attempts the next step, and no partial results are
//! returned. Temp-file deletion failures are deliberately not represented
//! here; they are swallowed at the call site.
//!
//! All errors reach the caller as `{"error": message}` with no internal
//! retry; the service is stateless per request and expects the caller to
//! retry if desired.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Request-level error taxonomy.
#[derive(Debug)]
pub enum AppError {
    /// Writing the uploaded file to disk failed
    Storage(String),

    /// The external media tool failed to produce a usable waveform;
    /// carries the tool's truncated diagnostic output
    Normalization(String),

    /// Model inference failed
    Transcription(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Storage(msg) => write!(f, "save failed: {}", msg),
            AppError::Normalization(msg) => write!(f, "{}", msg),
            AppError::Transcription(msg) => write!(f, "transcribe failed: {}", msg),
        }
    }
}

/// Converts each error domain into its wire response.
///
/// ## HTTP Status Code Mapping:
/// - Storage → 500 (the server failed to persist a valid upload)
/// - Normalization → 400 (the uploaded media could not be converted,
///   almost always because the client sent something that is not audio)
/// - Transcription → 500
///
/// The body is always `{"error": "<message>"}`; the message already carries
/// its domain prefix from the Display impl.
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = match self {
            AppError::Storage(_) => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Normalization(_) => actix_web::http::StatusCode::BAD_REQUEST,
            AppError::Transcription(_) => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        };

        HttpResponse::build(status).json(json!({
            "error": self.to_string()
        }))
    }
}

impl From<crate::audio::normalize::NormalizationError> for AppError {
    fn from(err: crate::audio::normalize::NormalizationError) -> Self {
        AppError::Normalization(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
