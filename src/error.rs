use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::ErrorBody;

/// Errors returned to HTTP clients. Every variant renders as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("No image uploaded")]
    MissingImage,

    #[error("Invalid image file: {0}")]
    InvalidImage(String),

    #[error("Invalid multipart payload: {0}")]
    Multipart(String),

    #[error("Image exceeds upload limit of {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Inference failed")]
    Inference(#[from] InferenceError),

    #[error("Internal server error")]
    Internal(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingImage | AppError::InvalidImage(_) | AppError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Inference(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Inference(e) => tracing::error!("Inference error: {}", e),
            AppError::Internal(msg) => tracing::error!("Internal error: {}", msg),
            other => tracing::debug!("Rejected request: {}", other),
        }

        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

/// Failures while turning an image into a classification.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    #[error("model run failed: {0}")]
    Model(String),

    #[error("model produced {actual} logits, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("model output is empty or not a number")]
    InvalidOutput,
}

/// Failures while loading the model and its metadata at startup.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid label mapping: {0}")]
    Labels(String),

    #[error("cannot load ONNX model: {0}")]
    Model(String),

    #[error("model outputs {outputs} classes but {labels} labels are configured")]
    OutputWidth { labels: usize, outputs: usize },
}
