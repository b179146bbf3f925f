pub mod classifier;
pub mod config;
pub mod error;
pub mod handlers;
pub mod labels;
pub mod models;
pub mod preprocess;

use std::sync::Arc;

use actix_web::web;

use crate::classifier::ImageClassifier;

pub use error::{AppError, InferenceError, LoadError};

/// Shared, read-only state handed to every worker.
pub struct AppState {
    pub classifier: Arc<dyn ImageClassifier>,
    pub max_upload_bytes: usize,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict").route(web::post().to(handlers::predict)))
        .service(web::resource("/health").route(web::get().to(handlers::health)));
}
