use actix_multipart::{Multipart, MultipartError};
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ClassificationResult, Diagnosis, HealthResponse, PredictionResponse};
use crate::AppState;

/// Multipart field carrying the uploaded leaf image.
pub const IMAGE_FIELD: &str = "image";

pub async fn predict(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let span = tracing::info_span!("predict", request_id = %Uuid::new_v4());

    async move {
        let bytes = read_image_field(&mut payload, state.max_upload_bytes).await?;
        tracing::debug!("Received image of {} bytes", bytes.len());

        // Decoding and inference are CPU bound; keep them off the async workers.
        let classifier = state.classifier.clone();
        let result = web::block(move || -> Result<ClassificationResult, AppError> {
            let image = image::load_from_memory(&bytes)
                .map_err(|e| AppError::InvalidImage(e.to_string()))?
                .to_rgb8();
            Ok(classifier.classify(&image)?)
        })
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

        tracing::info!(
            "Predicted {} with confidence {:.4}",
            result.label,
            result.confidence
        );

        Ok::<_, AppError>(HttpResponse::Ok().json(PredictionResponse {
            prediction: Diagnosis::from(result),
        }))
    }
    .instrument(span)
    .await
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        labels: state.classifier.label_count(),
    })
}

/// Buffers the first non-empty `image` file part. Every other field is drained and dropped.
async fn read_image_field(payload: &mut Multipart, limit: usize) -> Result<Vec<u8>, AppError> {
    let mut image: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(multipart_error)?;
        // Only file parts count; a plain text field named `image` is not an upload.
        let disposition = field.content_disposition();
        let wanted = image.is_none()
            && disposition.get_name() == Some(IMAGE_FIELD)
            && disposition.get_filename().is_some();

        let mut buf = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(multipart_error)?;
            if !wanted {
                continue;
            }
            if buf.len() + data.len() > limit {
                return Err(AppError::PayloadTooLarge(limit));
            }
            buf.extend_from_slice(&data);
        }

        if wanted && !buf.is_empty() {
            image = Some(buf);
        }
    }

    image.ok_or(AppError::MissingImage)
}

fn multipart_error(err: MultipartError) -> AppError {
    match err {
        // Not a multipart body at all, so there is no image field.
        MultipartError::NoContentType
        | MultipartError::ParseContentType
        | MultipartError::Boundary => AppError::MissingImage,
        other => AppError::Multipart(other.to_string()),
    }
}
