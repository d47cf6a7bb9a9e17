//! Prediction endpoint

use std::path::Path;

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use chrono::Local;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::history::PredictionRecord;
use crate::state::SharedState;

/// Multipart field carrying the image
pub const IMAGE_FIELD: &str = "image";

/// Timestamp format of prediction records
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// POST /predict - Save the uploaded image, classify it and log the result
///
/// The history write runs detached and never affects the response.
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionRecord>, ApiError> {
    let mut multipart = multipart.map_err(|_| ApiError::MissingImage)?;
    let (filename, bytes) = read_image_field(&mut multipart).await?;

    let saved_path = state.upload_dir.join(&filename);
    tokio::fs::write(&saved_path, &bytes).await?;
    debug!("Saved upload to {}", saved_path.display());

    let worker_state = state.clone();
    let worker_path = saved_path.clone();
    let prediction =
        tokio::task::spawn_blocking(move || worker_state.predictor.predict_path(&worker_path))
            .await
            .map_err(|e| ApiError::Internal(format!("inference task failed: {}", e)))??;

    let stored = PredictionRecord {
        image: saved_path.to_string_lossy().to_string(),
        label: prediction.label,
        confidence: prediction.confidence,
        time: Local::now().format(TIME_FORMAT).to_string(),
    };

    if let Some(history) = state.history.clone() {
        let record = stored.clone();
        tokio::spawn(async move {
            if let Err(e) = history.insert(&record).await {
                warn!("Failed to record prediction history: {}", e);
            }
        });
    }

    info!(
        "{} -> {} ({:.3})",
        filename, stored.label, stored.confidence
    );

    Ok(Json(PredictionRecord {
        image: format!("/uploads/{}", filename),
        ..stored
    }))
}

/// Find the `image` field and return its sanitised filename and bytes
async fn read_image_field(multipart: &mut Multipart) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::MissingImage)?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .and_then(upload_file_name)
            .ok_or(ApiError::MissingImage)?;
        let bytes = field.bytes().await.map_err(|_| ApiError::MissingImage)?;
        return Ok((filename, bytes.to_vec()));
    }

    Err(ApiError::MissingImage)
}

/// Final path component of a client-supplied filename
pub fn upload_file_name(raw: &str) -> Option<String> {
    let normalised = raw.replace('\\', "/");
    Path::new(&normalised)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_file_name_keeps_last_component() {
        assert_eq!(upload_file_name("leaf.jpg").as_deref(), Some("leaf.jpg"));
        assert_eq!(
            upload_file_name("../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(
            upload_file_name("C:\\Users\\me\\leaf.png").as_deref(),
            Some("leaf.png")
        );
        assert_eq!(upload_file_name(".."), None);
        assert_eq!(upload_file_name(""), None);
    }
}
