//! Serving saved uploads

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::error;

use crate::error::ApiError;
use crate::state::SharedState;

/// GET /uploads/*filename - Stream a previously uploaded file
pub async fn serve_upload(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let canonical_base = state.upload_dir.canonicalize().map_err(|e| {
        error!("Failed to canonicalize upload dir: {}", e);
        ApiError::Internal("Server error".to_string())
    })?;

    let canonical_file = state
        .upload_dir
        .join(&filename)
        .canonicalize()
        .map_err(|_| ApiError::NotFound)?;

    // Security: the resolved file must stay inside the upload directory
    if !canonical_file.starts_with(&canonical_base) {
        return Err(ApiError::Forbidden);
    }

    let metadata = fs::metadata(&canonical_file)
        .await
        .map_err(|_| ApiError::NotFound)?;
    if !metadata.is_file() {
        return Err(ApiError::NotFound);
    }

    let file = fs::File::open(&canonical_file).await?;
    let content_type = content_type_for(&canonical_file);
    let body = Body::from_stream(ReaderStream::new(file));

    Ok(([(header::CONTENT_TYPE, content_type)], body))
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type_for(std::path::Path::new("a.PNG")), "image/png");
        assert_eq!(content_type_for(std::path::Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(
            content_type_for(std::path::Path::new("a.heic")),
            "application/octet-stream"
        );
    }
}
