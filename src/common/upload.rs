use axum::extract::multipart::Field;
use futures_util::{StreamExt, TryStreamExt};
use mime::Mime;
use tracing::{error, info};

use crate::common::error::AppError;
use crate::infrastructure::storage::{MediaStore, StoreError};

/// Content types accepted for transcode sources.
pub fn accepted_content_type(content_type: &str) -> bool {
    match content_type.parse::<Mime>() {
        Ok(parsed) => {
            parsed.type_() == mime::VIDEO
                || parsed.essence_str() == mime::APPLICATION_OCTET_STREAM.essence_str()
        }
        Err(_) => false,
    }
}

pub fn field_content_type(field: &Field<'_>) -> String {
    field
        .content_type()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM.as_ref())
        .to_string()
}

/// Streams a multipart field into the store under `key`. An interrupted
/// body leaves no object behind.
pub async fn stream_to_store(
    store: &dyn MediaStore,
    field: Field<'_>,
    key: &str,
) -> Result<(), AppError> {
    let content_type = field_content_type(&field);
    if !accepted_content_type(&content_type) {
        return Err(AppError::Validation(format!(
            "invalid content type '{}': only video/* and {} are accepted",
            content_type,
            mime::APPLICATION_OCTET_STREAM
        )));
    }

    let body = field
        .map_err(|e| StoreError::InvalidInput(format!("upload stream interrupted: {}", e)))
        .boxed();

    if let Err(e) = store.put(key, &content_type, body).await {
        error!(key, error = %e, "Upload failed");
        return Err(e.into());
    }

    info!(key, content_type = %content_type, "Upload stored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_video_and_raw_bytes_are_accepted() {
        assert!(accepted_content_type("video/mp4"));
        assert!(accepted_content_type("Video/QuickTime"));
        assert!(accepted_content_type("application/octet-stream"));
        assert!(accepted_content_type("video/mp4; codecs=avc1"));
        assert!(!accepted_content_type("image/png"));
        assert!(!accepted_content_type("text/plain"));
    }
}
