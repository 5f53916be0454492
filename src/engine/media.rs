use chrono::Utc;
use tracing::{error, info};

use crate::error::AppError;
use crate::session::Session;
use crate::state::AppState;

pub const PHOTO_BUCKET: &str = "report-photos";
pub const RESUME_BUCKET: &str = "resumes";
pub const MAX_PHOTOS: usize = 3;
pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub fn validate_photos(files: &[Upload]) -> Result<(), AppError> {
    if files.is_empty() {
        return Err(AppError::BadRequest("attach at least one photo".to_string()));
    }
    if files.len() > MAX_PHOTOS {
        return Err(AppError::BadRequest(format!(
            "you can only upload up to {MAX_PHOTOS} images"
        )));
    }

    for file in files {
        if !file.content_type.starts_with("image/") {
            return Err(AppError::BadRequest(format!(
                "{} is not an image",
                file.file_name
            )));
        }
        if file.bytes.len() > MAX_PHOTO_BYTES {
            return Err(AppError::BadRequest(format!(
                "{} is larger than 5 MB",
                file.file_name
            )));
        }
    }

    Ok(())
}

/// Keeps object keys a single path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Stores report or completion photos and returns their public URLs.
pub async fn upload_photos(
    state: &AppState,
    session: &Session,
    files: Vec<Upload>,
) -> Result<Vec<String>, AppError> {
    validate_photos(&files)?;

    let stamp = Utc::now().timestamp_millis();
    let mut urls = Vec::with_capacity(files.len());

    for (index, file) in files.into_iter().enumerate() {
        let path = format!(
            "{}/{stamp}-{index}-{}",
            session.user_id,
            sanitize_file_name(&file.file_name)
        );

        state
            .storage
            .upload(PHOTO_BUCKET, &path, file.bytes, &file.content_type)
            .await
            .inspect_err(|err| error!(error = %err, path = %path, "photo upload failed"))?;

        urls.push(state.storage.public_url(PHOTO_BUCKET, &path));
    }

    info!(user_id = %session.user_id, count = urls.len(), "photos uploaded");
    Ok(urls)
}
