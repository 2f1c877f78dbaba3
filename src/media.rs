use rusqlite::Connection;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::{ALLOWED_IMAGE_EXTENSIONS, AVATARS_DIR, DEFAULT_AVATAR};
use crate::error::ApiError;
use crate::validate::parse_id;

/// Checks the uploaded filename against the allowed image formats and
/// returns the normalized extension.
pub fn validate_extension(original_name: &str) -> Result<String, ApiError> {
    let extension = original_name
        .rsplit('.')
        .next()
        .map(str::to_lowercase)
        .unwrap_or_default();

    if !ALLOWED_IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "invalid image format, allowed formats: {}",
            ALLOWED_IMAGE_EXTENSIONS.join(", ")
        )));
    }

    Ok(extension)
}

/// Writes an upload under `dir` with a generated uuid name, keeping the
/// original extension. Returns the stored filename.
pub async fn store_upload(dir: &Path, original_name: &str, data: &[u8]) -> Result<String, ApiError> {
    let extension = validate_extension(original_name)?;
    let filename = format!("{}.{}", Uuid::new_v4(), extension);

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    tokio::fs::write(dir.join(&filename), data)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(filename)
}

/// Async flavor of `delete_media` for handler call sites, where blocking
/// the runtime on file I/O is not acceptable.
pub async fn delete_media_async(dir: &Path, filename: &str) {
    if filename == DEFAULT_AVATAR {
        return;
    }
    let path = dir.join(filename);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("failed to delete media file {:?}: {}", path, e),
    }
}

/// Removes a stored media file. The shared default placeholder is never
/// deleted, and a file that is already gone is not an error.
pub fn delete_media(dir: &Path, filename: &str) {
    if filename == DEFAULT_AVATAR {
        return;
    }
    let path = dir.join(filename);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!("failed to delete media file {:?}: {}", path, e);
        }
    }
}

/// Maps a user to the filesystem path of their avatar.
pub fn resolve_avatar_path(conn: &Connection, user_id: &str) -> Result<PathBuf, ApiError> {
    let id = parse_id(user_id, "user")?;
    let user = crate::users::find_user(conn, &id)?.ok_or_else(|| {
        ApiError::NotFound("user not found".to_string())
    })?;
    Ok(Path::new(AVATARS_DIR).join(user.image))
}
