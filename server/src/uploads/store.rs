//! On-disk storage for uploaded media.

use std::path::{Path, PathBuf};

use crate::error::{ApiError, ApiResult};
use crate::uploads::form::UploadedFile;

/// Extensions accepted for any upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "txt", "pdf", "png", "jpg", "jpeg", "gif", "mp4", "avi", "mov",
];

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

/// Metadata of a file written by [`save`].
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_name: String,
    pub original_name: String,
    pub size: i64,
    pub media_type: &'static str,
}

/// Lowercased extension after the last dot, if any.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() && ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_allowed(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// Media classification stored alongside timeline entries and capsules.
pub fn media_type_for(ext: &str) -> &'static str {
    if IMAGE_EXTENSIONS.contains(&ext) {
        "image"
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        "video"
    } else {
        "file"
    }
}

pub fn content_type_for(name: &str) -> &'static str {
    match extension_of(name).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// A bare file name: no separators, no parent references.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.starts_with('.')
}

/// Directory holding capsule media, outside the public uploads route.
pub fn capsule_dir(upload_dir: &Path) -> PathBuf {
    upload_dir.join("capsules")
}

pub fn public_url(file_name: &str) -> String {
    format!("/uploads/{}", file_name)
}

/// Write an upload under a fresh `{prefix}_{uuid}.{ext}` name.
pub fn save(dir: &Path, prefix: &str, file: &UploadedFile) -> ApiResult<StoredFile> {
    let ext = match file.extension() {
        Some(ext) if file.is_allowed() => ext,
        _ => {
            return Err(ApiError::validation(format!(
                "File type not allowed: {}",
                file.original_name
            )))
        }
    };

    std::fs::create_dir_all(dir)?;
    let file_name = format!("{}_{}.{}", prefix, uuid::Uuid::new_v4().simple(), ext);
    std::fs::write(dir.join(&file_name), &file.data)?;

    tracing::debug!(file = %file_name, size = file.data.len(), "Stored upload");

    Ok(StoredFile {
        file_name,
        original_name: file.original_name.clone(),
        size: file.data.len() as i64,
        media_type: media_type_for(&ext),
    })
}

/// [`save`] on the blocking pool. Callers write files before taking the
/// connection lock and insert the rows afterwards.
pub async fn save_one(
    dir: PathBuf,
    prefix: impl Into<String>,
    file: UploadedFile,
) -> ApiResult<StoredFile> {
    let prefix = prefix.into();
    tokio::task::spawn_blocking(move || save(&dir, &prefix, &file)).await?
}

/// [`save_one`] for a batch. Files written before a failure are removed.
pub async fn save_all(
    dir: PathBuf,
    prefix: impl Into<String>,
    files: Vec<UploadedFile>,
) -> ApiResult<Vec<StoredFile>> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    let prefix = prefix.into();
    tokio::task::spawn_blocking(move || {
        let mut stored = Vec::with_capacity(files.len());
        for file in &files {
            match save(&dir, &prefix, file) {
                Ok(s) => stored.push(s),
                Err(e) => {
                    remove_all(&dir, &stored);
                    return Err(e);
                }
            }
        }
        Ok(stored)
    })
    .await?
}

pub fn remove_all(dir: &Path, stored: &[StoredFile]) {
    for file in stored {
        remove(dir, &file.file_name);
    }
}

/// Best-effort removal; a file that is already gone is not an error.
pub fn remove(dir: &Path, file_name: &str) {
    if !is_safe_name(file_name) {
        return;
    }
    match std::fs::remove_file(dir.join(file_name)) {
        Ok(()) => tracing::debug!(file = %file_name, "Removed upload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(file = %file_name, "Failed to remove upload: {}", e),
    }
}
