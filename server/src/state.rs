use std::path::PathBuf;

use crate::db::DbPool;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Session JWT signing secret (256-bit random key)
    pub session_secret: Vec<u8>,
    /// Session lifetime in hours
    pub session_ttl_hours: i64,
    /// Whether the session cookie carries the Secure attribute
    pub secure_cookies: bool,
    /// Where uploaded media lives
    pub upload_dir: PathBuf,
    /// Where JSON backups are written
    pub backup_dir: PathBuf,
    /// Request body cap for upload routes
    pub max_upload_bytes: usize,
    /// Burst size of the per-IP limiter on login/register
    pub auth_burst: u32,
}
