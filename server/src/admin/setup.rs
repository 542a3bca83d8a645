use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::db::DbPool;

const SETUP_TOKEN_KEY: &str = "setup_token_hash";

/// Generate a 32-byte random setup token, hex-encoded (64 chars).
fn generate_setup_token() -> String {
    let token_bytes: [u8; 32] = rand::rng().random();
    hex::encode(token_bytes)
}

/// Hash a setup token with SHA-256 for storage.
fn hash_setup_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// On a fresh database (no users yet), mint a setup token whose holder
/// registers as the first admin. Only the hash is stored, so every boot
/// before the first registration replaces the previous token.
pub fn maybe_generate_setup_token(
    db: &DbPool,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;

    let user_count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    if user_count > 0 {
        return Ok(None);
    }

    let token = generate_setup_token();
    conn.execute(
        "INSERT OR REPLACE INTO server_settings (key, value) VALUES (?1, ?2)",
        [SETUP_TOKEN_KEY, hash_setup_token(&token).as_str()],
    )?;

    Ok(Some(token))
}

/// Whether `token` matches the outstanding setup token.
pub fn setup_token_matches(conn: &Connection, token: &str) -> rusqlite::Result<bool> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM server_settings WHERE key = ?1",
            [SETUP_TOKEN_KEY],
            |row| row.get(0),
        )
        .optional()?;

    Ok(stored.is_some_and(|hash| hash == hash_setup_token(token)))
}

/// Consume the setup token once the first admin has claimed it.
pub fn consume_setup_token(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM server_settings WHERE key = ?1", [SETUP_TOKEN_KEY])?;
    conn.execute(
        "INSERT OR REPLACE INTO server_settings (key, value) VALUES ('setup_complete', 'true')",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_gets_a_single_use_token() {
        let tmp = tempfile::tempdir().unwrap();
        let db = crate::db::init_db(tmp.path().to_str().unwrap()).unwrap();

        let token = maybe_generate_setup_token(&db).unwrap().expect("token on fresh db");
        assert_eq!(token.len(), 64);

        let conn = db.lock().unwrap();
        assert!(setup_token_matches(&conn, &token).unwrap());
        assert!(!setup_token_matches(&conn, "wrong").unwrap());

        consume_setup_token(&conn).unwrap();
        assert!(!setup_token_matches(&conn, &token).unwrap());
    }

    #[test]
    fn no_token_once_users_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let db = crate::db::init_db(tmp.path().to_str().unwrap()).unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO users (username, password_hash, created_at, updated_at)
                 VALUES ('someone', 'x', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        }
        assert!(maybe_generate_setup_token(&db).unwrap().is_none());
    }
}
