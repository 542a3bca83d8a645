//! Message board: posts with images, likes, pins and threaded comments.
//! Every post and comment passes the keyword filter before it is stored.

pub mod comments;
pub mod messages;

use serde::Serialize;

use crate::db::models;

/// Author block embedded in board responses.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorSummary {
    pub id: i64,
    pub username: String,
    pub avatar_url: String,
}

impl AuthorSummary {
    pub fn new(id: i64, username: String, avatar_url: Option<String>) -> Self {
        let avatar_url = models::avatar_or_default(&username, avatar_url.as_deref());
        AuthorSummary {
            id,
            username,
            avatar_url,
        }
    }
}
