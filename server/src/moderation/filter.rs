use rusqlite::Connection;

use crate::db::models::KeywordRule;
use crate::error::{ApiError, ApiResult};

/// A post or comment matched an active keyword rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Content contains blocked keyword: {keyword}")]
pub struct Blocked {
    pub rule_id: i64,
    pub keyword: String,
}

impl From<Blocked> for ApiError {
    fn from(b: Blocked) -> Self {
        ApiError::Validation(b.to_string())
    }
}

/// Screen `text` against `rules` in the order given. Matching is a
/// case-insensitive substring test; inactive rules are skipped and the first
/// hit wins.
pub fn scan<'a, I>(text: &str, rules: I) -> Result<(), Blocked>
where
    I: IntoIterator<Item = &'a KeywordRule>,
{
    if text.is_empty() {
        return Ok(());
    }
    let haystack = text.to_lowercase();

    for rule in rules.into_iter().filter(|r| r.is_active) {
        let needle = rule.keyword.to_lowercase();
        if !needle.is_empty() && haystack.contains(&needle) {
            return Err(Blocked {
                rule_id: rule.id,
                keyword: rule.keyword.clone(),
            });
        }
    }
    Ok(())
}

/// Active rules in creation order.
pub fn active_rules(conn: &Connection) -> rusqlite::Result<Vec<KeywordRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM keyword_rules WHERE is_active = 1 ORDER BY id ASC",
        KeywordRule::COLUMNS
    ))?;
    let rules = stmt
        .query_map([], KeywordRule::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rules)
}

/// Screen board text against the rules currently in the database.
pub fn screen(conn: &Connection, text: &str) -> ApiResult<()> {
    let rules = active_rules(conn)?;
    if let Err(blocked) = scan(text, &rules) {
        tracing::warn!(
            rule_id = blocked.rule_id,
            keyword = %blocked.keyword,
            "Board content rejected by keyword filter"
        );
        return Err(blocked.into());
    }
    Ok(())
}
