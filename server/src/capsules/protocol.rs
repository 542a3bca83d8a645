use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::db::models::{parse_timestamp, Capsule};
use crate::error::ApiError;

/// Where a capsule stands relative to the clock and its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapsuleState {
    /// Unlock time not reached; carries the seconds left.
    Pending { remaining_secs: i64 },
    /// Unlock time reached, answer not yet given.
    Ready,
    /// Answered correctly. Terminal.
    Unlocked,
}

impl CapsuleState {
    pub fn of(capsule: &Capsule, now: DateTime<Utc>) -> Self {
        if capsule.is_unlocked {
            CapsuleState::Unlocked
        } else if now < capsule.unlock_date {
            CapsuleState::Pending {
                remaining_secs: remaining_seconds(capsule.unlock_date, now),
            }
        } else {
            CapsuleState::Ready
        }
    }

    /// Whether the clock permits answer attempts.
    pub fn accepts_attempts(&self) -> bool {
        !matches!(self, CapsuleState::Pending { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapsuleError {
    #[error("Invalid unlock date, expected YYYY-MM-DDTHH:MM")]
    InvalidUnlockDate,

    #[error("Unlock date must be in the future")]
    UnlockDateNotInFuture,

    #[error("Answer cannot be empty")]
    EmptyAnswer,

    #[error("This capsule cannot be opened yet")]
    NotYetUnlockable { remaining_secs: i64 },

    #[error("This capsule has not been unlocked yet")]
    StillLocked,
}

impl From<CapsuleError> for ApiError {
    fn from(e: CapsuleError) -> Self {
        match e {
            CapsuleError::NotYetUnlockable { remaining_secs } => ApiError::Gated {
                message: e.to_string(),
                remaining_time: remaining_secs,
            },
            CapsuleError::StillLocked => ApiError::Forbidden(e.to_string()),
            other => ApiError::Validation(other.to_string()),
        }
    }
}

/// Canonical form an answer is compared in.
pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

/// Hex SHA-256 commitment of the normalized answer. The plaintext is never stored.
pub fn commit_answer(answer: &str) -> Result<String, CapsuleError> {
    let normalized = normalize_answer(answer);
    if normalized.is_empty() {
        return Err(CapsuleError::EmptyAnswer);
    }
    Ok(hex::encode(Sha256::digest(normalized.as_bytes())))
}

pub fn answer_matches(commitment: &str, candidate: &str) -> bool {
    commit_answer(candidate).is_ok_and(|c| c == commitment)
}

/// Seconds until `unlock_date`, floored at zero.
pub fn remaining_seconds(unlock_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (unlock_date - now).num_seconds().max(0)
}

/// Parse a requested unlock date and require it to lie strictly after `now`.
pub fn parse_unlock_date(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, CapsuleError> {
    let unlock_date = parse_timestamp(raw).ok_or(CapsuleError::InvalidUnlockDate)?;
    if unlock_date <= now {
        return Err(CapsuleError::UnlockDateNotInFuture);
    }
    Ok(unlock_date)
}

/// Outcome of a counted attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Opened,
    WrongAnswer,
}

/// Judge an attempt against the capsule's current state. Pending capsules and
/// empty answers are refused before anything is counted.
pub fn judge_attempt(
    capsule: &Capsule,
    candidate: &str,
    now: DateTime<Utc>,
) -> Result<AttemptOutcome, CapsuleError> {
    if normalize_answer(candidate).is_empty() {
        return Err(CapsuleError::EmptyAnswer);
    }
    if let CapsuleState::Pending { remaining_secs } = CapsuleState::of(capsule, now) {
        return Err(CapsuleError::NotYetUnlockable { remaining_secs });
    }
    if answer_matches(&capsule.answer_hash, candidate) {
        Ok(AttemptOutcome::Opened)
    } else {
        Ok(AttemptOutcome::WrongAnswer)
    }
}

/// Content reads are allowed only once the capsule is unlocked.
pub fn ensure_readable(capsule: &Capsule) -> Result<(), CapsuleError> {
    if capsule.is_unlocked {
        Ok(())
    } else {
        Err(CapsuleError::StillLocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn capsule(unlock_in: Duration, answer: &str, now: DateTime<Utc>) -> Capsule {
        Capsule {
            id: 1,
            title: "Letter".to_string(),
            content: Some("sealed".to_string()),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            unlock_date: now + unlock_in,
            question: "Capital of France?".to_string(),
            answer_hash: commit_answer(answer).unwrap(),
            media_type: None,
            media_path: None,
            is_unlocked: false,
            unlock_attempts: 0,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn answers_are_normalized_before_commitment() {
        let commitment = commit_answer("Paris").unwrap();
        assert!(answer_matches(&commitment, "  paris  "));
        assert!(answer_matches(&commitment, "PARIS"));
        assert!(!answer_matches(&commitment, "Pari"));
        assert_eq!(commitment.len(), 64);
        assert_ne!(commitment, "paris");
    }

    #[test]
    fn blank_answers_cannot_be_committed() {
        assert_eq!(commit_answer("   "), Err(CapsuleError::EmptyAnswer));
    }

    #[test]
    fn state_follows_clock_and_flag() {
        let now = now();
        let mut c = capsule(Duration::seconds(90), "paris", now);
        assert_eq!(
            CapsuleState::of(&c, now),
            CapsuleState::Pending { remaining_secs: 90 }
        );
        assert_eq!(CapsuleState::of(&c, now + Duration::seconds(90)), CapsuleState::Ready);

        c.is_unlocked = true;
        assert_eq!(CapsuleState::of(&c, now), CapsuleState::Unlocked);
        assert!(CapsuleState::Unlocked.accepts_attempts());
    }

    #[test]
    fn pending_capsule_refuses_attempts_with_remaining_time() {
        let now = now();
        let c = capsule(Duration::hours(1), "paris", now);
        assert_eq!(
            judge_attempt(&c, "paris", now),
            Err(CapsuleError::NotYetUnlockable { remaining_secs: 3600 })
        );
    }

    #[test]
    fn ready_capsule_judges_answers() {
        let now = now();
        let c = capsule(Duration::seconds(-5), "Paris", now);
        assert_eq!(judge_attempt(&c, "Pari", now), Ok(AttemptOutcome::WrongAnswer));
        assert_eq!(judge_attempt(&c, "  paris  ", now), Ok(AttemptOutcome::Opened));
        assert_eq!(judge_attempt(&c, "", now), Err(CapsuleError::EmptyAnswer));
    }

    #[test]
    fn unlock_date_must_be_in_the_future() {
        let now = now();
        assert_eq!(
            parse_unlock_date("2025-06-01T12:00", now),
            Err(CapsuleError::UnlockDateNotInFuture)
        );
        assert_eq!(
            parse_unlock_date("tomorrow", now),
            Err(CapsuleError::InvalidUnlockDate)
        );
        let parsed = parse_unlock_date("2025-06-01T12:01", now).unwrap();
        assert_eq!(remaining_seconds(parsed, now), 60);
        assert_eq!(remaining_seconds(now, parsed), 0);
    }

    #[test]
    fn locked_content_is_unreadable() {
        let now = now();
        let mut c = capsule(Duration::seconds(-1), "paris", now);
        assert_eq!(ensure_readable(&c), Err(CapsuleError::StillLocked));
        c.is_unlocked = true;
        assert_eq!(ensure_readable(&c), Ok(()));
    }
}
