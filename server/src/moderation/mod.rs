//! Keyword moderation for the message board.
//!
//! `filter` screens text against the admin-managed keyword rules;
//! `keywords` exposes the admin CRUD endpoints for those rules.

pub mod filter;
pub mod keywords;
