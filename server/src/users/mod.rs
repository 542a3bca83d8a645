//! Self-service account pages: profile, password, avatar and activity.

pub mod profile;
