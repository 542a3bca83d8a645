//! Administrator tooling: first-boot setup token, user management and
//! JSON backups.

pub mod backup;
pub mod setup;
pub mod users;
