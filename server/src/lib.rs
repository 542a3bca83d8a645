//! Timeline notebook server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod admin;
pub mod auth;
pub mod board;
pub mod capsules;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod moderation;
pub mod pagination;
pub mod routes;
pub mod state;
pub mod timeline;
pub mod uploads;
pub mod users;
