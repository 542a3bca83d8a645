//! Public journal of dated entries with optional media, likes and comments.

pub mod entries;
