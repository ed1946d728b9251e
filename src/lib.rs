//! Static page cache admission, expiry and tag-based invalidation.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
