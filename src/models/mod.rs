//! Core data models for the content delivery portal.
//!
//! These entities represent projects, their typed folder trees, and the
//! files exchanged through them. They map cleanly to database tables via
//! `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod file;
pub mod folder;
pub mod project;
pub mod upload;
pub mod user;
