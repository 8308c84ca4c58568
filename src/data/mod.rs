//! Data layer module
//!
//! Handles all data persistence:
//! - Local users and their keys
//! - Append-only activity log
//! - Follow relations
//! - Posts and their like/boost associations

mod database;
mod models;

pub use database::Database;
pub use models::*;
