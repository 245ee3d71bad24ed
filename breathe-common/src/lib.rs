//! # BreatheMate Common Library
//!
//! Shared code for BreatheMate services including:
//! - Common error type
//! - Root folder resolution and TOML bootstrap configuration
//! - Database initialization

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;

pub use error::{Error, Result};
