//! lessonforge library crate.
//!
//! Quota-aware orchestration of chapter video resolution and quiz
//! generation over rate-limited external services.

pub mod cache;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod quota;
pub mod services;
pub mod upstream;

pub use error::{Error, Result};
