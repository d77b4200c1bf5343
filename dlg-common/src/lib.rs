//! # Dialect Common Library
//!
//! Shared code for the dialect microservices including:
//! - Error type
//! - Event types (DlgEvent enum) and EventBus
//! - Bootstrap configuration loading

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
