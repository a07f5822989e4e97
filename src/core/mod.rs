//! Core types shared across the engine: the error taxonomy and its user-facing
//! rendering.

pub mod error;

pub use error::{ErrorContext, UpdateError, user_friendly_error};
