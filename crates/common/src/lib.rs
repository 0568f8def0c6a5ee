//! Shared types for the analytics report workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
