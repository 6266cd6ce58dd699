//! Request routing and connection resolution
//!
//! Handles:
//! - Reading project context hints
//! - Matching hints against the connection pool
//! - Falling back to the configured and pool defaults

mod resolver;

pub use resolver::Resolver;

use thiserror::Error;

/// Resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Unavailable: {0}")]
    Unavailable(String),
}
