//! Credential store
//!
//! Keeps credential metadata keyed by name and validates credentials against
//! GitLab. Validation performs network I/O and never runs while the store's
//! lock is held: lookups and updates take the lock briefly on either side of
//! the identity check.

mod credentials;
mod validation;

pub use credentials::{CredentialStore, StoreResult, DEFAULT_EXPIRY_WARNING_DAYS};
pub use validation::{ValidationError, ValidationResult};
