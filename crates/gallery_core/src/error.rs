//! crates/gallery_core/src/error.rs
//!
//! The error type returned by the gallery's core operations.

use crate::ports::PortError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GalleryError {
    /// A required input was missing or malformed.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The login identifier is unknown, already used, or expired.
    #[error("The login session is invalid or has expired, please start over")]
    InvalidLoginSession,

    /// The stored session no longer authorizes; a fresh login is needed.
    #[error("Reauthentication required")]
    ReauthRequired,

    #[error(transparent)]
    Port(#[from] PortError),
}

pub type GalleryResult<T> = Result<T, GalleryError>;

impl GalleryError {
    /// Failures after which a login attempt stays open for another try.
    pub fn is_retryable_login_failure(&self) -> bool {
        matches!(
            self,
            GalleryError::Port(PortError::InvalidCode) | GalleryError::Port(PortError::InvalidPassword)
        )
    }
}
