//! Error taxonomy for state-machine operations.

use crate::store::StoreError;

/// Failure of a task or work-session operation.
///
/// Every operation converts these into a user-visible notification before
/// returning them, so callers are free to ignore the `Err`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input rejected before any remote call was issued.
    #[error("{0}")]
    Validation(String),

    /// The backend call failed (network, permission, constraint, timeout).
    #[error("remote store error: {0}")]
    Remote(StoreError),

    /// The record does not exist or is not owned by the signed-in user.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend affected zero rows where one was expected.
    #[error("{0}")]
    Concurrency(String),
}

impl Error {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound(message.into())
    }

    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        Self::Concurrency(message.into())
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Remote(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: Error = StoreError::NotFound("task abc".to_string()).into();
        assert!(matches!(err, Error::NotFound(ref what) if what == "task abc"));
    }

    #[test]
    fn test_other_store_errors_map_to_remote() {
        let err: Error = StoreError::Unavailable("offline".to_string()).into();
        assert!(matches!(err, Error::Remote(StoreError::Unavailable(_))));
        assert_eq!(err.to_string(), "remote store error: store unavailable: offline");
    }
}
