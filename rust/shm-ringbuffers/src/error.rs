//! Errors surfaced by region lifecycle operations.
//!
//! Publish/consume operations never fail; "nothing available" is an
//! `Option::None`, not an error.

use std::io;

use crate::state::RunState;

/// Errors from creating, attaching to, or querying a ring buffer region.
#[derive(Debug)]
pub enum SrbError {
    /// Malformed ring specification or path.
    InvalidSpec(String),
    /// A shared memory object already exists at the path.
    AlreadyExists { path: String },
    /// No shared memory object exists at the path.
    NotFound { path: String },
    /// The OS refused access to the shared memory object.
    PermissionDenied { path: String },
    /// Sizing or mapping the region failed.
    ResourceExhausted { size: usize, source: io::Error },
    /// The mapped region does not hold a sane header, descriptor table or name table.
    Corrupt(String),
    /// The writer has not published `RUNNING` (or has already left it).
    NotRunning(RunState),
    /// No ring with the requested name.
    NotFoundRing(String),
    /// Any other OS failure.
    Io(io::Error),
}

impl SrbError {
    /// Map an OS error from `shm_open` to the matching variant.
    pub(crate) fn from_open(path: &str, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EEXIST) => Self::AlreadyExists {
                path: path.to_owned(),
            },
            Some(libc::ENOENT) => Self::NotFound {
                path: path.to_owned(),
            },
            Some(libc::EACCES) | Some(libc::EPERM) => Self::PermissionDenied {
                path: path.to_owned(),
            },
            _ => Self::Io(err),
        }
    }

    /// True when retrying later may succeed (writer not up yet).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotRunning(_))
    }
}

impl std::fmt::Display for SrbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSpec(msg) => write!(f, "invalid ring spec: {}", msg),
            Self::AlreadyExists { path } => write!(f, "shared memory {} already exists", path),
            Self::NotFound { path } => write!(f, "shared memory {} not found", path),
            Self::PermissionDenied { path } => {
                write!(f, "permission denied for shared memory {}", path)
            }
            Self::ResourceExhausted { size, source } => {
                write!(f, "could not size region to {} bytes: {}", size, source)
            }
            Self::Corrupt(msg) => write!(f, "corrupt region: {}", msg),
            Self::NotRunning(state) => write!(f, "region is not running (state: {})", state),
            Self::NotFoundRing(name) => write!(f, "no ring named {:?}", name),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SrbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ResourceExhausted { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_errno_mapping() {
        let err = SrbError::from_open("/x", io::Error::from_raw_os_error(libc::EEXIST));
        assert!(matches!(err, SrbError::AlreadyExists { .. }));

        let err = SrbError::from_open("/x", io::Error::from_raw_os_error(libc::ENOENT));
        assert!(matches!(err, SrbError::NotFound { ref path } if path == "/x"));
        assert!(err.is_retryable());

        let err = SrbError::from_open("/x", io::Error::from_raw_os_error(libc::EACCES));
        assert!(matches!(err, SrbError::PermissionDenied { .. }));

        let err = SrbError::from_open("/x", io::Error::from_raw_os_error(libc::EMFILE));
        assert!(matches!(err, SrbError::Io(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_corrupt_is_not_retryable() {
        assert!(!SrbError::Corrupt("short".into()).is_retryable());
        assert!(SrbError::NotRunning(RunState::Stopping).is_retryable());
    }
}
