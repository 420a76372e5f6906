//! Load-balancer directory error types.

use thiserror::Error;

/// Result type alias for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Domain-rule and validation failures for the load-balancer model.
///
/// Each variant carries the offending value so callers can build
/// precise user messages without re-deriving context.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("load balancer group {0:?} already exists")]
    DuplicateName(String),

    #[error("external location {location:?} is already claimed by group {group:?}")]
    DuplicateLocation { location: String, group: String },

    #[error("{field} must match {pattern} but was {value:?}")]
    InvalidFormat {
        field: &'static str,
        pattern: &'static str,
        value: String,
    },

    #[error("unknown balancing policy {0:?}, expected \"least_conn\" or \"ip_hash\"")]
    InvalidPolicy(String),

    #[error("no load balancer group named {0:?}")]
    NotFound(String),

    #[error("{0:?} is not a valid host:port address or fully qualified domain name")]
    InvalidAddress(String),

    #[error("group {group:?} already has member {address:?}")]
    DuplicateMember { group: String, address: String },

    #[error("group {group:?} has no member {address:?}")]
    MemberNotFound { group: String, address: String },
}
