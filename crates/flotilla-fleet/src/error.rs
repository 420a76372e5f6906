//! Fleet controller error types.

use thiserror::Error;

use flotilla_supervisor::SupervisorError;

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors that can occur while mutating or reading the fleet.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("unknown service type {0:?}")]
    InvalidType(String),

    #[error("service type {service_type:?} already runs the maximum of {limit} instances")]
    CapacityExceeded { service_type: String, limit: u32 },

    #[error("no running instances of type {0:?}")]
    NotFound(String),

    #[error("no running instance named {0:?}")]
    InstanceNotFound(String),

    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}
