//! flotilla-supervisor — the process supervision capability.
//!
//! The fleet controller never talks to the operating system directly;
//! it goes through `ProcessSupervisor`, which can start, stop, and list
//! named processes. Each process may carry an opaque identity marker,
//! which is how the fleet layer recognizes its own instances among
//! whatever else runs on the host.
//!
//! Two implementations ship here: `LocalSupervisor` spawns real child
//! processes, `InMemorySupervisor` is the testing backend.

pub mod local;
pub mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalSupervisor;
pub use memory::InMemorySupervisor;

/// Environment variable the identity marker is exposed under, so the
/// launched process (and external tooling) can see its own identity.
pub const MARKER_ENV: &str = "FLOTILLA_INSTANCE";

/// Everything needed to launch one supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Supervisor-unique process name.
    pub name: String,
    /// Executable to launch.
    pub script: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Opaque identity marker; processes without one are ignored by
    /// the fleet layer.
    pub marker: Option<String>,
}

/// A process as reported by `ProcessSupervisor::list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedProcess {
    pub name: String,
    pub marker: Option<String>,
}

/// Result type alias for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Errors reported by the supervision capability.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch process {name:?}: {reason}")]
    Launch { name: String, reason: String },

    #[error("no supervised process named {0:?}")]
    UnknownProcess(String),

    #[error("failed to stop process {name:?}: {reason}")]
    Stop { name: String, reason: String },

    #[error("supervisor unavailable: {0}")]
    Unavailable(String),
}

/// Start/stop/list capability over named processes.
///
/// Launch confirmation means the process was spawned, not that it is
/// accepting connections — callers must not assume readiness.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Every live process known to the supervisor.
    async fn list(&self) -> SupervisorResult<Vec<SupervisedProcess>>;

    /// Launch a process. Fails if the name is already taken.
    async fn start(&self, spec: ProcessSpec) -> SupervisorResult<()>;

    /// Stop a process by name.
    async fn stop(&self, name: &str) -> SupervisorResult<()>;
}
