//! In-memory supervisor — the testing backend.
//!
//! Records starts and stops without spawning anything, and supports
//! failure injection so callers can exercise supervisor error paths.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    ProcessSpec, ProcessSupervisor, SupervisedProcess, SupervisorError, SupervisorResult,
};

#[derive(Default)]
struct Inner {
    processes: HashMap<String, SupervisedProcess>,
    started: Vec<ProcessSpec>,
    starts_remaining: Option<u32>,
}

/// A supervisor that keeps everything in memory.
#[derive(Default)]
pub struct InMemorySupervisor {
    inner: Mutex<Inner>,
}

impl InMemorySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `n` more successful starts; further starts fail with
    /// `SupervisorError::Unavailable`. Stops are unaffected.
    pub fn fail_starts_after(&self, n: u32) {
        self.inner.lock().unwrap().starts_remaining = Some(n);
    }

    /// Register a process that carries no marker, standing in for an
    /// unrelated workload sharing the host.
    pub fn register_unmarked(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.processes.insert(
            name.to_string(),
            SupervisedProcess {
                name: name.to_string(),
                marker: None,
            },
        );
    }

    /// Register a process with an arbitrary marker string.
    pub fn register_marked(&self, name: &str, marker: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.processes.insert(
            name.to_string(),
            SupervisedProcess {
                name: name.to_string(),
                marker: Some(marker.to_string()),
            },
        );
    }

    /// Every spec passed to a successful `start`, in call order.
    pub fn started_specs(&self) -> Vec<ProcessSpec> {
        self.inner.lock().unwrap().started.clone()
    }
}

#[async_trait]
impl ProcessSupervisor for InMemorySupervisor {
    async fn list(&self) -> SupervisorResult<Vec<SupervisedProcess>> {
        let inner = self.inner.lock().unwrap();
        let mut processes: Vec<SupervisedProcess> = inner.processes.values().cloned().collect();
        processes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(processes)
    }

    async fn start(&self, spec: ProcessSpec) -> SupervisorResult<()> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(remaining) = inner.starts_remaining {
            if remaining == 0 {
                return Err(SupervisorError::Unavailable(
                    "injected start failure".to_string(),
                ));
            }
            inner.starts_remaining = Some(remaining - 1);
        }

        if inner.processes.contains_key(&spec.name) {
            return Err(SupervisorError::Launch {
                name: spec.name,
                reason: "a process with this name is already running".to_string(),
            });
        }

        inner.processes.insert(
            spec.name.clone(),
            SupervisedProcess {
                name: spec.name.clone(),
                marker: spec.marker.clone(),
            },
        );
        inner.started.push(spec);
        Ok(())
    }

    async fn stop(&self, name: &str) -> SupervisorResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .processes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SupervisorError::UnknownProcess(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(name: &str) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            script: PathBuf::from("server"),
            args: Vec::new(),
            env: Vec::new(),
            marker: Some(format!("marker-{name}")),
        }
    }

    #[tokio::test]
    async fn records_starts_in_order() {
        let supervisor = InMemorySupervisor::new();
        supervisor.start(spec("a")).await.unwrap();
        supervisor.start(spec("b")).await.unwrap();

        let started: Vec<String> = supervisor
            .started_specs()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(started, ["a", "b"]);
    }

    #[tokio::test]
    async fn failure_injection_kicks_in_after_allowed_starts() {
        let supervisor = InMemorySupervisor::new();
        supervisor.fail_starts_after(1);

        supervisor.start(spec("ok")).await.unwrap();
        let err = supervisor.start(spec("nope")).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Unavailable(_)));

        // The failed start left no trace.
        assert_eq!(supervisor.list().await.unwrap().len(), 1);
    }
}
