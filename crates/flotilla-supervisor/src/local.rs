//! Local supervisor — spawns real child processes on this host.
//!
//! Children are killed when stopped and reaped lazily on `list()`.
//! `kill_on_drop` ensures nothing outlives the supervisor itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    MARKER_ENV, ProcessSpec, ProcessSupervisor, SupervisedProcess, SupervisorError,
    SupervisorResult,
};

struct ChildEntry {
    child: Child,
    marker: Option<String>,
}

/// Supervises child processes spawned by this daemon.
#[derive(Clone, Default)]
pub struct LocalSupervisor {
    children: Arc<Mutex<HashMap<String, ChildEntry>>>,
}

impl LocalSupervisor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    async fn list(&self) -> SupervisorResult<Vec<SupervisedProcess>> {
        let mut children = self.children.lock().await;

        // Reap children that exited on their own since the last call.
        children.retain(|name, entry| match entry.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(process = %name, %status, "supervised process exited");
                false
            }
            Err(e) => {
                warn!(process = %name, error = %e, "unable to poll supervised process");
                false
            }
        });

        Ok(children
            .iter()
            .map(|(name, entry)| SupervisedProcess {
                name: name.clone(),
                marker: entry.marker.clone(),
            })
            .collect())
    }

    async fn start(&self, spec: ProcessSpec) -> SupervisorResult<()> {
        let mut children = self.children.lock().await;
        if children.contains_key(&spec.name) {
            return Err(SupervisorError::Launch {
                name: spec.name,
                reason: "a process with this name is already running".to_string(),
            });
        }

        let mut command = Command::new(&spec.script);
        command.args(&spec.args).kill_on_drop(true);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(marker) = &spec.marker {
            command.env(MARKER_ENV, marker);
        }

        let child = command.spawn().map_err(|e| SupervisorError::Launch {
            name: spec.name.clone(),
            reason: e.to_string(),
        })?;

        info!(process = %spec.name, script = ?spec.script, "process launched");
        children.insert(
            spec.name,
            ChildEntry {
                child,
                marker: spec.marker,
            },
        );
        Ok(())
    }

    async fn stop(&self, name: &str) -> SupervisorResult<()> {
        let entry = {
            let mut children = self.children.lock().await;
            children
                .remove(name)
                .ok_or_else(|| SupervisorError::UnknownProcess(name.to_string()))?
        };

        let mut child = entry.child;
        child.start_kill().map_err(|e| SupervisorError::Stop {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let status = child.wait().await.map_err(|e| SupervisorError::Stop {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        debug!(process = %name, %status, "process stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sleeper(name: &str, marker: Option<&str>) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            script: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            env: Vec::new(),
            marker: marker.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn start_list_stop_round_trip() {
        let supervisor = LocalSupervisor::new();

        supervisor.start(sleeper("svc-a", Some("m1"))).await.unwrap();
        supervisor.start(sleeper("svc-b", None)).await.unwrap();

        let mut names: Vec<String> = supervisor
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort();
        assert_eq!(names, ["svc-a", "svc-b"]);

        supervisor.stop("svc-a").await.unwrap();
        let names: Vec<String> = supervisor
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["svc-b"]);

        supervisor.stop("svc-b").await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let supervisor = LocalSupervisor::new();
        supervisor.start(sleeper("dup", None)).await.unwrap();

        let err = supervisor.start(sleeper("dup", None)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Launch { .. }));

        supervisor.stop("dup").await.unwrap();
    }

    #[tokio::test]
    async fn stop_of_unknown_process_errors() {
        let supervisor = LocalSupervisor::new();
        let err = supervisor.stop("ghost").await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownProcess(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn exited_children_are_reaped_on_list() {
        let supervisor = LocalSupervisor::new();
        supervisor
            .start(ProcessSpec {
                name: "short-lived".to_string(),
                script: PathBuf::from("/bin/sh"),
                args: vec!["-c".to_string(), "exit 0".to_string()],
                env: Vec::new(),
                marker: None,
            })
            .await
            .unwrap();

        // Give the child a moment to exit, then confirm list() drops it.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(supervisor.list().await.unwrap().is_empty());
    }
}
