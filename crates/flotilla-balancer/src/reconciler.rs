//! ProxyReconciler — materialize the directory into a live proxy.
//!
//! `reconcile()` is the only path from the in-memory model to running
//! configuration: it renders the full config text, overwrites the fixed
//! config path, and signals the proxy to reload. Membership edits that
//! are never reconciled never take effect.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::directory::Directory;
use crate::exec::{CommandRunner, ExternalCommandError};
use crate::render::{MonitorAddress, render};

/// Errors from proxy lifecycle and reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to write proxy config to {path:?}: {reason}")]
    WriteConfig { path: PathBuf, reason: String },

    #[error(transparent)]
    Command(#[from] ExternalCommandError),
}

/// Stderr patterns meaning the proxy was not running to begin with.
/// Stop is called defensively during startup, so these are benign.
fn is_already_stopped(error: &ExternalCommandError) -> bool {
    let stderr = &error.stderr;
    (stderr.contains("nginx.pid") && stderr.contains("No such file or directory"))
        || stderr.contains("Unknown instance")
}

/// Drives the proxy process and keeps its configuration file in sync
/// with the directory.
pub struct ProxyReconciler {
    directory: Arc<Directory>,
    runner: Arc<dyn CommandRunner>,
    config_path: PathBuf,
    static_root: PathBuf,
    monitor: MonitorAddress,
    binary: String,
}

impl ProxyReconciler {
    pub fn new(
        directory: Arc<Directory>,
        runner: Arc<dyn CommandRunner>,
        config_path: PathBuf,
        static_root: PathBuf,
        monitor: MonitorAddress,
        binary: String,
    ) -> Self {
        Self {
            directory,
            runner,
            config_path,
            static_root,
            monitor,
            binary,
        }
    }

    /// Render the current directory state and fully overwrite the
    /// config file. Never patched in place.
    async fn write_config(&self) -> Result<(), ReconcileError> {
        let groups = self.directory.list_groups();
        let config = render(&groups, &self.static_root, &self.monitor);
        tokio::fs::write(&self.config_path, config)
            .await
            .map_err(|e| ReconcileError::WriteConfig {
                path: self.config_path.clone(),
                reason: e.to_string(),
            })?;
        debug!(path = ?self.config_path, groups = groups.len(), "proxy config written");
        Ok(())
    }

    /// Write config and start the proxy with it.
    pub async fn start(&self) -> Result<(), ReconcileError> {
        self.write_config().await?;
        self.runner
            .execute(&format!("{} -c {}", self.binary, self.config_path.display()))
            .await?;
        info!("proxy started");
        Ok(())
    }

    /// Stop the proxy. An already-stopped proxy is success, not error.
    pub async fn stop(&self) -> Result<(), ReconcileError> {
        match self
            .runner
            .execute(&format!("{} -s stop", self.binary))
            .await
        {
            Ok(_) => {
                info!("proxy stopped");
                Ok(())
            }
            Err(e) if is_already_stopped(&e) => {
                debug!("proxy was already stopped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write config and signal the proxy to reload it.
    pub async fn reconcile(&self) -> Result<(), ReconcileError> {
        self.write_config().await?;
        self.runner
            .execute(&format!("{} -s reload", self.binary))
            .await?;
        info!("proxy reloaded");
        Ok(())
    }
}
