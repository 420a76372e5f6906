//! Application assembly and startup sequencing.
//!
//! Startup order matters and mirrors the dependency order of the
//! subsystems: supervisor probe, defensive proxy stop, group creation
//! and initial instance boot (strictly sequential per type), stats
//! backfill, then proxy start. Only after `bootstrap` returns does the
//! daemon begin serving traffic and accepting live events.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use flotilla_api::{ApiContext, GatewayState};
use flotilla_balancer::{CommandRunner, Directory, MonitorAddress, ProxyReconciler};
use flotilla_broker::{Bus, CallBroker};
use flotilla_core::FlotillaConfig;
use flotilla_fleet::FleetController;
use flotilla_scaler::{ScalingController, group_name};
use flotilla_stats::{EventArchive, StatsAggregator};
use flotilla_supervisor::ProcessSupervisor;

/// All assembled subsystems, ready to serve.
pub struct App {
    pub config: FlotillaConfig,
    pub bus: Bus,
    pub broker: CallBroker,
    pub fleet: Arc<FleetController>,
    pub directory: Arc<Directory>,
    pub reconciler: Arc<ProxyReconciler>,
    pub scaler: Arc<ScalingController>,
    pub stats: Arc<StatsAggregator>,
    pub archive: Arc<dyn EventArchive>,
}

impl App {
    /// Assemble and boot the system against the given capabilities.
    ///
    /// Fatal on supervisor unavailability, group setup failure, or
    /// proxy start failure — a manager that cannot manage is not
    /// allowed to come up half-alive.
    pub async fn bootstrap(
        config: FlotillaConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
        runner: Arc<dyn CommandRunner>,
        archive: Arc<dyn EventArchive>,
    ) -> anyhow::Result<Self> {
        // A supervisor we cannot reach means no instances can ever be
        // managed; fail startup outright.
        supervisor
            .list()
            .await
            .context("unable to reach the process supervisor")?;

        let fleet = Arc::new(FleetController::new(
            supervisor,
            config.services.clone(),
        ));
        let directory = Arc::new(Directory::new());
        let reconciler = Arc::new(ProxyReconciler::new(
            directory.clone(),
            runner,
            config.proxy.config_path.clone(),
            config.proxy.static_root.clone(),
            MonitorAddress {
                ip: config.manager.ip.clone(),
                port: config.manager.port,
            },
            config.proxy.binary.clone(),
        ));
        let scaler = Arc::new(ScalingController::new(
            fleet.clone(),
            directory.clone(),
            reconciler.clone(),
        ));
        let stats = Arc::new(StatsAggregator::new(Duration::from_secs(
            config.stats.retention_secs,
        )));

        // A proxy left over from a previous run would hold the listen
        // port; stopping one that is not running is fine.
        reconciler
            .stop()
            .await
            .context("unable to stop a previously running proxy")?;

        // One group per configured service type, then boot the fleet
        // up to its initial size. Strictly sequential per type: ports
        // increment on type base.
        for (service_type, spec) in &config.services {
            let group = group_name(service_type);
            directory
                .create_group(
                    &group,
                    &format!("/api{}", spec.location),
                    &spec.location,
                    Some("least_conn"),
                )
                .with_context(|| format!("unable to create group for {service_type:?}"))?;

            // Instances that survived a supervisor restart are adopted
            // as members before topping up to the initial count.
            let existing = fleet
                .instances_by_type(service_type)
                .await
                .with_context(|| format!("unable to list instances of {service_type:?}"))?;
            for instance in &existing {
                directory.add_member(&group, &instance.address())?;
            }

            for _ in existing.len() as u32..spec.initial_instances {
                let instance = fleet
                    .start_instance(service_type)
                    .await
                    .with_context(|| format!("unable to boot an instance of {service_type:?}"))?;
                directory.add_member(&group, &instance.address())?;
            }

            info!(
                service_type = %service_type,
                initial = spec.initial_instances,
                adopted = existing.len(),
                "service group ready"
            );
        }

        // Pre-populate the stats window from the archive before any
        // live event is accepted.
        stats
            .backfill(archive.as_ref())
            .await
            .context("unable to backfill stats from the event archive")?;

        reconciler
            .start()
            .await
            .context("unable to start the proxy")?;

        let bus = Bus::default();
        let broker = CallBroker::new(
            bus.clone(),
            Duration::from_secs(config.broker.call_timeout_secs),
        );

        info!("flotilla bootstrap complete");
        Ok(Self {
            config,
            bus,
            broker,
            fleet,
            directory,
            reconciler,
            scaler,
            stats,
            archive,
        })
    }

    /// Spawn the long-running background tasks: operation responders,
    /// the live event ingest, and the retention sweeper.
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = flotilla_api::spawn_responders(
            &self.bus,
            ApiContext {
                fleet: self.fleet.clone(),
                scaler: self.scaler.clone(),
                stats: self.stats.clone(),
            },
            shutdown.clone(),
        );

        handles.push(flotilla_api::spawn_event_ingest(
            &self.bus,
            self.stats.clone(),
            shutdown.clone(),
        ));

        let stats = self.stats.clone();
        handles.push(tokio::spawn(async move {
            stats.run_sweeper(shutdown).await;
        }));

        handles
    }

    /// The gateway router serving `/ws`, `/events`, and `/healthz`.
    pub fn router(&self) -> axum::Router {
        flotilla_api::build_router(GatewayState {
            bus: self.bus.clone(),
            broker: self.broker.clone(),
            archive: self.archive.clone(),
        })
    }
}
