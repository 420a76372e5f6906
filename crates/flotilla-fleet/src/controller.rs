//! FleetController — create and destroy service instances under
//! per-type capacity limits.
//!
//! Every instance carries its own `ServiceInstance` record, JSON-encoded,
//! as the supervisor identity marker. Listing the fleet means listing
//! supervised processes and parsing markers back; processes without a
//! parseable marker belong to other workloads and are skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use flotilla_core::config::ServiceSpec;
use flotilla_core::{KeyedLocks, ServiceInstance, now_ms};
use flotilla_supervisor::{ProcessSpec, ProcessSupervisor};

use crate::error::{FleetError, FleetResult};

/// Prefix applied to supervisor process names, keeping flotilla-owned
/// processes visually distinct in supervisor listings.
const NAME_PREFIX: &str = "flotilla-";

/// Instances bind to loopback; multi-host placement is out of scope.
const INSTANCE_IP: &str = "127.0.0.1";

/// Creates and destroys service instances through the supervisor.
pub struct FleetController {
    supervisor: Arc<dyn ProcessSupervisor>,
    /// Service catalog: type → launch parameters and limits.
    services: BTreeMap<String, ServiceSpec>,
    /// Per-type mutation queue. Port allocation derives from the live
    /// count, so two in-flight starts for one type would collide.
    locks: KeyedLocks,
}

impl FleetController {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        services: BTreeMap<String, ServiceSpec>,
    ) -> Self {
        Self {
            supervisor,
            services,
            locks: KeyedLocks::new(),
        }
    }

    /// The configured service types, in catalog order.
    pub fn configured_types(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    fn service_spec(&self, service_type: &str) -> FleetResult<&ServiceSpec> {
        self.services
            .get(service_type)
            .ok_or_else(|| FleetError::InvalidType(service_type.to_string()))
    }

    /// All live instances that carry this system's identity marker.
    pub async fn list_instances(&self) -> FleetResult<Vec<ServiceInstance>> {
        let processes = self.supervisor.list().await?;
        let instances = processes
            .into_iter()
            .filter_map(|process| {
                let marker = process.marker?;
                match serde_json::from_str::<ServiceInstance>(&marker) {
                    Ok(instance) => Some(instance),
                    Err(e) => {
                        debug!(process = %process.name, error = %e, "skipping unparseable marker");
                        None
                    }
                }
            })
            .collect();
        Ok(instances)
    }

    /// Distinct types among live instances, first-seen order.
    pub async fn list_types(&self) -> FleetResult<Vec<String>> {
        let mut types: Vec<String> = Vec::new();
        for instance in self.list_instances().await? {
            if !types.contains(&instance.service_type) {
                types.push(instance.service_type);
            }
        }
        Ok(types)
    }

    /// Live instances of one (validated) type.
    pub async fn instances_by_type(&self, service_type: &str) -> FleetResult<Vec<ServiceInstance>> {
        self.service_spec(service_type)?;
        let instances = self
            .list_instances()
            .await?
            .into_iter()
            .filter(|instance| instance.service_type == service_type)
            .collect();
        Ok(instances)
    }

    pub async fn count_by_type(&self, service_type: &str) -> FleetResult<u32> {
        Ok(self.instances_by_type(service_type).await?.len() as u32)
    }

    /// Start one instance of the given type.
    ///
    /// The next port grows from the configured base: one past the live
    /// count, bumped past the highest port still in use so gapped
    /// stop/start histories never re-allocate a taken port.
    pub async fn start_instance(&self, service_type: &str) -> FleetResult<ServiceInstance> {
        let spec = self.service_spec(service_type)?.clone();
        let lock = self.locks.acquire(service_type);
        let _guard = lock.lock().await;

        let existing = self.instances_by_type(service_type).await?;
        if existing.len() as u32 >= spec.max_instances {
            return Err(FleetError::CapacityExceeded {
                service_type: service_type.to_string(),
                limit: spec.max_instances,
            });
        }

        let counted = spec.base_port + existing.len() as u16 + 1;
        let highest = existing.iter().map(|i| i.port).max().unwrap_or(spec.base_port);
        let port = counted.max(highest + 1);

        let instance = ServiceInstance {
            name: ServiceInstance::derive_name(service_type, port),
            service_type: service_type.to_string(),
            ip: INSTANCE_IP.to_string(),
            port,
            start_timestamp_ms: now_ms(),
        };
        let marker = serde_json::to_string(&instance)
            .expect("instance marker serialization cannot fail");

        self.supervisor
            .start(ProcessSpec {
                name: format!("{NAME_PREFIX}{}", instance.name),
                script: spec.script.clone(),
                args: vec!["--port".to_string(), port.to_string()],
                env: Vec::new(),
                marker: Some(marker),
            })
            .await?;

        info!(
            service_type,
            name = %instance.name,
            port,
            "instance started"
        );
        Ok(instance)
    }

    /// Stop an arbitrary instance of the given type.
    pub async fn stop_instance(&self, service_type: &str) -> FleetResult<ServiceInstance> {
        self.service_spec(service_type)?;
        let lock = self.locks.acquire(service_type);
        let _guard = lock.lock().await;

        let instance = self
            .instances_by_type(service_type)
            .await?
            .pop()
            .ok_or_else(|| FleetError::NotFound(service_type.to_string()))?;

        self.supervisor
            .stop(&format!("{NAME_PREFIX}{}", instance.name))
            .await?;

        info!(service_type, name = %instance.name, "instance stopped");
        Ok(instance)
    }

    /// Stop the instance with the given name, whatever its type.
    pub async fn stop_instance_by_name(&self, name: &str) -> FleetResult<ServiceInstance> {
        let instance = self
            .list_instances()
            .await?
            .into_iter()
            .find(|instance| instance.name == name)
            .ok_or_else(|| FleetError::InstanceNotFound(name.to_string()))?;

        let lock = self.locks.acquire(&instance.service_type);
        let _guard = lock.lock().await;

        self.supervisor
            .stop(&format!("{NAME_PREFIX}{}", instance.name))
            .await?;

        info!(name = %instance.name, "instance stopped");
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_supervisor::InMemorySupervisor;
    use std::path::PathBuf;

    fn catalog() -> BTreeMap<String, ServiceSpec> {
        let mut services = BTreeMap::new();
        services.insert(
            "prime-number".to_string(),
            ServiceSpec {
                script: PathBuf::from("services/prime-number/server"),
                location: "/prime-number".to_string(),
                base_port: 6100,
                max_instances: 3,
                initial_instances: 0,
            },
        );
        services.insert(
            "random-string".to_string(),
            ServiceSpec {
                script: PathBuf::from("services/random-string/server"),
                location: "/random-string".to_string(),
                base_port: 6300,
                max_instances: 10,
                initial_instances: 0,
            },
        );
        services
    }

    fn fleet() -> (Arc<InMemorySupervisor>, FleetController) {
        let supervisor = Arc::new(InMemorySupervisor::new());
        let controller = FleetController::new(supervisor.clone(), catalog());
        (supervisor, controller)
    }

    #[tokio::test]
    async fn start_assigns_sequential_ports_from_base() {
        let (_, controller) = fleet();

        let first = controller.start_instance("prime-number").await.unwrap();
        let second = controller.start_instance("prime-number").await.unwrap();

        assert_eq!(first.port, 6101);
        assert_eq!(second.port, 6102);
        assert_eq!(first.name, "prime-number-6101");
        assert_eq!(controller.count_by_type("prime-number").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn ports_stay_monotonic_after_gapped_history() {
        let (_, controller) = fleet();

        controller.start_instance("prime-number").await.unwrap();
        let second = controller.start_instance("prime-number").await.unwrap();
        let third = controller.start_instance("prime-number").await.unwrap();
        assert_eq!(third.port, 6103);

        // Remove the middle instance; the recount-based candidate (6103)
        // is still taken, so allocation must move past it.
        controller
            .stop_instance_by_name(&second.name)
            .await
            .unwrap();
        let replacement = controller.start_instance("prime-number").await.unwrap();
        assert_eq!(replacement.port, 6104);
    }

    #[tokio::test]
    async fn capacity_limit_rejects_and_leaves_fleet_unchanged() {
        let (_, controller) = fleet();
        for _ in 0..3 {
            controller.start_instance("prime-number").await.unwrap();
        }

        let err = controller.start_instance("prime-number").await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::CapacityExceeded { limit: 3, .. }
        ));
        assert_eq!(controller.count_by_type("prime-number").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn unknown_type_is_invalid() {
        let (_, controller) = fleet();
        assert!(matches!(
            controller.start_instance("combobulator").await.unwrap_err(),
            FleetError::InvalidType(t) if t == "combobulator"
        ));
        assert!(matches!(
            controller.count_by_type("combobulator").await.unwrap_err(),
            FleetError::InvalidType(_)
        ));
    }

    #[tokio::test]
    async fn stop_without_instances_reports_not_found() {
        let (_, controller) = fleet();
        let err = controller.stop_instance("prime-number").await.unwrap_err();
        assert!(matches!(err, FleetError::NotFound(t) if t == "prime-number"));
    }

    #[tokio::test]
    async fn stop_returns_the_removed_instance() {
        let (_, controller) = fleet();
        controller.start_instance("prime-number").await.unwrap();
        controller.start_instance("prime-number").await.unwrap();

        let removed = controller.stop_instance("prime-number").await.unwrap();
        assert_eq!(removed.service_type, "prime-number");
        assert_eq!(controller.count_by_type("prime-number").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unmarked_and_foreign_processes_are_ignored() {
        let (supervisor, controller) = fleet();
        supervisor.register_unmarked("postgres");
        supervisor.register_marked("stray", "not json at all");

        controller.start_instance("prime-number").await.unwrap();

        let instances = controller.list_instances().await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].service_type, "prime-number");
    }

    #[tokio::test]
    async fn types_are_distinct_and_counts_are_per_type() {
        let (_, controller) = fleet();
        controller.start_instance("prime-number").await.unwrap();
        controller.start_instance("prime-number").await.unwrap();
        controller.start_instance("random-string").await.unwrap();

        let mut types = controller.list_types().await.unwrap();
        types.sort();
        assert_eq!(types, ["prime-number", "random-string"]);
        assert_eq!(controller.count_by_type("random-string").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn start_passes_port_argument_and_marker() {
        let (supervisor, controller) = fleet();
        let instance = controller.start_instance("random-string").await.unwrap();

        let specs = supervisor.started_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].args, ["--port", "6301"]);

        let marker: ServiceInstance =
            serde_json::from_str(specs[0].marker.as_ref().unwrap()).unwrap();
        assert_eq!(marker, instance);
    }
}
