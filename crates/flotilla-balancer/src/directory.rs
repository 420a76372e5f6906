//! The in-memory model of upstream groups.
//!
//! A single process-wide `Directory` owns all groups. Mutations are
//! synchronous and atomic against one lock; no partial-group state is
//! ever observable. Groups keep insertion order so rendering is
//! deterministic.

use std::net::IpAddr;
use std::sync::{OnceLock, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DirectoryError, DirectoryResult};

const NAME_PATTERN: &str = "^[a-zA-Z0-9-]+$";
const LOCATION_PATTERN: &str = "^(/[^/]*)+$";
const FQDN_PATTERN: &str = r"^(?i)(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}$";

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NAME_PATTERN).expect("valid name pattern"))
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(LOCATION_PATTERN).expect("valid location pattern"))
}

fn fqdn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FQDN_PATTERN).expect("valid fqdn pattern"))
}

/// How a group spreads connections across its members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancePolicy {
    #[default]
    RoundRobin,
    LeastConn,
    IpHash,
}

impl BalancePolicy {
    /// Parse an optional caller-supplied policy string. `None` means
    /// the default round-robin.
    pub fn parse(policy: Option<&str>) -> DirectoryResult<Self> {
        match policy {
            None => Ok(Self::RoundRobin),
            Some("least_conn") => Ok(Self::LeastConn),
            Some("ip_hash") => Ok(Self::IpHash),
            Some(other) => Err(DirectoryError::InvalidPolicy(other.to_string())),
        }
    }

    /// The config directive emitted for this policy, if any.
    /// Round-robin is the proxy default and has no directive.
    pub fn directive(&self) -> Option<&'static str> {
        match self {
            Self::RoundRobin => None,
            Self::LeastConn => Some("least_conn"),
            Self::IpHash => Some("ip_hash"),
        }
    }
}

/// One upstream group: a public entry location routed to a set of
/// member addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancerGroup {
    pub name: String,
    /// The URI users hit to reach this group. Unique across all groups.
    pub external_location: String,
    /// The URI each member is called with after balancing.
    pub service_location: String,
    pub policy: BalancePolicy,
    /// Member addresses (`ip:port` or FQDN), insertion order, unique.
    pub members: Vec<String>,
}

/// Validate a member address: an FQDN, or host[:port] with a parseable
/// IP and port (port defaults to 80 when absent).
fn is_valid_address(address: &str) -> bool {
    if fqdn_re().is_match(address) {
        return true;
    }
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => (address, "80"),
    };
    host.parse::<IpAddr>().is_ok() && port.parse::<u16>().is_ok()
}

/// Process-wide directory of load-balancer groups.
#[derive(Default)]
pub struct Directory {
    groups: RwLock<Vec<BalancerGroup>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group. The returned value is a snapshot, not a handle
    /// into the live model.
    pub fn create_group(
        &self,
        name: &str,
        external_location: &str,
        service_location: &str,
        policy: Option<&str>,
    ) -> DirectoryResult<BalancerGroup> {
        if !name_re().is_match(name) {
            return Err(DirectoryError::InvalidFormat {
                field: "name",
                pattern: NAME_PATTERN,
                value: name.to_string(),
            });
        }
        if !location_re().is_match(external_location) {
            return Err(DirectoryError::InvalidFormat {
                field: "externalLocation",
                pattern: LOCATION_PATTERN,
                value: external_location.to_string(),
            });
        }
        if !location_re().is_match(service_location) {
            return Err(DirectoryError::InvalidFormat {
                field: "serviceLocation",
                pattern: LOCATION_PATTERN,
                value: service_location.to_string(),
            });
        }
        let policy = BalancePolicy::parse(policy)?;

        let mut groups = self.groups.write().expect("directory lock");
        if groups.iter().any(|group| group.name == name) {
            return Err(DirectoryError::DuplicateName(name.to_string()));
        }
        if let Some(clash) = groups
            .iter()
            .find(|group| group.external_location == external_location)
        {
            return Err(DirectoryError::DuplicateLocation {
                location: external_location.to_string(),
                group: clash.name.clone(),
            });
        }

        let group = BalancerGroup {
            name: name.to_string(),
            external_location: external_location.to_string(),
            service_location: service_location.to_string(),
            policy,
            members: Vec::new(),
        };
        groups.push(group.clone());
        debug!(group = name, external_location, "load balancer group created");
        Ok(group)
    }

    /// Add a member address to a group.
    pub fn add_member(&self, name: &str, address: &str) -> DirectoryResult<BalancerGroup> {
        if !is_valid_address(address) {
            return Err(DirectoryError::InvalidAddress(address.to_string()));
        }

        let mut groups = self.groups.write().expect("directory lock");
        let group = groups
            .iter_mut()
            .find(|group| group.name == name)
            .ok_or_else(|| DirectoryError::NotFound(name.to_string()))?;

        if group.members.iter().any(|member| member == address) {
            return Err(DirectoryError::DuplicateMember {
                group: name.to_string(),
                address: address.to_string(),
            });
        }

        group.members.push(address.to_string());
        debug!(group = name, address, "member added");
        Ok(group.clone())
    }

    /// Remove a member address from a group.
    pub fn remove_member(&self, name: &str, address: &str) -> DirectoryResult<BalancerGroup> {
        let mut groups = self.groups.write().expect("directory lock");
        let group = groups
            .iter_mut()
            .find(|group| group.name == name)
            .ok_or_else(|| DirectoryError::NotFound(name.to_string()))?;

        let position = group
            .members
            .iter()
            .position(|member| member == address)
            .ok_or_else(|| DirectoryError::MemberNotFound {
                group: name.to_string(),
                address: address.to_string(),
            })?;

        group.members.remove(position);
        debug!(group = name, address, "member removed");
        Ok(group.clone())
    }

    /// Read-only snapshot of every group, insertion order.
    pub fn list_groups(&self) -> Vec<BalancerGroup> {
        self.groups.read().expect("directory lock").clone()
    }

    /// Snapshot of a single group.
    pub fn get(&self, name: &str) -> Option<BalancerGroup> {
        self.groups
            .read()
            .expect("directory lock")
            .iter()
            .find(|group| group.name == name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with_group() -> Directory {
        let directory = Directory::new();
        directory
            .create_group("prime-number-balancer", "/api/prime-number", "/prime-number", None)
            .unwrap();
        directory
    }

    #[test]
    fn create_defaults_to_round_robin() {
        let directory = Directory::new();
        let group = directory
            .create_group("g-1", "/api/g1", "/g1", None)
            .unwrap();
        assert_eq!(group.policy, BalancePolicy::RoundRobin);
        assert!(group.members.is_empty());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let directory = directory_with_group();
        let err = directory
            .create_group("prime-number-balancer", "/api/other", "/other", None)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateName(_)));
    }

    #[test]
    fn duplicate_external_location_names_the_claiming_group() {
        let directory = directory_with_group();
        let err = directory
            .create_group("other", "/api/prime-number", "/other", None)
            .unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::DuplicateLocation { ref group, .. } if group == "prime-number-balancer"
        ));

        // The first group is untouched by the failed attempt.
        let survivor = directory.get("prime-number-balancer").unwrap();
        assert_eq!(survivor.external_location, "/api/prime-number");
    }

    #[test]
    fn invalid_name_and_locations_are_rejected_with_context() {
        let directory = Directory::new();

        let err = directory
            .create_group("no spaces", "/api/x", "/x", None)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidFormat { field: "name", .. }));

        let err = directory
            .create_group("ok", "missing-slash", "/x", None)
            .unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::InvalidFormat { field: "externalLocation", .. }
        ));
    }

    #[test]
    fn policies_parse_and_reject() {
        assert_eq!(BalancePolicy::parse(Some("least_conn")).unwrap(), BalancePolicy::LeastConn);
        assert_eq!(BalancePolicy::parse(Some("ip_hash")).unwrap(), BalancePolicy::IpHash);
        assert!(matches!(
            BalancePolicy::parse(Some("fastest")),
            Err(DirectoryError::InvalidPolicy(p)) if p == "fastest"
        ));
    }

    #[test]
    fn member_addresses_are_validated() {
        let directory = directory_with_group();

        directory
            .add_member("prime-number-balancer", "127.0.0.1:6101")
            .unwrap();
        directory
            .add_member("prime-number-balancer", "backend.example.com")
            .unwrap();
        // Bare IP defaults its port.
        directory
            .add_member("prime-number-balancer", "10.0.0.7")
            .unwrap();

        let err = directory
            .add_member("prime-number-balancer", "not an address")
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidAddress(_)));

        let err = directory
            .add_member("prime-number-balancer", "127.0.0.1:notaport")
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidAddress(_)));
    }

    #[test]
    fn duplicate_member_is_rejected() {
        let directory = directory_with_group();
        directory
            .add_member("prime-number-balancer", "127.0.0.1:6101")
            .unwrap();

        let err = directory
            .add_member("prime-number-balancer", "127.0.0.1:6101")
            .unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateMember { .. }));
    }

    #[test]
    fn remove_member_handles_both_not_found_cases() {
        let directory = directory_with_group();

        assert!(matches!(
            directory.remove_member("ghost", "127.0.0.1:1").unwrap_err(),
            DirectoryError::NotFound(_)
        ));
        assert!(matches!(
            directory
                .remove_member("prime-number-balancer", "127.0.0.1:1")
                .unwrap_err(),
            DirectoryError::MemberNotFound { .. }
        ));
    }

    #[test]
    fn membership_mutations_round_trip() {
        let directory = directory_with_group();
        directory
            .add_member("prime-number-balancer", "127.0.0.1:6101")
            .unwrap();
        directory
            .add_member("prime-number-balancer", "127.0.0.1:6102")
            .unwrap();

        let group = directory
            .remove_member("prime-number-balancer", "127.0.0.1:6101")
            .unwrap();
        assert_eq!(group.members, ["127.0.0.1:6102"]);
    }

    #[test]
    fn list_groups_is_a_snapshot() {
        let directory = directory_with_group();
        let mut snapshot = directory.list_groups();
        snapshot[0].members.push("127.0.0.1:9999".to_string());

        // Mutating the snapshot never touches the live model.
        assert!(directory.get("prime-number-balancer").unwrap().members.is_empty());
    }

    #[test]
    fn groups_keep_insertion_order() {
        let directory = Directory::new();
        for name in ["zeta", "alpha", "mid"] {
            directory
                .create_group(name, &format!("/api/{name}"), &format!("/{name}"), None)
                .unwrap();
        }
        let names: Vec<String> = directory.list_groups().into_iter().map(|g| g.name).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }
}
