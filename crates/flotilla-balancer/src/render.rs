//! Proxy configuration rendering.
//!
//! `render` is a pure function: identical directory state, static root,
//! and monitor address produce byte-identical output. Groups and members
//! are emitted in insertion order.

use std::path::Path;

use crate::directory::BalancerGroup;

/// Address of the management/monitor server the proxy forwards
/// `/manager` traffic to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorAddress {
    pub ip: String,
    pub port: u16,
}

/// Produce the complete proxy configuration text.
pub fn render(groups: &[BalancerGroup], static_root: &Path, monitor: &MonitorAddress) -> String {
    let mut out = String::new();

    out.push_str("# Defaults to number of CPUs\n");
    out.push_str("worker_processes auto;\n\n");

    out.push_str("events {\n");
    out.push_str("  # Total active connections per worker\n");
    out.push_str("  worker_connections 512;\n");
    out.push_str("}\n\n");

    out.push_str("http {\n");
    out.push_str("  include mime.types;\n\n");
    out.push_str("  # Used for WebSocket connection maintenance\n");
    out.push_str("  map $http_upgrade $connection_upgrade {\n");
    out.push_str("    default upgrade;\n");
    out.push_str("    '' close;\n");
    out.push_str("  }\n\n");

    out.push_str("  # Upstream pools, one per load balancer group\n");
    for group in groups {
        out.push_str(&format!("  upstream {} {{\n", group.name));
        if let Some(directive) = group.policy.directive() {
            out.push_str(&format!("    {directive};\n"));
        }
        for member in &group.members {
            out.push_str(&format!("    server {member};\n"));
        }
        out.push_str("  }\n\n");
    }

    out.push_str("  # Pool handling monitor app responses\n");
    out.push_str("  upstream manager-servers {\n");
    out.push_str("    least_conn;\n");
    out.push_str(&format!("    server {}:{};\n", monitor.ip, monitor.port));
    out.push_str("  }\n\n");

    out.push_str("  # Main traffic router\n");
    out.push_str("  server {\n");
    out.push_str(&format!("    root {};\n", static_root.display()));
    out.push_str("\n    listen 80;\n");
    out.push_str("    server_name flotilla;\n\n");

    out.push_str("    # Route to load balancer pools\n");
    for group in groups {
        out.push_str(&format!("    location {} {{\n", group.external_location));
        out.push_str(&format!(
            "      proxy_pass http://{}{};\n",
            group.name, group.service_location
        ));
        out.push_str("    }\n\n");
    }

    out.push_str("    # Manager SPA and static assets\n");
    out.push_str("    location /manager {\n");
    out.push_str("      try_files /manager/index.html $uri $uri/;\n");
    out.push_str("    }\n\n");

    out.push_str("    # Manager live updates over WebSocket\n");
    out.push_str("    location /manager/ws {\n");
    out.push_str("      rewrite /manager(.*) $1 break;\n");
    out.push_str("      proxy_pass http://manager-servers;\n");
    out.push_str("      proxy_redirect off;\n");
    out.push_str("      proxy_http_version 1.1;\n");
    out.push_str("      proxy_set_header Upgrade $http_upgrade;\n");
    out.push_str("      proxy_set_header Connection $connection_upgrade;\n");
    out.push_str("      proxy_set_header Host $host;\n");
    out.push_str("    }\n");

    out.push_str("  }\n");
    out.push_str("}\n");

    out
}
