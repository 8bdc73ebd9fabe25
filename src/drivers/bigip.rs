// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! F5 BIG-IP driver (iControl REST).
//!
//! All objects live in the `Common` partition and are addressed as
//! `/mgmt/tm/ltm/<collection>/~Common~<name>`.
//!
//! # Object mapping
//!
//! | Operation | BIG-IP objects |
//! |-----------|----------------|
//! | Pool | `ltm pool` with `loadBalancingMode` |
//! | Member | `ltm node` (the address) plus a pool member `<ip>:<port>` with `ratio` = weight |
//! | NAT virtual server | `ltm virtual` with the `fastL4` profile |
//! | URL-routed virtual server | `ltm virtual` with `http` and `tcp` profiles |
//! | Route | an `ltm rule` (iRule) attached to the virtual server's rule list |
//!
//! BIG-IP offers no way to detach the last iRule from a virtual server, so
//! unbinding the final route deletes the virtual server and creates it again
//! with the same destination.

use super::http::{ApplianceAuth, ApplianceClient};
use super::{
    ApplianceConfig, DriverResult, PoolDriver, Route, VirtualServerDriver, VirtualServerKind,
};
use crate::constants::{BIGIP_PARTITION, BIGIP_VIRTUAL_RATE_LIMIT, DEFAULT_MEMBER_WEIGHT};
use crate::crd::{LbMethod, PoolMember, Protocol};
use crate::errors::DriverError;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

const LTM: &str = "/mgmt/tm/ltm";
const APPLIANCE: &str = "bigip";

/// Error fragment BIG-IP returns when deleting a node another pool still uses.
const NODE_IN_USE_MARKER: &str = "is referenced";

/// Fields of `ltm virtual` the driver reads back.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualState {
    destination: String,
    #[serde(default)]
    ip_protocol: Option<String>,
    #[serde(default)]
    pool: Option<String>,
    #[serde(default)]
    rules: Option<Vec<String>>,
}

/// Driver for F5 BIG-IP appliances.
#[derive(Debug, Clone)]
pub struct BigIpDriver {
    client: ApplianceClient,
}

impl BigIpDriver {
    /// Creates a driver from connection settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ApplianceConfig) -> DriverResult<Self> {
        let client = ApplianceClient::new(
            APPLIANCE,
            &config.url,
            ApplianceAuth::Basic {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            config.timeout,
            config.insecure_tls,
        )?;
        Ok(Self { client })
    }

    async fn virtual_state(&self, vs: &str) -> DriverResult<Option<VirtualState>> {
        self.client
            .get(&object_path("virtual", vs), "get_virtual_server", vs)
            .await
    }

    async fn set_rules(&self, vs: &str, rules: &[String]) -> DriverResult {
        self.client
            .send(
                Method::PATCH,
                &object_path("virtual", vs),
                Some(&json!({ "rules": rules })),
                "update_virtual_server_rules",
                vs,
            )
            .await
            .map(|_| ())
    }
}

fn object_path(collection: &str, name: &str) -> String {
    format!("{LTM}/{collection}/~{BIGIP_PARTITION}~{name}")
}

fn full_path(name: &str) -> String {
    format!("/{BIGIP_PARTITION}/{name}")
}

fn member_name(member: &PoolMember) -> String {
    format!("{}:{}", member.ip, member.port)
}

fn load_balancing_mode(method: LbMethod) -> &'static str {
    match method {
        LbMethod::RoundRobin => "round-robin",
        LbMethod::LeastConnections => "least-connections-member",
        LbMethod::Ratio => "ratio-member",
    }
}

/// Splits a destination such as `/Common/203.0.113.10:80` into address and port.
fn parse_destination(destination: &str) -> Option<(String, u16)> {
    let tail = destination.rsplit('/').next()?;
    let (address, port) = tail.rsplit_once(':')?;
    // Route domain suffix, e.g. 10.0.0.1%2
    let address = address.split('%').next()?;
    Some((address.to_string(), port.parse().ok()?))
}

/// Renders the iRule sending requests for `route.host` (and path prefix) to the pool.
fn render_irule(route: &Route) -> String {
    let host = route.host.to_ascii_lowercase();
    let pool = full_path(&route.pool);
    let action = match route.path.as_deref() {
        Some(path) => format!(
            "if {{ [HTTP::path] starts_with \"{path}\" }} {{ pool {pool} }}"
        ),
        None => format!("pool {pool}"),
    };
    format!(
        "when HTTP_REQUEST {{\n    set host_info [string tolower [HTTP::host]]\n    switch -glob $host_info {{\n        \"{host}\" {{ {action} }}\n    }}\n}}\n"
    )
}

fn virtual_body(
    kind: VirtualServerKind,
    name: &str,
    address: &str,
    port: u16,
    protocol: Protocol,
) -> serde_json::Value {
    let (ip_protocol, profiles) = match kind {
        VirtualServerKind::Nat => (
            protocol.to_string(),
            json!([{ "name": "fastL4", "context": "all" }]),
        ),
        // URL routing needs the HTTP profile, which only runs over TCP
        VirtualServerKind::UrlRouted => (
            Protocol::Tcp.to_string(),
            json!([
                { "name": "http", "context": "all" },
                { "name": "tcp", "context": "all" }
            ]),
        ),
    };
    json!({
        "name": name,
        "partition": BIGIP_PARTITION,
        "destination": format!("/{BIGIP_PARTITION}/{address}:{port}"),
        "mask": "255.255.255.255",
        "ipProtocol": ip_protocol,
        "rateLimit": BIGIP_VIRTUAL_RATE_LIMIT,
        "profiles": profiles,
    })
}

#[async_trait]
impl PoolDriver for BigIpDriver {
    async fn create_pool(&self, name: &str, method: LbMethod) -> DriverResult {
        let mode = load_balancing_mode(method);
        self.client
            .create(
                Method::POST,
                &format!("{LTM}/pool"),
                Some(&json!({
                    "name": name,
                    "partition": BIGIP_PARTITION,
                    "loadBalancingMode": mode,
                })),
                "create_pool",
                name,
            )
            .await?;
        // An existing pool keeps its old mode unless it is set explicitly
        self.client
            .send(
                Method::PATCH,
                &object_path("pool", name),
                Some(&json!({ "loadBalancingMode": mode })),
                "set_pool_method",
                name,
            )
            .await
            .map(|_| ())
    }

    async fn delete_pool(&self, name: &str) -> DriverResult {
        self.client
            .delete(&object_path("pool", name), "delete_pool", name)
            .await
    }

    async fn add_member(&self, pool: &str, member: &PoolMember) -> DriverResult {
        self.client
            .create(
                Method::POST,
                &format!("{LTM}/node"),
                Some(&json!({
                    "name": member.ip,
                    "partition": BIGIP_PARTITION,
                    "address": member.ip,
                })),
                "create_node",
                &member.ip,
            )
            .await?;

        let name = member_name(member);
        let ratio = member.weight.unwrap_or(DEFAULT_MEMBER_WEIGHT);
        let members_path = format!("{}/members", object_path("pool", pool));
        self.client
            .upsert(
                (
                    Method::POST,
                    &members_path,
                    &json!({
                        "name": name,
                        "partition": BIGIP_PARTITION,
                        "ratio": ratio,
                    }),
                ),
                (
                    Method::PATCH,
                    &format!("{members_path}/~{BIGIP_PARTITION}~{name}"),
                    &json!({ "ratio": ratio }),
                ),
                "add_pool_member",
                &format!("{pool}/{name}"),
            )
            .await
    }

    async fn remove_member(&self, pool: &str, member: &PoolMember) -> DriverResult {
        let name = member_name(member);
        self.client
            .delete(
                &format!(
                    "{}/members/~{BIGIP_PARTITION}~{name}",
                    object_path("pool", pool)
                ),
                "remove_pool_member",
                &format!("{pool}/{name}"),
            )
            .await?;

        self.client
            .delete_tolerating(
                &object_path("node", &member.ip),
                "delete_node",
                &member.ip,
                &[NODE_IN_USE_MARKER],
            )
            .await
    }
}

#[async_trait]
impl VirtualServerDriver for BigIpDriver {
    async fn create_virtual_server(
        &self,
        kind: VirtualServerKind,
        name: &str,
        address: &str,
        port: u16,
        protocol: Protocol,
    ) -> DriverResult {
        self.client
            .create(
                Method::POST,
                &format!("{LTM}/virtual"),
                Some(&virtual_body(kind, name, address, port, protocol)),
                "create_virtual_server",
                name,
            )
            .await
    }

    async fn delete_virtual_server(&self, name: &str) -> DriverResult {
        self.client
            .delete(
                &object_path("virtual", name),
                "delete_virtual_server",
                name,
            )
            .await
    }

    async fn bind_pool(&self, vs: &str, pool: &str) -> DriverResult {
        self.client
            .send(
                Method::PATCH,
                &object_path("virtual", vs),
                Some(&json!({ "pool": full_path(pool) })),
                "bind_pool",
                &format!("{vs}/{pool}"),
            )
            .await
            .map(|_| ())
    }

    async fn unbind_pool(&self, vs: &str, pool: &str) -> DriverResult {
        let Some(state) = self.virtual_state(vs).await? else {
            return Ok(());
        };
        if state.pool.as_deref() != Some(full_path(pool).as_str()) {
            info!(vs = %vs, pool = %pool, "Pool is not the default pool of the virtual server, skipping unbind");
            return Ok(());
        }
        self.client
            .send(
                Method::PATCH,
                &object_path("virtual", vs),
                Some(&json!({ "pool": "none" })),
                "unbind_pool",
                &format!("{vs}/{pool}"),
            )
            .await
            .map(|_| ())
    }

    async fn bind_route(&self, vs: &str, route: &Route) -> DriverResult {
        self.client
            .create(
                Method::POST,
                &format!("{LTM}/rule"),
                Some(&json!({
                    "name": route.name,
                    "partition": BIGIP_PARTITION,
                    "apiAnonymous": render_irule(route),
                })),
                "create_irule",
                &route.name,
            )
            .await?;

        let state = self
            .virtual_state(vs)
            .await?
            .ok_or_else(|| DriverError::InvalidResponse {
                operation: format!("bind_route {vs}/{}", route.name),
                reason: format!("virtual server {vs} does not exist"),
            })?;

        let rule_path = full_path(&route.name);
        let mut rules = state.rules.unwrap_or_default();
        if rules.contains(&rule_path) {
            return Ok(());
        }
        rules.push(rule_path);
        self.set_rules(vs, &rules).await
    }

    async fn unbind_route(&self, vs: &str, route: &Route) -> DriverResult {
        let rule_path = full_path(&route.name);

        if let Some(state) = self.virtual_state(vs).await? {
            let rules = state.rules.clone().unwrap_or_default();
            let remaining: Vec<String> = rules.iter().filter(|r| **r != rule_path).cloned().collect();

            if remaining.len() == rules.len() {
                info!(vs = %vs, rule = %route.name, "iRule is not attached to the virtual server");
            } else if remaining.is_empty() {
                let (address, port) = parse_destination(&state.destination).ok_or_else(|| {
                    DriverError::InvalidResponse {
                        operation: format!("unbind_route {vs}/{}", route.name),
                        reason: format!("unparseable destination '{}'", state.destination),
                    }
                })?;
                warn!(
                    vs = %vs,
                    rule = %route.name,
                    ip_protocol = ?state.ip_protocol,
                    "Recreating virtual server to detach its last iRule"
                );
                self.delete_virtual_server(vs).await?;
                self.create_virtual_server(
                    VirtualServerKind::UrlRouted,
                    vs,
                    &address,
                    port,
                    Protocol::Tcp,
                )
                .await?;
            } else {
                self.set_rules(vs, &remaining).await?;
            }
        }

        self.client
            .delete(&object_path("rule", &route.name), "delete_irule", &route.name)
            .await
    }
}

#[cfg(test)]
#[path = "bigip_tests.rs"]
mod bigip_tests;
