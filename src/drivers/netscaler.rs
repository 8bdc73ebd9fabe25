// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Citrix NetScaler / ADC driver (NITRO REST API).
//!
//! # Object mapping
//!
//! | Operation | NetScaler objects |
//! |-----------|-------------------|
//! | Pool | `servicegroup` (HTTP) plus a same-named, non-addressable `lbvserver` bound to it |
//! | Member | `server` (the address) plus a `servicegroup_servicegroupmember_binding` |
//! | NAT virtual server | addressable TCP/UDP `lbvserver` |
//! | URL-routed / content-switching virtual server | `csvserver` (HTTP) |
//! | Route / content rule | `csaction` targeting the pool's `lbvserver`, plus a `cspolicy` bound to the `csvserver` |
//!
//! Servers are shared between service groups and are never deleted by the driver.

use super::http::{ApplianceAuth, ApplianceClient};
use super::{
    ApplianceConfig, ContentRule, ContentSwitchDriver, DriverResult, PoolDriver, Route,
    VirtualServerDriver, VirtualServerKind,
};
use crate::constants::DEFAULT_MEMBER_WEIGHT;
use crate::crd::{LbMethod, PoolMember, Protocol};
use crate::errors::DriverError;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

const CONFIG: &str = "/nitro/v1/config";
const APPLIANCE: &str = "netscaler";

/// Suffix of the `csaction` created for a route on a URL-routed virtual server.
const ROUTE_ACTION_SUFFIX: &str = "_act";

#[derive(Debug, Deserialize)]
struct PolicyBindings {
    #[serde(default)]
    csvserver_cspolicy_binding: Vec<PolicyBinding>,
}

#[derive(Debug, Deserialize)]
struct PolicyBinding {
    policyname: String,
    /// NITRO reports numbers as strings in most firmware versions
    #[serde(default)]
    priority: Option<Value>,
}

impl PolicyBinding {
    fn priority(&self) -> Option<u32> {
        match self.priority.as_ref()? {
            Value::Number(n) => n.as_u64().and_then(|p| u32::try_from(p).ok()),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Driver for NetScaler appliances.
#[derive(Debug, Clone)]
pub struct NetScalerDriver {
    client: ApplianceClient,
}

impl NetScalerDriver {
    /// Creates a driver from connection settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ApplianceConfig) -> DriverResult<Self> {
        let client = ApplianceClient::new(
            APPLIANCE,
            &config.url,
            ApplianceAuth::Headers(vec![
                ("X-NITRO-USER".to_string(), config.username.clone()),
                ("X-NITRO-PASS".to_string(), config.password.clone()),
            ]),
            config.timeout,
            config.insecure_tls,
        )?;
        Ok(Self { client })
    }

    async fn add(&self, resource: &str, body: &Value, op: &'static str, target: &str) -> DriverResult {
        self.client
            .create(
                Method::POST,
                &format!("{CONFIG}/{resource}"),
                Some(body),
                op,
                target,
            )
            .await
    }

    async fn bind(&self, binding: &str, body: &Value, op: &'static str, target: &str) -> DriverResult {
        self.client
            .create(
                Method::PUT,
                &format!("{CONFIG}/{binding}"),
                Some(body),
                op,
                target,
            )
            .await
    }

    async fn remove(&self, resource: &str, name: &str, op: &'static str) -> DriverResult {
        self.client
            .delete(&format!("{CONFIG}/{resource}/{name}"), op, name)
            .await
    }

    /// Next free policy priority on `lb`, or `None` when `policy` is already bound.
    async fn next_priority(&self, lb: &str, policy: &str) -> DriverResult<Option<u32>> {
        let bindings: PolicyBindings = self
            .client
            .get(
                &format!("{CONFIG}/csvserver_cspolicy_binding/{lb}"),
                "list_cs_policy_bindings",
                lb,
            )
            .await?
            .ok_or_else(|| DriverError::InvalidResponse {
                operation: format!("list_cs_policy_bindings {lb}"),
                reason: format!("content switching virtual server {lb} does not exist"),
            })?;

        if bindings
            .csvserver_cspolicy_binding
            .iter()
            .any(|b| b.policyname == policy)
        {
            return Ok(None);
        }
        let highest = bindings
            .csvserver_cspolicy_binding
            .iter()
            .filter_map(PolicyBinding::priority)
            .max()
            .unwrap_or(0);
        Ok(Some(highest + 1))
    }
}

fn lb_method(method: LbMethod) -> &'static str {
    match method {
        LbMethod::RoundRobin | LbMethod::Ratio => "ROUNDROBIN",
        LbMethod::LeastConnections => "LEASTCONNECTION",
    }
}

fn service_type(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Tcp => "TCP",
        Protocol::Udp => "UDP",
    }
}

/// Builds the policy expression matching `host` and an optional path prefix.
///
/// A leading `*.` in the host matches any subdomain.
fn policy_expression(host: &str, path: Option<&str>) -> String {
    let mut clauses = Vec::new();
    if let Some(suffix) = host.strip_prefix('*') {
        clauses.push(format!(
            "HTTP.REQ.HOSTNAME.SET_TEXT_MODE(IGNORECASE).ENDSWITH(\"{suffix}\")"
        ));
    } else if !host.is_empty() {
        clauses.push(format!(
            "HTTP.REQ.HOSTNAME.SET_TEXT_MODE(IGNORECASE).EQ(\"{host}\")"
        ));
    }
    if let Some(prefix) = path {
        clauses.push(format!("HTTP.REQ.URL.PATH.STARTSWITH(\"{prefix}\")"));
    }
    if clauses.is_empty() {
        "true".to_string()
    } else {
        clauses.join(" && ")
    }
}

fn route_rule(route: &Route) -> ContentRule {
    ContentRule {
        host: route.host.clone(),
        path: route.path.clone(),
        pool: route.pool.clone(),
        action_name: format!("{}{ROUTE_ACTION_SUFFIX}", route.name),
        policy_name: route.name.clone(),
    }
}

#[async_trait]
impl PoolDriver for NetScalerDriver {
    async fn create_pool(&self, name: &str, method: LbMethod) -> DriverResult {
        self.add(
            "servicegroup",
            &json!({ "servicegroup": { "servicegroupname": name, "servicetype": "HTTP" } }),
            "create_service_group",
            name,
        )
        .await?;

        let method = lb_method(method);
        self.client
            .upsert(
                (
                    Method::POST,
                    &format!("{CONFIG}/lbvserver"),
                    &json!({ "lbvserver": { "name": name, "servicetype": "HTTP", "lbmethod": method } }),
                ),
                (
                    Method::PUT,
                    &format!("{CONFIG}/lbvserver"),
                    &json!({ "lbvserver": { "name": name, "lbmethod": method } }),
                ),
                "create_lb_vserver",
                name,
            )
            .await?;

        self.bind(
            "lbvserver_servicegroup_binding",
            &json!({ "lbvserver_servicegroup_binding": { "name": name, "servicegroupname": name } }),
            "bind_service_group",
            name,
        )
        .await
    }

    async fn delete_pool(&self, name: &str) -> DriverResult {
        self.remove("lbvserver", name, "delete_lb_vserver").await?;
        self.remove("servicegroup", name, "delete_service_group").await
    }

    async fn add_member(&self, pool: &str, member: &PoolMember) -> DriverResult {
        self.add(
            "server",
            &json!({ "server": { "name": member.ip, "ipaddress": member.ip } }),
            "create_server",
            &member.ip,
        )
        .await?;

        let weight = member.weight.unwrap_or(DEFAULT_MEMBER_WEIGHT);
        let fields = json!({
            "servicegroupname": pool,
            "servername": member.ip,
            "port": member.port,
            "weight": weight,
        });
        self.client
            .upsert(
                (
                    Method::POST,
                    &format!("{CONFIG}/servicegroup_servicegroupmember_binding"),
                    &json!({ "servicegroup_servicegroupmember_binding": fields }),
                ),
                (
                    Method::PUT,
                    &format!("{CONFIG}/servicegroup"),
                    &json!({ "servicegroup": fields }),
                ),
                "add_pool_member",
                &format!("{pool}/{}:{}", member.ip, member.port),
            )
            .await
    }

    async fn remove_member(&self, pool: &str, member: &PoolMember) -> DriverResult {
        self.client
            .delete(
                &format!(
                    "{CONFIG}/servicegroup_servicegroupmember_binding/{pool}?args=servername:{},port:{}",
                    member.ip, member.port
                ),
                "remove_pool_member",
                &format!("{pool}/{}:{}", member.ip, member.port),
            )
            .await
    }
}

#[async_trait]
impl VirtualServerDriver for NetScalerDriver {
    async fn create_virtual_server(
        &self,
        kind: VirtualServerKind,
        name: &str,
        address: &str,
        port: u16,
        protocol: Protocol,
    ) -> DriverResult {
        match kind {
            VirtualServerKind::Nat => {
                self.add(
                    "lbvserver",
                    &json!({ "lbvserver": {
                        "name": name,
                        "servicetype": service_type(protocol),
                        "ipv46": address,
                        "port": port,
                    } }),
                    "create_virtual_server",
                    name,
                )
                .await
            }
            VirtualServerKind::UrlRouted => self.create_lb(name, address, port).await,
        }
    }

    async fn delete_virtual_server(&self, name: &str) -> DriverResult {
        // The name identifies either flavor; the other one is absent
        self.remove("csvserver", name, "delete_virtual_server").await?;
        self.remove("lbvserver", name, "delete_virtual_server").await
    }

    async fn bind_pool(&self, vs: &str, pool: &str) -> DriverResult {
        self.bind(
            "lbvserver_servicegroup_binding",
            &json!({ "lbvserver_servicegroup_binding": { "name": vs, "servicegroupname": pool } }),
            "bind_pool",
            &format!("{vs}/{pool}"),
        )
        .await
    }

    async fn unbind_pool(&self, vs: &str, pool: &str) -> DriverResult {
        self.client
            .delete(
                &format!("{CONFIG}/lbvserver_servicegroup_binding/{vs}?args=servicegroupname:{pool}"),
                "unbind_pool",
                &format!("{vs}/{pool}"),
            )
            .await
    }

    async fn bind_route(&self, vs: &str, route: &Route) -> DriverResult {
        self.add_rule(vs, &route_rule(route)).await
    }

    async fn unbind_route(&self, vs: &str, route: &Route) -> DriverResult {
        self.remove_rule(vs, &route_rule(route)).await
    }
}

#[async_trait]
impl ContentSwitchDriver for NetScalerDriver {
    async fn create_lb(&self, name: &str, vip: &str, port: u16) -> DriverResult {
        self.add(
            "csvserver",
            &json!({ "csvserver": {
                "name": name,
                "servicetype": "HTTP",
                "ipv46": vip,
                "port": port,
            } }),
            "create_cs_vserver",
            name,
        )
        .await
    }

    async fn delete_lb(&self, name: &str) -> DriverResult {
        self.remove("csvserver", name, "delete_cs_vserver").await
    }

    async fn add_rule(&self, lb: &str, rule: &ContentRule) -> DriverResult {
        let Some(priority) = self.next_priority(lb, &rule.policy_name).await? else {
            info!(lb = %lb, policy = %rule.policy_name, "Policy already bound, skipping");
            return Ok(());
        };

        self.add(
            "csaction",
            &json!({ "csaction": { "name": rule.action_name, "targetlbvserver": rule.pool } }),
            "create_cs_action",
            &rule.action_name,
        )
        .await?;
        self.add(
            "cspolicy",
            &json!({ "cspolicy": {
                "policyname": rule.policy_name,
                "rule": policy_expression(&rule.host, rule.path.as_deref()),
                "action": rule.action_name,
            } }),
            "create_cs_policy",
            &rule.policy_name,
        )
        .await?;
        self.bind(
            "csvserver_cspolicy_binding",
            &json!({ "csvserver_cspolicy_binding": {
                "name": lb,
                "policyname": rule.policy_name,
                "priority": priority,
            } }),
            "bind_cs_policy",
            &format!("{lb}/{}", rule.policy_name),
        )
        .await
    }

    async fn remove_rule(&self, lb: &str, rule: &ContentRule) -> DriverResult {
        self.client
            .delete(
                &format!(
                    "{CONFIG}/csvserver_cspolicy_binding/{lb}?args=policyname:{}",
                    rule.policy_name
                ),
                "unbind_cs_policy",
                &format!("{lb}/{}", rule.policy_name),
            )
            .await?;
        self.remove("cspolicy", &rule.policy_name, "delete_cs_policy")
            .await?;
        self.remove("csaction", &rule.action_name, "delete_cs_action")
            .await
    }
}

#[cfg(test)]
#[path = "netscaler_tests.rs"]
mod netscaler_tests;
