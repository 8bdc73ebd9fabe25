// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Appliance drivers.
//!
//! Reconcilers talk to appliances only through the traits in this module and
//! never branch on the appliance type. Three operation families exist:
//!
//! - [`PoolDriver`] - pools and their members (every appliance)
//! - [`VirtualServerDriver`] - NAT and URL-routed virtual servers
//! - [`ContentSwitchDriver`] - content-switching virtual servers with host/path rules
//!
//! # Idempotency
//!
//! "Already exists" on create and "not found" on delete are reported as
//! success. Every other failure is a [`DriverError`].
//!
//! # Selection
//!
//! The appliance type is chosen once at startup. [`DriverFactory`] then builds
//! a fresh driver for every reconciler task, so no driver state is shared
//! between tasks.

pub mod bigip;
pub mod http;
pub mod netscaler;

#[cfg(test)]
pub mod fake;

use crate::crd::{LbMethod, PoolMember, Protocol};
use crate::errors::{ConfigError, DriverError};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use bigip::BigIpDriver;
pub use netscaler::NetScalerDriver;

/// Result alias for driver operations.
pub type DriverResult<T = ()> = Result<T, DriverError>;

/// Flavor of a virtual server created through [`VirtualServerDriver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtualServerKind {
    /// Layer-4 forwarding to a default pool
    Nat,
    /// HTTP virtual server dispatching requests by host
    UrlRouted,
}

/// A host/path routing entry attached to a URL-routed virtual server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    /// Appliance name of the route object (an iRule on BIG-IP).
    pub name: String,
    pub host: String,
    pub path: Option<String>,
    /// External name of the target pool.
    pub pool: String,
}

/// A content-switching rule attached to a content-switching virtual server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentRule {
    pub host: String,
    pub path: Option<String>,
    /// External name of the target pool.
    pub pool: String,
    /// Appliance name of the action forwarding to `pool`.
    pub action_name: String,
    /// Appliance name of the policy matching `host`/`path`.
    pub policy_name: String,
}

/// Pool and member management.
#[async_trait]
pub trait PoolDriver: Send + Sync {
    /// Creates a pool, or updates the load balancing method of an existing one.
    async fn create_pool(&self, name: &str, method: LbMethod) -> DriverResult;

    async fn delete_pool(&self, name: &str) -> DriverResult;

    async fn add_member(&self, pool: &str, member: &PoolMember) -> DriverResult;

    async fn remove_member(&self, pool: &str, member: &PoolMember) -> DriverResult;
}

/// NAT and URL-routed virtual servers.
#[async_trait]
pub trait VirtualServerDriver: PoolDriver {
    async fn create_virtual_server(
        &self,
        kind: VirtualServerKind,
        name: &str,
        address: &str,
        port: u16,
        protocol: Protocol,
    ) -> DriverResult;

    async fn delete_virtual_server(&self, name: &str) -> DriverResult;

    /// Sets `pool` as the default pool of a NAT virtual server.
    async fn bind_pool(&self, vs: &str, pool: &str) -> DriverResult;

    /// Clears the default pool of `vs` if it currently is `pool`.
    async fn unbind_pool(&self, vs: &str, pool: &str) -> DriverResult;

    async fn bind_route(&self, vs: &str, route: &Route) -> DriverResult;

    async fn unbind_route(&self, vs: &str, route: &Route) -> DriverResult;
}

/// Content-switching virtual servers.
#[async_trait]
pub trait ContentSwitchDriver: PoolDriver {
    async fn create_lb(&self, name: &str, vip: &str, port: u16) -> DriverResult;

    async fn delete_lb(&self, name: &str) -> DriverResult;

    /// Binds a rule with priority one above the highest bound priority.
    async fn add_rule(&self, lb: &str, rule: &ContentRule) -> DriverResult;

    async fn remove_rule(&self, lb: &str, rule: &ContentRule) -> DriverResult;
}

/// Supported appliance types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplianceKind {
    /// F5 BIG-IP (iControl REST)
    BigIp,
    /// Citrix NetScaler / ADC (NITRO)
    NetScaler,
}

impl fmt::Display for ApplianceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BigIp => f.write_str("bigip"),
            Self::NetScaler => f.write_str("netscaler"),
        }
    }
}

impl FromStr for ApplianceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bigip" | "f5" => Ok(Self::BigIp),
            "netscaler" | "citrix" => Ok(Self::NetScaler),
            other => Err(ConfigError::Invalid {
                setting: "appliance".to_string(),
                reason: format!("unknown appliance type '{other}' (expected bigip or netscaler)"),
            }),
        }
    }
}

/// Connection settings for one appliance.
#[derive(Clone)]
pub struct ApplianceConfig {
    pub kind: ApplianceKind,
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub insecure_tls: bool,
}

impl fmt::Debug for ApplianceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplianceConfig")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .field("insecure_tls", &self.insecure_tls)
            .finish_non_exhaustive()
    }
}

/// Builds driver instances for reconciler tasks.
///
/// The NAT family (pools, application and classic NAT) and the content-switching
/// family (load balancers and their pools) may point at different appliances.
#[derive(Clone, Debug)]
pub struct DriverFactory {
    nat: ApplianceConfig,
    lb: ApplianceConfig,
}

impl DriverFactory {
    /// Creates a factory after checking that each family is supported by its
    /// appliance type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the content-switching family is
    /// pointed at an appliance without content-switching support.
    pub fn new(nat: ApplianceConfig, lb: ApplianceConfig) -> Result<Self, ConfigError> {
        if lb.kind == ApplianceKind::BigIp {
            return Err(ConfigError::Invalid {
                setting: "--lb-appliance".to_string(),
                reason: "bigip does not provide content switching; use netscaler".to_string(),
            });
        }
        Ok(Self { nat, lb })
    }

    /// Builds a driver for the NAT family.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn nat_driver(&self) -> DriverResult<Arc<dyn VirtualServerDriver>> {
        let driver: Arc<dyn VirtualServerDriver> = match self.nat.kind {
            ApplianceKind::BigIp => Arc::new(BigIpDriver::new(&self.nat)?),
            ApplianceKind::NetScaler => Arc::new(NetScalerDriver::new(&self.nat)?),
        };
        Ok(driver)
    }

    /// Builds a driver for the content-switching family.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the appliance has
    /// no content-switching support.
    pub fn content_switch_driver(&self) -> DriverResult<Arc<dyn ContentSwitchDriver>> {
        match self.lb.kind {
            ApplianceKind::NetScaler => Ok(Arc::new(NetScalerDriver::new(&self.lb)?)),
            ApplianceKind::BigIp => Err(DriverError::Unsupported {
                operation: "content switching".to_string(),
                appliance: ApplianceKind::BigIp.to_string(),
            }),
        }
    }
}
