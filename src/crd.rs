// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for appliance configuration.
//!
//! This module defines the Kubernetes Custom Resource Definitions watched by edgelb.
//!
//! # Resource Types
//!
//! ## NAT (`external.edgelb.io/v1`)
//!
//! - [`ExternalNatPool`] - A named set of backend members on the NAT appliance
//! - [`AppExternalNat`] - A URL-routed virtual server with host-based rules
//! - [`ClassicExternalNat`] - A plain layer-4 virtual server forwarding to pools
//!
//! ## Content switching (`loadbalance.edgelb.io/v1`)
//!
//! - [`AppLoadBalancer`] - A content-switching virtual server with host/path rules
//! - [`AppLoadBalancerPool`] - A weighted pool on the content-switching appliance
//!
//! Every resource carries the same [`ResourceStatus`] shape, written only by the
//! reconciler that owns the kind.
//!
//! # Example: Declaring a pool
//!
//! ```rust
//! use edgelb::crd::{ExternalNatPoolSpec, LbMethod, PoolMember};
//!
//! let spec = ExternalNatPoolSpec {
//!     lb_method: Some(LbMethod::LeastConnections),
//!     members: vec![
//!         PoolMember { ip: "10.0.0.11".to_string(), port: 8080, weight: None },
//!         PoolMember { ip: "10.0.0.12".to_string(), port: 8080, weight: None },
//!     ],
//! };
//! assert_eq!(spec.members.len(), 2);
//! ```

use crate::constants::{
    KIND_APP_EXTERNAL_NAT, KIND_APP_LOAD_BALANCER, KIND_APP_LOAD_BALANCER_POOL,
    KIND_CLASSIC_EXTERNAL_NAT, KIND_EXTERNAL_NAT_POOL,
};
use kube::core::NamespaceResourceScope;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Shared types
// ============================================================================

/// Load balancing method requested for a pool.
///
/// Each driver translates the method into its appliance's vocabulary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum LbMethod {
    /// Rotate through members in order
    #[default]
    RoundRobin,
    /// Prefer the member with the fewest open connections
    LeastConnections,
    /// Distribute proportionally to member weights
    Ratio,
}

/// Transport protocol of a virtual server listener.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

/// A backend member of a pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolMember {
    /// IPv4 address of the backend.
    pub ip: String,

    /// Service port of the backend.
    pub port: u16,

    /// Relative weight. Defaults to 1 when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

/// Reconciliation state reported in [`ResourceStatus`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ResourceState {
    /// Not yet processed by the reconciler
    #[default]
    Pending,
    /// The appliance matches the declared configuration
    Available,
    /// The last reconciliation failed; `message` holds the appliance error
    Error,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Available => f.write_str("Available"),
            Self::Error => f.write_str("Error"),
        }
    }
}

/// Status shared by every edgelb resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub state: ResourceState,

    /// Human-readable detail, populated on errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Effective virtual IP (`AppLoadBalancer` only). Persisted so an allocated
    /// address survives operator restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// RFC3339 timestamp of the last status transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl ResourceStatus {
    /// Status for a successfully converged resource.
    #[must_use]
    pub fn available() -> Self {
        Self {
            state: ResourceState::Available,
            ..Self::default()
        }
    }

    /// Status for a failed reconciliation carrying the raw failure message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: ResourceState::Error,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_vip(mut self, vip: impl Into<String>) -> Self {
        self.vip = Some(vip.into());
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.state == ResourceState::Error
    }
}

// ============================================================================
// external.edgelb.io/v1
// ============================================================================

/// `ExternalNatPool` declares a pool of backend members on the NAT appliance.
///
/// # Example
///
/// ```yaml
/// apiVersion: external.edgelb.io/v1
/// kind: ExternalNatPool
/// metadata:
///   name: web
///   namespace: shop
/// spec:
///   lbMethod: round-robin
///   members:
///     - ip: 10.0.0.11
///       port: 8080
///     - ip: 10.0.0.12
///       port: 8080
/// ```
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "external.edgelb.io",
    version = "v1",
    kind = "ExternalNatPool",
    namespaced,
    shortname = "enp",
    doc = "ExternalNatPool is a named set of backend members configured on the NAT appliance.",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct ExternalNatPoolSpec {
    /// Load balancing method. Defaults to round robin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lb_method: Option<LbMethod>,

    /// Backend members.
    #[serde(default)]
    pub members: Vec<PoolMember>,
}

/// Host-based routing rule of an [`AppExternalNat`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppExternalNatRule {
    /// Request host the rule matches (glob patterns allowed, e.g. `*.example.com`).
    pub host: String,

    /// Name of an `ExternalNatPool` in the same namespace.
    pub pool: String,
}

/// `AppExternalNat` is a URL-routed virtual server dispatching by request host.
///
/// # Example
///
/// ```yaml
/// apiVersion: external.edgelb.io/v1
/// kind: AppExternalNat
/// metadata:
///   name: shop-front
///   namespace: shop
/// spec:
///   ip: 203.0.113.10
///   port: 80
///   protocol: tcp
///   rules:
///     - host: www.example.com
///       pool: web
///     - host: api.example.com
///       pool: api
/// ```
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "external.edgelb.io",
    version = "v1",
    kind = "AppExternalNat",
    namespaced,
    shortname = "aex",
    doc = "AppExternalNat is a URL-routed virtual server whose rules send each request host to a pool.",
    printcolumn = r#"{"name":"IP","type":"string","jsonPath":".spec.ip"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct AppExternalNatSpec {
    /// Listen address.
    pub ip: String,

    /// Listen port.
    pub port: u16,

    #[serde(default)]
    pub protocol: Protocol,

    /// Routing rules. Hosts must be unique.
    #[serde(default)]
    pub rules: Vec<AppExternalNatRule>,
}

/// Pool reference of a [`ClassicExternalNat`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassicExternalNatBackend {
    /// Name of an `ExternalNatPool` in the same namespace.
    pub pool_name: String,
}

/// `ClassicExternalNat` is a layer-4 virtual server with no routing.
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "external.edgelb.io",
    version = "v1",
    kind = "ClassicExternalNat",
    namespaced,
    shortname = "cex",
    doc = "ClassicExternalNat is a layer-4 virtual server forwarding traffic directly to its pools.",
    printcolumn = r#"{"name":"IP","type":"string","jsonPath":".spec.ip"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClassicExternalNatSpec {
    /// Listen address.
    pub ip: String,

    /// Listen port.
    pub port: u16,

    #[serde(default)]
    pub protocol: Protocol,

    /// Pools the virtual server forwards to.
    #[serde(default)]
    pub backends: Vec<ClassicExternalNatBackend>,
}

// ============================================================================
// loadbalance.edgelb.io/v1
// ============================================================================

/// Path binding inside an [`AppLoadBalancerRule`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppLoadBalancerPath {
    /// Path prefix. Empty or absent matches every path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Name of an `AppLoadBalancerPool` in the same namespace.
    pub pool: String,
}

/// Host rule of an [`AppLoadBalancer`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppLoadBalancerRule {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub paths: Vec<AppLoadBalancerPath>,
}

/// `AppLoadBalancer` is a content-switching virtual server.
///
/// When `ip` is omitted, an address is allocated from `subnet` on creation and
/// reported in `status.vip`.
///
/// # Example
///
/// ```yaml
/// apiVersion: loadbalance.edgelb.io/v1
/// kind: AppLoadBalancer
/// metadata:
///   name: portal
///   namespace: shop
/// spec:
///   port: 80
///   subnet: 198.51.100.0/24
///   rules:
///     - host: portal.example.com
///       paths:
///         - path: /api
///           pool: api
///         - pool: web
/// ```
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "loadbalance.edgelb.io",
    version = "v1",
    kind = "AppLoadBalancer",
    namespaced,
    shortname = "alb",
    doc = "AppLoadBalancer is a content-switching virtual server routing host/path pairs to pools.",
    printcolumn = r#"{"name":"VIP","type":"string","jsonPath":".status.vip"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct AppLoadBalancerSpec {
    /// Virtual IP. Allocated from `subnet` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Listen port.
    pub port: u16,

    /// Subnet (CIDR) the virtual IP belongs to.
    pub subnet: String,

    #[serde(default)]
    pub rules: Vec<AppLoadBalancerRule>,
}

/// `AppLoadBalancerPool` is a weighted pool on the content-switching appliance.
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "loadbalance.edgelb.io",
    version = "v1",
    kind = "AppLoadBalancerPool",
    namespaced,
    shortname = "albp",
    doc = "AppLoadBalancerPool is a weighted set of backend members on the content-switching appliance.",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct AppLoadBalancerPoolSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lb_method: Option<LbMethod>,

    #[serde(default)]
    pub members: Vec<PoolMember>,
}

/// A single host/path binding of an [`AppLoadBalancer`], flattened out of its rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPath {
    pub host: String,
    /// `None` when the declared path was absent or empty.
    pub path: Option<String>,
    pub pool: String,
}

impl AppLoadBalancerSpec {
    /// Flattens `rules` into host/path bindings in declaration order.
    #[must_use]
    pub fn host_paths(&self) -> Vec<HostPath> {
        self.rules
            .iter()
            .flat_map(|rule| {
                rule.paths.iter().map(move |p| HostPath {
                    host: rule.host.clone(),
                    path: p.path.clone().filter(|path| !path.is_empty()),
                    pool: p.pool.clone(),
                })
            })
            .collect()
    }
}

// ============================================================================
// Reconciler plumbing
// ============================================================================

/// A namespaced custom resource driven by one of the reconcilers.
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Kind name used in logs and metric labels.
    const KIND: &'static str;

    /// The status last written by the reconciler, if any.
    fn resource_status(&self) -> Option<&ResourceStatus>;

    /// True if both objects declare the same `spec`.
    fn same_spec(&self, other: &Self) -> bool;
}

macro_rules! managed_resource {
    ($ty:ty, $kind:expr) => {
        impl ManagedResource for $ty {
            const KIND: &'static str = $kind;

            fn resource_status(&self) -> Option<&ResourceStatus> {
                self.status.as_ref()
            }

            fn same_spec(&self, other: &Self) -> bool {
                self.spec == other.spec
            }
        }
    };
}

managed_resource!(ExternalNatPool, KIND_EXTERNAL_NAT_POOL);
managed_resource!(AppExternalNat, KIND_APP_EXTERNAL_NAT);
managed_resource!(ClassicExternalNat, KIND_CLASSIC_EXTERNAL_NAT);
managed_resource!(AppLoadBalancer, KIND_APP_LOAD_BALANCER);
managed_resource!(AppLoadBalancerPool, KIND_APP_LOAD_BALANCER_POOL);
