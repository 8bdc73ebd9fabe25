// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the edgelb operator.
//!
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for NAT resources (pools and virtual servers)
pub const EXTERNAL_API_GROUP: &str = "external.edgelb.io";

/// API group for content-switching load balancer resources
pub const LOADBALANCE_API_GROUP: &str = "loadbalance.edgelb.io";

/// API version shared by both groups
pub const API_VERSION: &str = "v1";

/// Kind name for `ExternalNatPool` resource
pub const KIND_EXTERNAL_NAT_POOL: &str = "ExternalNatPool";

/// Kind name for `AppExternalNat` resource
pub const KIND_APP_EXTERNAL_NAT: &str = "AppExternalNat";

/// Kind name for `ClassicExternalNat` resource
pub const KIND_CLASSIC_EXTERNAL_NAT: &str = "ClassicExternalNat";

/// Kind name for `AppLoadBalancer` resource
pub const KIND_APP_LOAD_BALANCER: &str = "AppLoadBalancer";

/// Kind name for `AppLoadBalancerPool` resource
pub const KIND_APP_LOAD_BALANCER_POOL: &str = "AppLoadBalancerPool";

// ============================================================================
// Appliance Constants
// ============================================================================

/// Member weight used when a pool member does not declare one
pub const DEFAULT_MEMBER_WEIGHT: u32 = 1;

/// Path placeholder hashed into content-switching object names when a path is empty
pub const EMPTY_PATH_KEY: &str = "nilpath";

/// BIG-IP administrative partition holding all managed objects
pub const BIGIP_PARTITION: &str = "Common";

/// Connection rate limit applied to BIG-IP virtual servers
pub const BIGIP_VIRTUAL_RATE_LIMIT: &str = "10240";

/// Default per-request timeout for appliance API calls
pub const DEFAULT_APPLIANCE_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Controller Constants
// ============================================================================

/// Maximum time to wait for every reconciler's initial listing (5 minutes)
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 300;

/// Interval between full resyncs of the notification stream (10 minutes)
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 600;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default name of the `Lease` object guarding the active role
pub const DEFAULT_LEASE_NAME: &str = "lb-operator";

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election renew deadline (10 seconds)
pub const DEFAULT_LEASE_RENEW_DEADLINE_SECS: u64 = 10;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Path for the liveness endpoint
pub const HEALTHZ_PATH: &str = "/healthz";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
