// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # edgelb - Load Balancer and NAT Appliance Operator for Kubernetes
//!
//! edgelb watches load-balancing custom resources and converges external
//! appliances (F5 BIG-IP, Citrix NetScaler) to match them.
//!
//! ## Overview
//!
//! - Custom Resource Definitions for pools, URL-routed and layer-4 NAT virtual
//!   servers, and content-switching load balancers
//! - One reconciler per resource kind, driven by a watch-backed informer
//! - Appliance drivers speaking iControl REST and NITRO behind common traits
//! - Singleton operation through a Kubernetes `Lease`
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic for each resource kind
//! - [`drivers`] - Appliance drivers and the driver factory
//! - [`informer`] - Watch stream to add/update/delete notifications
//! - [`supervisor`] - Per-kind task management
//! - [`leader`] - Lease-based leader election
//! - [`naming`] - Deterministic appliance-side names
//! - [`diff`] - Child collection set difference
//! - [`allocator`] - Virtual IP allocation
//!
//! ## Example
//!
//! ```rust
//! use edgelb::crd::{AppExternalNatRule, AppExternalNatSpec, Protocol};
//!
//! let spec = AppExternalNatSpec {
//!     ip: "203.0.113.10".to_string(),
//!     port: 443,
//!     protocol: Protocol::Tcp,
//!     rules: vec![AppExternalNatRule {
//!         host: "www.example.com".to_string(),
//!         pool: "web".to_string(),
//!     }],
//! };
//! assert_eq!(spec.rules.len(), 1);
//! ```

pub mod allocator;
pub mod config;
pub mod constants;
pub mod crd;
pub mod diff;
pub mod drivers;
pub mod errors;
pub mod informer;
pub mod leader;
pub mod metrics;
pub mod naming;
pub mod reconcilers;
pub mod server;
pub mod supervisor;
