// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for appliance operations, address allocation, and configuration.
//!
//! This module provides:
//! - [`DriverError`] - a failed call against an appliance management API
//! - [`AllocationError`] - virtual IP allocation failures
//! - [`ConfigError`] - invalid operator configuration detected at startup
//!
//! Reconcilers convert the first [`DriverError`] of a handler into an `Error`
//! status whose message is the error's `Display` output, so the messages below
//! are what users read on their resources.

use thiserror::Error;

/// Errors returned by appliance drivers.
///
/// "Already exists" on create and "not found" on delete never surface as a
/// `DriverError`; drivers report them as success.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// The appliance answered with a non-success HTTP status
    ///
    /// `body` is the raw response body, which usually carries the appliance's
    /// own error message.
    #[error("{operation} failed (HTTP {status}): {body}")]
    Http {
        /// Appliance operation that failed, e.g. `create pool POOL_shop__web__1a2b3c4d`
        operation: String,
        /// HTTP status code returned by the appliance
        status: u16,
        /// Response body
        body: String,
    },

    /// The request never produced an HTTP response
    ///
    /// Connection refused, TLS handshake failure, DNS resolution failure, or timeout.
    #[error("{operation} failed: {reason}")]
    Transport {
        /// Appliance operation that failed
        operation: String,
        /// Underlying transport error
        reason: String,
    },

    /// The driver does not implement the requested operation family
    #[error("operation '{operation}' is not supported by the {appliance} driver")]
    Unsupported {
        /// Operation that was requested
        operation: String,
        /// Appliance type of the driver
        appliance: String,
    },

    /// The appliance returned a response the driver could not interpret
    #[error("{operation} returned an invalid response: {reason}")]
    InvalidResponse {
        /// Appliance operation whose response was invalid
        operation: String,
        /// What was wrong with the response
        reason: String,
    },
}

impl DriverError {
    /// Returns the HTTP status code if this error came from an HTTP response.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short label used as the `outcome` metric dimension.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http_error",
            Self::Transport { .. } => "transport_error",
            Self::Unsupported { .. } => "unsupported",
            Self::InvalidResponse { .. } => "invalid_response",
        }
    }
}

/// Errors from the virtual IP allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// The subnet string is not a valid IPv4 CIDR
    #[error("invalid subnet '{subnet}': {reason}")]
    InvalidSubnet {
        /// The subnet as declared on the resource
        subnet: String,
        /// Parser error
        reason: String,
    },

    /// Every host address of the subnet is already reserved
    #[error("subnet {subnet} has no free addresses")]
    Exhausted {
        /// The exhausted subnet
        subnet: String,
    },

    /// A requested address is not a valid IPv4 address or lies outside the subnet
    #[error("address '{address}' is not a host address of subnet {subnet}")]
    OutOfSubnet {
        /// Requested address
        address: String,
        /// Subnet it was checked against
        subnet: String,
    },

    /// The address is already held by another resource
    #[error("address {address} is already assigned to {owner}")]
    InUse {
        /// Requested address
        address: String,
        /// `namespace/name` of the current holder
        owner: String,
    },
}

/// Configuration errors detected before any controller starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is missing
    #[error("missing required setting: {0}")]
    Missing(String),

    /// A setting has an unusable value
    #[error("invalid value for {setting}: {reason}")]
    Invalid {
        /// Flag name of the setting
        setting: String,
        /// Why the value was rejected
        reason: String,
    },
}
