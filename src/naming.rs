// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deterministic appliance-side names for Kubernetes resources.
//!
//! Every object edgelb creates on an appliance is named from the owning
//! resource's kind, namespace and name, plus a salt derived from the control
//! plane's address. The salt keeps two clusters sharing one appliance from
//! overwriting each other's objects.
//!
//! # Format
//!
//! ```text
//! {PREFIX}_{namespace}__{name}__{salt}
//! ```
//!
//! Appliances accept only a restricted character set, so namespace and name are
//! escaped: alphanumerics pass through, `-` becomes `_1`, `.` becomes `_2`, `_`
//! becomes `_3`, and anything else becomes `_0`. Every underscore produced by
//! escaping is followed by a digit, so the `__` separator cannot appear inside a
//! field and the mapping is injective over Kubernetes names.
//!
//! # Length
//!
//! NetScaler rejects object names longer than [`MAX_EXTERNAL_NAME_LEN`]
//! characters. Escaping can double a field, so a long namespace and name may
//! exceed it. Such names are cut and end in `_` plus a hash of the full name.
//! A shortened name is exactly [`MAX_EXTERNAL_NAME_LEN`] characters and has hex
//! where an unshortened one has the `__` before its salt, so the two forms never
//! meet.
//!
//! # Example
//!
//! ```rust
//! use edgelb::naming::{KindPrefix, NameGenerator};
//!
//! let names = NameGenerator::new("10.96.0.1");
//! let pool = names.external_name(KindPrefix::Pool, "shop", "web-v2");
//! assert!(pool.starts_with("POOL_shop__web_1v2__"));
//! assert_eq!(pool, names.external_name(KindPrefix::Pool, "shop", "web-v2"));
//! ```

use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters of the salt appended to external names.
const SALT_LEN: usize = 8;

/// Number of hex characters of the hash used in route object names.
const ROUTE_HASH_LEN: usize = 16;

/// Longest object name accepted by every supported appliance.
pub const MAX_EXTERNAL_NAME_LEN: usize = 127;

/// Number of hex characters of the hash ending a shortened external name.
const NAME_HASH_LEN: usize = 16;

/// Kind prefix of an external name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KindPrefix {
    /// `ExternalNatPool`
    Pool,
    /// `AppExternalNat`
    AppNat,
    /// `ClassicExternalNat`
    ClassicNat,
    /// `AppLoadBalancer`
    ContentSwitchLb,
    /// `AppLoadBalancerPool`
    ContentSwitchPool,
}

impl KindPrefix {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pool => "POOL",
            Self::AppNat => "ANAT",
            Self::ClassicNat => "CNAT",
            Self::ContentSwitchLb => "CSLB",
            Self::ContentSwitchPool => "CSPOOL",
        }
    }
}

impl fmt::Display for KindPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generates external names with a salt computed once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameGenerator {
    salt: String,
}

impl NameGenerator {
    /// Creates a generator whose salt is derived from `identity_source`
    /// (the control plane address).
    #[must_use]
    pub fn new(identity_source: &str) -> Self {
        let mut salt = sha256_hex(identity_source.as_bytes());
        salt.truncate(SALT_LEN);
        Self { salt }
    }

    #[must_use]
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Returns the appliance-side name of a resource.
    ///
    /// Pure and deterministic: equal inputs always produce the same output,
    /// the output only contains `[A-Za-z0-9_]`, and it is never longer than
    /// [`MAX_EXTERNAL_NAME_LEN`].
    #[must_use]
    pub fn external_name(&self, prefix: KindPrefix, namespace: &str, name: &str) -> String {
        let full = format!(
            "{}_{}__{}__{}",
            prefix.as_str(),
            escape(namespace),
            escape(name),
            self.salt
        );
        if full.len() <= MAX_EXTERNAL_NAME_LEN {
            return full;
        }
        let digest = sha256_hex(full.as_bytes());
        // The escaped form is ASCII, so any byte index is a char boundary
        let keep = MAX_EXTERNAL_NAME_LEN - NAME_HASH_LEN - 1;
        format!("{}_{}", &full[..keep], &digest[..NAME_HASH_LEN])
    }

    /// Returns the name of an appliance-side route object (an iRule, or a
    /// content-switching policy/action) belonging to `owner`.
    ///
    /// The name is derived from a hash of the owner and the tuple that defines
    /// the route, so the same route always maps to the same object and two
    /// routes of one owner never share a name.
    #[must_use]
    pub fn route_object_name(&self, prefix: &str, owner: &str, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(owner.as_bytes());
        for part in parts {
            // NUL cannot appear in any field, so the encoding is unambiguous
            hasher.update([0u8]);
            hasher.update(part.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        format!("{prefix}_{}", &digest[..ROUTE_HASH_LEN])
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            c if c.is_ascii_alphanumeric() => out.push(c),
            '-' => out.push_str("_1"),
            '.' => out.push_str("_2"),
            '_' => out.push_str("_3"),
            _ => out.push_str("_0"),
        }
    }
    out
}

#[cfg(test)]
#[path = "naming_tests.rs"]
mod naming_tests;
