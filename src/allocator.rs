// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Virtual IP allocation for `AppLoadBalancer` resources that omit `spec.ip`.
//!
//! The allocator hands out the lowest free host address of a subnet. Its state
//! is in-memory only; allocations survive restarts because the reconciler writes
//! the effective address to `status.vip` and re-reserves it when the resource is
//! listed again.

use crate::errors::AllocationError;
use ipnetwork::Ipv4Network;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

/// Tracks reserved addresses per subnet, each with the resource holding it.
///
/// Owners are opaque keys; the reconciler uses `namespace/name`.
#[derive(Debug, Default)]
pub struct VipAllocator {
    reserved: HashMap<Ipv4Network, BTreeMap<Ipv4Addr, String>>,
}

impl VipAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the lowest free host address of `subnet` to `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subnet is malformed or has no free addresses.
    pub fn allocate(&mut self, subnet: &str, owner: &str) -> Result<Ipv4Addr, AllocationError> {
        let network = parse_subnet(subnet)?;
        let taken = self.reserved.entry(network).or_default();

        let free = hosts(network).find(|addr| !taken.contains_key(addr));
        match free {
            Some(addr) => {
                taken.insert(addr, owner.to_string());
                Ok(addr)
            }
            None => Err(AllocationError::Exhausted {
                subnet: network.to_string(),
            }),
        }
    }

    /// Marks `address` as held by `owner`. Reserving an address the owner
    /// already holds is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the subnet is malformed, `address` is not one of its
    /// host addresses, or another owner holds it.
    pub fn reserve(
        &mut self,
        subnet: &str,
        address: &str,
        owner: &str,
    ) -> Result<Ipv4Addr, AllocationError> {
        let network = parse_subnet(subnet)?;
        let out_of_subnet = || AllocationError::OutOfSubnet {
            address: address.to_string(),
            subnet: network.to_string(),
        };

        let addr: Ipv4Addr = address.parse().map_err(|_| out_of_subnet())?;
        if !is_host(network, addr) {
            return Err(out_of_subnet());
        }

        let taken = self.reserved.entry(network).or_default();
        match taken.get(&addr) {
            Some(holder) if holder != owner => Err(AllocationError::InUse {
                address: addr.to_string(),
                owner: holder.clone(),
            }),
            Some(_) => Ok(addr),
            None => {
                taken.insert(addr, owner.to_string());
                Ok(addr)
            }
        }
    }

    /// Returns `address` to the free set if `owner` holds it. Returns whether
    /// anything was released.
    pub fn release(&mut self, subnet: &str, address: &str, owner: &str) -> bool {
        let (Ok(network), Ok(addr)) = (parse_subnet(subnet), address.parse::<Ipv4Addr>()) else {
            return false;
        };
        let Some(taken) = self.reserved.get_mut(&network) else {
            return false;
        };
        if taken.get(&addr).is_some_and(|holder| holder == owner) {
            taken.remove(&addr);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn is_reserved(&self, subnet: &str, address: &str) -> bool {
        self.owner(subnet, address).is_some()
    }

    /// The owner holding `address`, if any.
    #[must_use]
    pub fn owner(&self, subnet: &str, address: &str) -> Option<&str> {
        let (Ok(network), Ok(addr)) = (parse_subnet(subnet), address.parse::<Ipv4Addr>()) else {
            return None;
        };
        self.reserved
            .get(&network)
            .and_then(|taken| taken.get(&addr))
            .map(String::as_str)
    }
}

fn parse_subnet(subnet: &str) -> Result<Ipv4Network, AllocationError> {
    let parsed: Ipv4Network = subnet
        .parse()
        .map_err(|e: ipnetwork::IpNetworkError| AllocationError::InvalidSubnet {
            subnet: subnet.to_string(),
            reason: e.to_string(),
        })?;
    // Normalize 10.0.0.7/24 to 10.0.0.0/24 so both spellings share reservations
    Ipv4Network::new(parsed.network(), parsed.prefix()).map_err(|e| {
        AllocationError::InvalidSubnet {
            subnet: subnet.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Usable host addresses of `network`, lowest first.
fn hosts(network: Ipv4Network) -> impl Iterator<Item = Ipv4Addr> {
    network.iter().filter(move |addr| is_host(network, *addr))
}

/// /31 and /32 have no network or broadcast address to skip.
fn is_host(network: Ipv4Network, addr: Ipv4Addr) -> bool {
    if !network.contains(addr) {
        return false;
    }
    network.prefix() >= 31 || (addr != network.network() && addr != network.broadcast())
}

#[cfg(test)]
#[path = "allocator_tests.rs"]
mod allocator_tests;
