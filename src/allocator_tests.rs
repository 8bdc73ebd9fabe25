// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `allocator.rs`

use super::*;

#[test]
fn test_allocates_lowest_host_address() {
    let mut allocator = VipAllocator::new();
    assert_eq!(
        allocator.allocate("192.0.2.0/24", "shop/a").unwrap(),
        Ipv4Addr::new(192, 0, 2, 1)
    );
    assert_eq!(
        allocator.allocate("192.0.2.0/24", "shop/a").unwrap(),
        Ipv4Addr::new(192, 0, 2, 2)
    );
}

#[test]
fn test_reserved_addresses_are_skipped() {
    let mut allocator = VipAllocator::new();
    allocator.reserve("192.0.2.0/24", "192.0.2.1", "shop/a").unwrap();
    allocator.reserve("192.0.2.0/24", "192.0.2.2", "shop/a").unwrap();

    assert_eq!(
        allocator.allocate("192.0.2.0/24", "shop/a").unwrap(),
        Ipv4Addr::new(192, 0, 2, 3)
    );
}

#[test]
fn test_release_makes_address_reusable() {
    let mut allocator = VipAllocator::new();
    let first = allocator.allocate("192.0.2.0/24", "shop/a").unwrap();
    let _second = allocator.allocate("192.0.2.0/24", "shop/a").unwrap();

    assert!(allocator.release("192.0.2.0/24", &first.to_string(), "shop/a"));

    assert!(!allocator.is_reserved("192.0.2.0/24", &first.to_string()));
    assert_eq!(allocator.allocate("192.0.2.0/24", "shop/a").unwrap(), first);
}

#[test]
fn test_exhausted_subnet() {
    let mut allocator = VipAllocator::new();
    // /30 has two host addresses
    allocator.allocate("192.0.2.0/30", "shop/a").unwrap();
    allocator.allocate("192.0.2.0/30", "shop/a").unwrap();

    let err = allocator.allocate("192.0.2.0/30", "shop/a").unwrap_err();
    assert_eq!(
        err,
        AllocationError::Exhausted {
            subnet: "192.0.2.0/30".to_string()
        }
    );
}

#[test]
fn test_non_canonical_subnet_shares_reservations() {
    let mut allocator = VipAllocator::new();
    allocator.reserve("192.0.2.0/24", "192.0.2.1", "shop/a").unwrap();
    assert!(allocator.is_reserved("192.0.2.77/24", "192.0.2.1"));
    assert_eq!(
        allocator.allocate("192.0.2.77/24", "shop/a").unwrap(),
        Ipv4Addr::new(192, 0, 2, 2)
    );
}

#[test]
fn test_reserve_rejects_addresses_outside_subnet() {
    let mut allocator = VipAllocator::new();
    assert!(matches!(
        allocator.reserve("192.0.2.0/24", "198.51.100.1", "shop/a"),
        Err(AllocationError::OutOfSubnet { .. })
    ));
    assert!(matches!(
        allocator.reserve("192.0.2.0/24", "192.0.2.0", "shop/a"),
        Err(AllocationError::OutOfSubnet { .. })
    ));
    assert!(matches!(
        allocator.reserve("192.0.2.0/24", "not-an-ip", "shop/a"),
        Err(AllocationError::OutOfSubnet { .. })
    ));
}

#[test]
fn test_invalid_subnet() {
    let mut allocator = VipAllocator::new();
    assert!(matches!(
        allocator.allocate("192.0.2.0/40", "shop/a"),
        Err(AllocationError::InvalidSubnet { .. })
    ));
    assert!(matches!(
        allocator.allocate("garbage", "shop/a"),
        Err(AllocationError::InvalidSubnet { .. })
    ));
}

#[test]
fn test_point_to_point_subnet_uses_both_addresses() {
    let mut allocator = VipAllocator::new();
    assert_eq!(
        allocator.allocate("192.0.2.8/31", "shop/a").unwrap(),
        Ipv4Addr::new(192, 0, 2, 8)
    );
    assert_eq!(
        allocator.allocate("192.0.2.8/31", "shop/a").unwrap(),
        Ipv4Addr::new(192, 0, 2, 9)
    );
}

#[test]
fn test_reserve_is_idempotent() {
    let mut allocator = VipAllocator::new();
    allocator.reserve("192.0.2.0/29", "192.0.2.3", "shop/a").unwrap();
    allocator.reserve("192.0.2.0/29", "192.0.2.3", "shop/a").unwrap();
    assert!(allocator.release("192.0.2.0/29", "192.0.2.3", "shop/a"));
    assert!(!allocator.is_reserved("192.0.2.0/29", "192.0.2.3"));
}

#[test]
fn test_reserve_rejects_address_held_by_another_owner() {
    let mut allocator = VipAllocator::new();
    let taken = allocator.allocate("192.0.2.0/24", "shop/auto").unwrap();

    let err = allocator
        .reserve("192.0.2.0/24", &taken.to_string(), "shop/fixed")
        .unwrap_err();

    assert_eq!(
        err,
        AllocationError::InUse {
            address: "192.0.2.1".to_string(),
            owner: "shop/auto".to_string(),
        }
    );
    assert_eq!(allocator.owner("192.0.2.0/24", "192.0.2.1"), Some("shop/auto"));
}

#[test]
fn test_release_by_another_owner_keeps_reservation() {
    let mut allocator = VipAllocator::new();
    allocator.reserve("192.0.2.0/24", "192.0.2.1", "shop/auto").unwrap();

    assert!(!allocator.release("192.0.2.0/24", "192.0.2.1", "shop/fixed"));
    assert!(allocator.is_reserved("192.0.2.0/24", "192.0.2.1"));
    assert_eq!(
        allocator.allocate("192.0.2.0/24", "shop/third").unwrap(),
        Ipv4Addr::new(192, 0, 2, 2)
    );
}
