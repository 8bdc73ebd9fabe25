// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `ExternalNatPool` reconciliation, plus the pool convergence shared with
//! `AppLoadBalancerPool`.
//!
//! Members are added before stale ones are removed so the pool never drains
//! during a change. The appliance identifies a member by `ip:port`; a weight
//! change therefore arrives as an add (which updates the weight in place) and a
//! removal of the old key, which must be skipped.

use super::{object_key, status_from, EventHandler};
use crate::crd::{ExternalNatPool, LbMethod, PoolMember, ResourceStatus};
use crate::diff::{dedup, diff};
use crate::drivers::{PoolDriver, VirtualServerDriver};
use crate::errors::DriverError;
use crate::naming::{KindPrefix, NameGenerator};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Creates the pool and adds every member in declaration order.
///
/// # Errors
///
/// Returns the first driver error. Members added before it stay in place.
pub async fn converge_pool<D: PoolDriver + ?Sized>(
    driver: &D,
    pool: &str,
    method: Option<LbMethod>,
    members: &[PoolMember],
) -> Result<(), DriverError> {
    driver.create_pool(pool, method.unwrap_or_default()).await?;
    for member in dedup(members) {
        driver.add_member(pool, &member).await?;
    }
    Ok(())
}

/// Applies the difference between two pool specs.
///
/// # Errors
///
/// Returns the first driver error.
pub async fn update_pool<D: PoolDriver + ?Sized>(
    driver: &D,
    pool: &str,
    (old_method, old_members): (Option<LbMethod>, &[PoolMember]),
    (new_method, new_members): (Option<LbMethod>, &[PoolMember]),
) -> Result<(), DriverError> {
    if old_method.unwrap_or_default() != new_method.unwrap_or_default() {
        info!(pool = %pool, method = ?new_method.unwrap_or_default(), "Load balancing method changed");
        driver.create_pool(pool, new_method.unwrap_or_default()).await?;
    }

    for member in &diff(old_members, new_members).added {
        driver.add_member(pool, member).await?;
    }
    prune_members(driver, pool, old_members, new_members).await
}

/// Removes members declared only in `old_members`. A member whose `ip:port`
/// is still declared had its weight changed and is kept.
///
/// # Errors
///
/// Returns the first driver error.
pub async fn prune_members<D: PoolDriver + ?Sized>(
    driver: &D,
    pool: &str,
    old_members: &[PoolMember],
    new_members: &[PoolMember],
) -> Result<(), DriverError> {
    let kept: HashSet<(&str, u16)> = new_members
        .iter()
        .map(|m| (m.ip.as_str(), m.port))
        .collect();
    for member in &diff(old_members, new_members).removed {
        if kept.contains(&(member.ip.as_str(), member.port)) {
            debug!(pool = %pool, member = %member.ip, port = member.port, "Member weight updated in place");
            continue;
        }
        driver.remove_member(pool, member).await?;
    }
    Ok(())
}

/// Reconciles `ExternalNatPool` resources on the NAT appliance.
pub struct ExternalNatPoolHandler {
    driver: Arc<dyn VirtualServerDriver>,
    names: NameGenerator,
}

impl ExternalNatPoolHandler {
    pub fn new(driver: Arc<dyn VirtualServerDriver>, names: NameGenerator) -> Self {
        Self { driver, names }
    }
}

#[async_trait]
impl EventHandler for ExternalNatPoolHandler {
    type Resource = ExternalNatPool;

    fn external_name(&self, obj: &ExternalNatPool) -> String {
        let (namespace, name) = object_key(obj);
        self.names.external_name(KindPrefix::Pool, &namespace, &name)
    }

    async fn on_add(&self, obj: &ExternalNatPool) -> ResourceStatus {
        let pool = self.external_name(obj);
        let result = converge_pool(
            self.driver.as_ref(),
            &pool,
            obj.spec.lb_method,
            &obj.spec.members,
        )
        .await
        .map_err(|e| e.to_string());
        status_from(obj, &pool, result)
    }

    async fn on_update(
        &self,
        old: &ExternalNatPool,
        new: &ExternalNatPool,
    ) -> Option<ResourceStatus> {
        if old.spec == new.spec {
            return None;
        }
        let pool = self.external_name(new);
        let result = update_pool(
            self.driver.as_ref(),
            &pool,
            (old.spec.lb_method, &old.spec.members),
            (new.spec.lb_method, &new.spec.members),
        )
        .await
        .map_err(|e| e.to_string());
        Some(status_from(new, &pool, result))
    }

    async fn on_delete(&self, obj: &ExternalNatPool) -> Result<(), DriverError> {
        let pool = self.external_name(obj);
        info!(pool = %pool, "Deleting pool");
        self.driver.delete_pool(&pool).await
    }

    async fn prune(&self, old: &ExternalNatPool, new: &ExternalNatPool) -> Result<(), DriverError> {
        prune_members(
            self.driver.as_ref(),
            &self.external_name(new),
            &old.spec.members,
            &new.spec.members,
        )
        .await
    }
}
