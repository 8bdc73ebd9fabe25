// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `AppLoadBalancerPool` reconciliation on the content-switching appliance.

use super::pool::{converge_pool, prune_members, update_pool};
use super::{object_key, status_from, EventHandler};
use crate::crd::{AppLoadBalancerPool, ResourceStatus};
use crate::drivers::ContentSwitchDriver;
use crate::errors::DriverError;
use crate::naming::{KindPrefix, NameGenerator};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Reconciles `AppLoadBalancerPool` resources.
pub struct AppLoadBalancerPoolHandler {
    driver: Arc<dyn ContentSwitchDriver>,
    names: NameGenerator,
}

impl AppLoadBalancerPoolHandler {
    pub fn new(driver: Arc<dyn ContentSwitchDriver>, names: NameGenerator) -> Self {
        Self { driver, names }
    }
}

#[async_trait]
impl EventHandler for AppLoadBalancerPoolHandler {
    type Resource = AppLoadBalancerPool;

    fn external_name(&self, obj: &AppLoadBalancerPool) -> String {
        let (namespace, name) = object_key(obj);
        self.names
            .external_name(KindPrefix::ContentSwitchPool, &namespace, &name)
    }

    async fn on_add(&self, obj: &AppLoadBalancerPool) -> ResourceStatus {
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
        old: &AppLoadBalancerPool,
        new: &AppLoadBalancerPool,
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

    async fn on_delete(&self, obj: &AppLoadBalancerPool) -> Result<(), DriverError> {
        let pool = self.external_name(obj);
        info!(pool = %pool, "Deleting content-switching pool");
        self.driver.delete_pool(&pool).await
    }

    async fn prune(
        &self,
        old: &AppLoadBalancerPool,
        new: &AppLoadBalancerPool,
    ) -> Result<(), DriverError> {
        prune_members(
            self.driver.as_ref(),
            &self.external_name(new),
            &old.spec.members,
            &new.spec.members,
        )
        .await
    }
}
