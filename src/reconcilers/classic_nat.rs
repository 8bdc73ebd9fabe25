// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `ClassicExternalNat` reconciliation: a layer-4 virtual server bound
//! directly to its backend pools.

use super::app_nat::listener_change;
use super::{object_key, status_from, EventHandler};
use crate::crd::{ClassicExternalNat, ResourceStatus};
use crate::diff::{dedup, diff};
use crate::drivers::{VirtualServerDriver, VirtualServerKind};
use crate::errors::DriverError;
use crate::naming::{KindPrefix, NameGenerator};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Reconciles `ClassicExternalNat` resources on the NAT appliance.
pub struct ClassicExternalNatHandler {
    driver: Arc<dyn VirtualServerDriver>,
    names: NameGenerator,
}

impl ClassicExternalNatHandler {
    pub fn new(driver: Arc<dyn VirtualServerDriver>, names: NameGenerator) -> Self {
        Self { driver, names }
    }

    fn pool_name(&self, obj: &ClassicExternalNat, pool: &str) -> String {
        let (namespace, _) = object_key(obj);
        self.names.external_name(KindPrefix::Pool, &namespace, pool)
    }

    async fn converge(&self, obj: &ClassicExternalNat, server: &str) -> Result<(), DriverError> {
        self.driver
            .create_virtual_server(
                VirtualServerKind::Nat,
                server,
                &obj.spec.ip,
                obj.spec.port,
                obj.spec.protocol,
            )
            .await?;
        for backend in dedup(&obj.spec.backends) {
            self.driver
                .bind_pool(server, &self.pool_name(obj, &backend.pool_name))
                .await?;
        }
        Ok(())
    }

    async fn unbind_removed(
        &self,
        old: &ClassicExternalNat,
        new: &ClassicExternalNat,
        server: &str,
    ) -> Result<(), DriverError> {
        for backend in &diff(&old.spec.backends, &new.spec.backends).removed {
            self.driver
                .unbind_pool(server, &self.pool_name(old, &backend.pool_name))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ClassicExternalNatHandler {
    type Resource = ClassicExternalNat;

    fn external_name(&self, obj: &ClassicExternalNat) -> String {
        let (namespace, name) = object_key(obj);
        self.names
            .external_name(KindPrefix::ClassicNat, &namespace, &name)
    }

    fn immutable_change(&self, old: &ClassicExternalNat, new: &ClassicExternalNat) -> Option<String> {
        listener_change(
            (old.spec.ip.as_str(), old.spec.port, old.spec.protocol),
            (new.spec.ip.as_str(), new.spec.port, new.spec.protocol),
        )
    }

    async fn on_add(&self, obj: &ClassicExternalNat) -> ResourceStatus {
        let server = self.external_name(obj);
        let result = self.converge(obj, &server).await.map_err(|e| e.to_string());
        status_from(obj, &server, result)
    }

    async fn on_update(
        &self,
        old: &ClassicExternalNat,
        new: &ClassicExternalNat,
    ) -> Option<ResourceStatus> {
        if old.spec == new.spec {
            return None;
        }
        let server = self.external_name(new);
        if let Some(message) = self.immutable_change(old, new) {
            return Some(status_from(new, &server, Err(message)));
        }

        // The appliance has one default pool slot, so the old binding goes first
        let mut result = self.unbind_removed(old, new, &server).await;
        if result.is_ok() {
            for backend in &diff(&old.spec.backends, &new.spec.backends).added {
                result = self
                    .driver
                    .bind_pool(&server, &self.pool_name(new, &backend.pool_name))
                    .await;
                if result.is_err() {
                    break;
                }
            }
        }
        Some(status_from(new, &server, result.map_err(|e| e.to_string())))
    }

    async fn on_delete(&self, obj: &ClassicExternalNat) -> Result<(), DriverError> {
        let server = self.external_name(obj);
        info!(virtual_server = %server, "Deleting layer-4 virtual server");

        let mut first_error = None;
        for backend in dedup(&obj.spec.backends) {
            let pool = self.pool_name(obj, &backend.pool_name);
            if let Err(e) = self.driver.unbind_pool(&server, &pool).await {
                warn!(virtual_server = %server, pool = %pool, error = %e, "Failed to unbind pool");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.driver.delete_virtual_server(&server).await {
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn prune(&self, old: &ClassicExternalNat, new: &ClassicExternalNat) -> Result<(), DriverError> {
        self.unbind_removed(old, new, &self.external_name(new)).await
    }
}
