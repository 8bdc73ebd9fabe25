// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `AppExternalNat` reconciliation.
//!
//! An `AppExternalNat` becomes a URL-routed virtual server with one route per
//! rule. Rules are removed before new ones are bound, so a host moving from
//! one pool to another is never routed twice.

use super::{object_key, status_from, EventHandler};
use crate::crd::{AppExternalNat, AppExternalNatRule, Protocol, ResourceStatus};
use crate::diff::{dedup, diff};
use crate::drivers::{Route, VirtualServerDriver, VirtualServerKind};
use crate::errors::DriverError;
use crate::naming::{KindPrefix, NameGenerator};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Prefix of route object names.
const ROUTE_PREFIX: &str = "RT";

/// Reconciles `AppExternalNat` resources on the NAT appliance.
pub struct AppExternalNatHandler {
    driver: Arc<dyn VirtualServerDriver>,
    names: NameGenerator,
}

/// Rejects rule sets that route one host to two pools.
///
/// # Errors
///
/// Returns a message naming the first duplicated host.
pub fn validate_rules(rules: &[AppExternalNatRule]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for rule in dedup(rules) {
        if !seen.insert(rule.host.to_lowercase()) {
            return Err(format!(
                "host '{}' is routed to more than one pool",
                rule.host
            ));
        }
    }
    Ok(())
}

/// Reports a change of address, port or protocol, which cannot be applied to an
/// existing virtual server.
pub fn listener_change(
    (old_ip, old_port, old_protocol): (&str, u16, Protocol),
    (new_ip, new_port, new_protocol): (&str, u16, Protocol),
) -> Option<String> {
    ((old_ip, old_port, old_protocol) != (new_ip, new_port, new_protocol)).then(|| {
        format!(
            "listener {old_ip}:{old_port}/{old_protocol} cannot be changed in place; delete and recreate the resource"
        )
    })
}

impl AppExternalNatHandler {
    pub fn new(driver: Arc<dyn VirtualServerDriver>, names: NameGenerator) -> Self {
        Self { driver, names }
    }

    fn route(&self, obj: &AppExternalNat, server: &str, rule: &AppExternalNatRule) -> Route {
        let (namespace, _) = object_key(obj);
        let pool = self
            .names
            .external_name(KindPrefix::Pool, &namespace, &rule.pool);
        Route {
            name: self
                .names
                .route_object_name(ROUTE_PREFIX, server, &[&rule.host, &pool]),
            host: rule.host.clone(),
            path: None,
            pool,
        }
    }

    async fn converge(&self, obj: &AppExternalNat, server: &str) -> Result<(), String> {
        validate_rules(&obj.spec.rules)?;
        self.driver
            .create_virtual_server(
                VirtualServerKind::UrlRouted,
                server,
                &obj.spec.ip,
                obj.spec.port,
                obj.spec.protocol,
            )
            .await
            .map_err(|e| e.to_string())?;
        for rule in dedup(&obj.spec.rules) {
            let route = self.route(obj, server, &rule);
            self.driver
                .bind_route(server, &route)
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn apply_delta(
        &self,
        old: &AppExternalNat,
        new: &AppExternalNat,
        server: &str,
    ) -> Result<(), String> {
        validate_rules(&new.spec.rules)?;
        if let Some(message) = self.immutable_change(old, new) {
            return Err(message);
        }

        self.unbind_removed(old, new, server)
            .await
            .map_err(|e| e.to_string())?;
        for rule in &diff(&old.spec.rules, &new.spec.rules).added {
            let route = self.route(new, server, rule);
            self.driver
                .bind_route(server, &route)
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn unbind_removed(
        &self,
        old: &AppExternalNat,
        new: &AppExternalNat,
        server: &str,
    ) -> Result<(), DriverError> {
        for rule in &diff(&old.spec.rules, &new.spec.rules).removed {
            let route = self.route(old, server, rule);
            self.driver.unbind_route(server, &route).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for AppExternalNatHandler {
    type Resource = AppExternalNat;

    fn external_name(&self, obj: &AppExternalNat) -> String {
        let (namespace, name) = object_key(obj);
        self.names.external_name(KindPrefix::AppNat, &namespace, &name)
    }

    fn immutable_change(&self, old: &AppExternalNat, new: &AppExternalNat) -> Option<String> {
        listener_change(
            (old.spec.ip.as_str(), old.spec.port, old.spec.protocol),
            (new.spec.ip.as_str(), new.spec.port, new.spec.protocol),
        )
    }

    async fn on_add(&self, obj: &AppExternalNat) -> ResourceStatus {
        let server = self.external_name(obj);
        let result = self.converge(obj, &server).await;
        status_from(obj, &server, result)
    }

    async fn on_update(
        &self,
        old: &AppExternalNat,
        new: &AppExternalNat,
    ) -> Option<ResourceStatus> {
        if old.spec == new.spec {
            return None;
        }
        let server = self.external_name(new);
        let result = self.apply_delta(old, new, &server).await;
        Some(status_from(new, &server, result))
    }

    async fn on_delete(&self, obj: &AppExternalNat) -> Result<(), DriverError> {
        let server = self.external_name(obj);
        info!(virtual_server = %server, rules = obj.spec.rules.len(), "Deleting URL-routed virtual server");

        let mut first_error = None;
        for rule in dedup(&obj.spec.rules) {
            let route = self.route(obj, &server, &rule);
            if let Err(e) = self.driver.unbind_route(&server, &route).await {
                warn!(virtual_server = %server, host = %rule.host, error = %e, "Failed to unbind route");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.driver.delete_virtual_server(&server).await {
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn prune(&self, old: &AppExternalNat, new: &AppExternalNat) -> Result<(), DriverError> {
        self.unbind_removed(old, new, &self.external_name(new)).await
    }
}
