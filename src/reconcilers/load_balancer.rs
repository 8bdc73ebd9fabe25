// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `AppLoadBalancer` reconciliation on the content-switching appliance.
//!
//! Each host/path binding becomes one content-switching rule. New bindings are
//! added before stale ones are removed. When `spec.ip` is omitted the virtual
//! IP comes from the [`VipAllocator`]; the address is reported in `status.vip`
//! and re-reserved from there after a restart.

use super::{object_key, EventHandler};
use crate::allocator::VipAllocator;
use crate::constants::EMPTY_PATH_KEY;
use crate::crd::{AppLoadBalancer, HostPath, ResourceStatus};
use crate::diff::{dedup, diff};
use crate::drivers::{ContentRule, ContentSwitchDriver};
use crate::errors::{AllocationError, DriverError};
use crate::naming::{KindPrefix, NameGenerator};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

const ACTION_PREFIX: &str = "CSACT";
const POLICY_PREFIX: &str = "CSPOL";

/// The address held by one `AppLoadBalancer`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Assignment {
    subnet: String,
    vip: String,
}

#[derive(Default)]
struct VipState {
    allocator: VipAllocator,
    assigned: HashMap<String, Assignment>,
}

/// Reconciles `AppLoadBalancer` resources.
pub struct AppLoadBalancerHandler {
    driver: Arc<dyn ContentSwitchDriver>,
    names: NameGenerator,
    vips: Mutex<VipState>,
}

/// Rejects specs that bind the same host and path twice.
///
/// # Errors
///
/// Returns a message naming the first duplicated pair.
pub fn validate_host_paths(host_paths: &[HostPath]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for hp in host_paths {
        let path = hp.path.as_deref().unwrap_or("");
        if !seen.insert((hp.host.to_lowercase(), path.to_string())) {
            return Err(format!(
                "host '{}' with path '{}' is declared more than once",
                hp.host, path
            ));
        }
    }
    Ok(())
}

impl AppLoadBalancerHandler {
    pub fn new(driver: Arc<dyn ContentSwitchDriver>, names: NameGenerator) -> Self {
        Self {
            driver,
            names,
            vips: Mutex::new(VipState::default()),
        }
    }

    /// The virtual IP currently held by `namespace/name`, if any.
    #[must_use]
    pub fn assigned_vip(&self, namespace: &str, name: &str) -> Option<String> {
        self.vips
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .assigned
            .get(&format!("{namespace}/{name}"))
            .map(|a| a.vip.clone())
    }

    /// True if `address` is reserved in `subnet`.
    #[must_use]
    pub fn is_reserved(&self, subnet: &str, address: &str) -> bool {
        self.vips
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocator
            .is_reserved(subnet, address)
    }

    /// The address held for `obj` in memory or recorded in its status.
    fn held_vip(&self, obj: &AppLoadBalancer) -> Option<String> {
        let (namespace, name) = object_key(obj);
        self.assigned_vip(&namespace, &name)
            .or_else(|| obj.status.as_ref().and_then(|s| s.vip.clone()))
    }

    fn listener_change(
        old: &AppLoadBalancer,
        new: &AppLoadBalancer,
        held: Option<&str>,
    ) -> Option<String> {
        ((&old.spec.ip, old.spec.port, &old.spec.subnet)
            != (&new.spec.ip, new.spec.port, &new.spec.subnet))
            .then(|| {
                format!(
                    "virtual server address, port and subnet cannot be changed in place (was {}:{} in {}); delete and recreate the resource",
                    held.unwrap_or("unassigned"),
                    old.spec.port,
                    old.spec.subnet
                )
            })
    }

    fn rule(&self, obj: &AppLoadBalancer, lb: &str, hp: &HostPath) -> ContentRule {
        let (namespace, _) = object_key(obj);
        let pool = self
            .names
            .external_name(KindPrefix::ContentSwitchPool, &namespace, &hp.pool);
        let parts = [
            hp.host.as_str(),
            hp.path.as_deref().unwrap_or(EMPTY_PATH_KEY),
            pool.as_str(),
        ];
        ContentRule {
            host: hp.host.clone(),
            path: hp.path.clone(),
            action_name: self.names.route_object_name(ACTION_PREFIX, lb, &parts),
            policy_name: self.names.route_object_name(POLICY_PREFIX, lb, &parts),
            pool,
        }
    }

    /// Picks the virtual IP: the declared one, the one already held, the one
    /// recorded in status, or a fresh allocation, in that order. An address
    /// held by another `AppLoadBalancer` is never shared.
    fn resolve_vip(&self, obj: &AppLoadBalancer) -> Result<String, String> {
        let (namespace, name) = object_key(obj);
        let key = format!("{namespace}/{name}");
        let subnet = &obj.spec.subnet;
        let mut state = self.vips.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(ip) = obj.spec.ip.as_deref().filter(|ip| !ip.is_empty()) {
            let vip = state
                .allocator
                .reserve(subnet, ip, &key)
                .map_err(|e| e.to_string())?
                .to_string();
            state.assigned.insert(
                key,
                Assignment {
                    subnet: subnet.clone(),
                    vip: vip.clone(),
                },
            );
            return Ok(vip);
        }

        if let Some(held) = state.assigned.get(&key) {
            if &held.subnet == subnet {
                return Ok(held.vip.clone());
            }
        }

        let recorded = obj.status.as_ref().and_then(|s| s.vip.clone());
        let vip = match recorded {
            Some(recorded) => match state.allocator.reserve(subnet, &recorded, &key) {
                Ok(addr) => addr.to_string(),
                // The appliance object still listens on the recorded address
                Err(e @ AllocationError::InUse { .. }) => return Err(e.to_string()),
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        name = %name,
                        vip = %recorded,
                        error = %e,
                        "Recorded virtual IP is no longer usable, allocating a new one"
                    );
                    state
                        .allocator
                        .allocate(subnet, &key)
                        .map_err(|e| e.to_string())?
                        .to_string()
                }
            },
            None => state
                .allocator
                .allocate(subnet, &key)
                .map_err(|e| e.to_string())?
                .to_string(),
        };
        info!(namespace = %namespace, name = %name, vip = %vip, subnet = %subnet, "Assigned virtual IP");
        state.assigned.insert(
            key,
            Assignment {
                subnet: subnet.clone(),
                vip: vip.clone(),
            },
        );
        Ok(vip)
    }

    fn release_vip(&self, obj: &AppLoadBalancer) {
        let (namespace, name) = object_key(obj);
        let key = format!("{namespace}/{name}");
        let mut state = self.vips.lock().unwrap_or_else(PoisonError::into_inner);

        let assignment = state.assigned.remove(&key).or_else(|| {
            obj.spec
                .ip
                .clone()
                .or_else(|| obj.status.as_ref().and_then(|s| s.vip.clone()))
                .map(|vip| Assignment {
                    subnet: obj.spec.subnet.clone(),
                    vip,
                })
        });
        if let Some(a) = assignment {
            if state.allocator.release(&a.subnet, &a.vip, &key) {
                info!(namespace = %namespace, name = %name, vip = %a.vip, "Released virtual IP");
            }
        }
    }

    async fn converge(&self, obj: &AppLoadBalancer, lb: &str, vip: &str) -> Result<(), String> {
        let host_paths = dedup(&obj.spec.host_paths());
        self.driver
            .create_lb(lb, vip, obj.spec.port)
            .await
            .map_err(|e| e.to_string())?;
        for hp in &host_paths {
            self.driver
                .add_rule(lb, &self.rule(obj, lb, hp))
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn apply_delta(
        &self,
        old: &AppLoadBalancer,
        new: &AppLoadBalancer,
        lb: &str,
    ) -> Result<(), DriverError> {
        for hp in &diff(&old.spec.host_paths(), &new.spec.host_paths()).added {
            self.driver.add_rule(lb, &self.rule(new, lb, hp)).await?;
        }
        self.remove_stale_rules(old, new, lb).await
    }

    async fn remove_stale_rules(
        &self,
        old: &AppLoadBalancer,
        new: &AppLoadBalancer,
        lb: &str,
    ) -> Result<(), DriverError> {
        for hp in &diff(&old.spec.host_paths(), &new.spec.host_paths()).removed {
            self.driver.remove_rule(lb, &self.rule(old, lb, hp)).await?;
        }
        Ok(())
    }

    fn finish(
        &self,
        obj: &AppLoadBalancer,
        lb: &str,
        vip: Option<String>,
        result: Result<(), String>,
    ) -> ResourceStatus {
        let status = super::status_from(obj, lb, result);
        match vip {
            Some(vip) => status.with_vip(vip),
            None => status,
        }
    }
}

#[async_trait]
impl EventHandler for AppLoadBalancerHandler {
    type Resource = AppLoadBalancer;

    fn external_name(&self, obj: &AppLoadBalancer) -> String {
        let (namespace, name) = object_key(obj);
        self.names
            .external_name(KindPrefix::ContentSwitchLb, &namespace, &name)
    }

    /// Listener fields only become fixed once an address is held. Before that
    /// the virtual server was never created and a corrected `spec.ip` is fine.
    fn immutable_change(&self, old: &AppLoadBalancer, new: &AppLoadBalancer) -> Option<String> {
        let held = self.held_vip(old)?;
        Self::listener_change(old, new, Some(&held))
    }

    async fn on_add(&self, obj: &AppLoadBalancer) -> ResourceStatus {
        let lb = self.external_name(obj);
        if let Err(message) = validate_host_paths(&obj.spec.host_paths()) {
            return self.finish(obj, &lb, None, Err(message));
        }
        let vip = match self.resolve_vip(obj) {
            Ok(vip) => vip,
            Err(message) => return self.finish(obj, &lb, None, Err(message)),
        };
        let result = self.converge(obj, &lb, &vip).await;
        self.finish(obj, &lb, Some(vip), result)
    }

    async fn on_update(
        &self,
        old: &AppLoadBalancer,
        new: &AppLoadBalancer,
    ) -> Option<ResourceStatus> {
        if old.spec == new.spec {
            return None;
        }
        let lb = self.external_name(new);
        let held = self.held_vip(new);

        if let Err(message) = validate_host_paths(&new.spec.host_paths()) {
            return Some(self.finish(new, &lb, held, Err(message)));
        }
        if let Some(message) = Self::listener_change(old, new, held.as_deref()) {
            return Some(self.finish(new, &lb, held, Err(message)));
        }

        let vip = match self.resolve_vip(new) {
            Ok(vip) => vip,
            Err(message) => return Some(self.finish(new, &lb, held, Err(message))),
        };
        let result = self
            .apply_delta(old, new, &lb)
            .await
            .map_err(|e| e.to_string());
        Some(self.finish(new, &lb, Some(vip), result))
    }

    async fn on_delete(&self, obj: &AppLoadBalancer) -> Result<(), DriverError> {
        let lb = self.external_name(obj);
        info!(lb = %lb, "Deleting content-switching virtual server");

        let mut first_error = None;
        for hp in dedup(&obj.spec.host_paths()) {
            if let Err(e) = self.driver.remove_rule(&lb, &self.rule(obj, &lb, &hp)).await {
                warn!(lb = %lb, host = %hp.host, error = %e, "Failed to remove content-switching rule");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.driver.delete_lb(&lb).await {
            error!(lb = %lb, error = %e, "Failed to delete content-switching virtual server");
            first_error.get_or_insert(e);
        }
        self.release_vip(obj);
        first_error.map_or(Ok(()), Err)
    }

    async fn prune(&self, old: &AppLoadBalancer, new: &AppLoadBalancer) -> Result<(), DriverError> {
        self.remove_stale_rules(old, new, &self.external_name(new)).await
    }
}
