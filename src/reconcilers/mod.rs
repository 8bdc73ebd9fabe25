// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconcilers that converge appliances to the declared resources.
//!
//! Each resource kind has one [`EventHandler`]. A [`Reconciler`] wraps the
//! handler, receives notifications from the informer one at a time, records
//! metrics, and writes the returned status back to the resource.
//!
//! # Handler contract
//!
//! - **add**: create the top-level appliance object, then bind children in
//!   declaration order. The first failure stops the handler and is reported as
//!   an `Error` status; nothing is rolled back.
//! - **update**: a no-op when `.spec` is unchanged. Otherwise only the child
//!   delta is applied. Listener fields (address, port, protocol, subnet) cannot
//!   change in place and are reported as `Error`.
//! - **recover**: an update of a resource that never became `Available`. The
//!   children of its failed add may be missing, so add runs on the new snapshot
//!   and then children declared only by the old one are pruned.
//! - **delete**: unbind every child, then delete the top-level object.
//! - **resync**: resources that are not `Available` are retried through add.
//!
//! # Available Reconcilers
//!
//! - [`pool::ExternalNatPoolHandler`] - NAT appliance pools
//! - [`app_nat::AppExternalNatHandler`] - URL-routed virtual servers
//! - [`classic_nat::ClassicExternalNatHandler`] - layer-4 virtual servers
//! - [`load_balancer::AppLoadBalancerHandler`] - content-switching virtual servers
//! - [`lb_pool::AppLoadBalancerPoolHandler`] - content-switching pools

pub mod app_nat;
pub mod classic_nat;
pub mod lb_pool;
pub mod load_balancer;
pub mod pool;
pub mod status;

#[cfg(test)]
mod app_nat_tests;
#[cfg(test)]
mod lb_pool_tests;
#[cfg(test)]
mod load_balancer_tests;

pub use app_nat::AppExternalNatHandler;
pub use classic_nat::ClassicExternalNatHandler;
pub use lb_pool::AppLoadBalancerPoolHandler;
pub use load_balancer::AppLoadBalancerHandler;
pub use pool::ExternalNatPoolHandler;

use crate::crd::{ManagedResource, ResourceState, ResourceStatus};
use crate::errors::DriverError;
use crate::informer::{Notification, NotificationSink};
use crate::metrics;
use async_trait::async_trait;
use kube::{Client, ResourceExt};
use std::time::Instant;
use tracing::{debug, error, info};

/// Per-kind reconciliation logic.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Resource: ManagedResource;

    /// Name of the top-level appliance object for `obj`.
    fn external_name(&self, obj: &Self::Resource) -> String;

    /// Converges a newly seen resource. Must be idempotent.
    async fn on_add(&self, obj: &Self::Resource) -> ResourceStatus;

    /// Applies the difference between two snapshots. Returns `None` when
    /// nothing relevant changed.
    async fn on_update(
        &self,
        old: &Self::Resource,
        new: &Self::Resource,
    ) -> Option<ResourceStatus>;

    /// Removes everything the resource created on the appliance.
    ///
    /// # Errors
    ///
    /// Returns the first driver error; remaining cleanup steps still run.
    async fn on_delete(&self, obj: &Self::Resource) -> Result<(), DriverError>;

    /// Removes the children declared by `old` but not by `new`.
    ///
    /// # Errors
    ///
    /// Returns the first driver error.
    async fn prune(&self, old: &Self::Resource, new: &Self::Resource) -> Result<(), DriverError>;

    /// Describes a listener change that cannot be applied in place, if any.
    fn immutable_change(&self, _old: &Self::Resource, _new: &Self::Resource) -> Option<String> {
        None
    }

    /// Converges `new` after an update whose `old` snapshot never became
    /// `Available`.
    async fn on_recover(&self, old: &Self::Resource, new: &Self::Resource) -> ResourceStatus {
        let name = self.external_name(new);
        let held = new.resource_status().and_then(|s| s.vip.clone());
        if let Some(message) = self.immutable_change(old, new) {
            return keep_vip(status_from(new, &name, Err(message)), held);
        }

        let status = self.on_add(new).await;
        if status.is_error() {
            return status;
        }
        match self.prune(old, new).await {
            Ok(()) => status,
            Err(e) => keep_vip(status_from(new, &name, Err(e.to_string())), status.vip),
        }
    }

    /// Periodic resync. Retries resources that have not converged.
    async fn on_resync(&self, obj: &Self::Resource) -> Option<ResourceStatus> {
        if is_available(obj) {
            None
        } else {
            Some(self.on_add(obj).await)
        }
    }
}

/// True if the resource's last written state is `Available`.
pub fn is_available<K: ManagedResource>(obj: &K) -> bool {
    obj.resource_status()
        .is_some_and(|s| s.state == ResourceState::Available)
}

/// Namespace and name of a resource.
pub fn object_key<K: ManagedResource>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn keep_vip(status: ResourceStatus, vip: Option<String>) -> ResourceStatus {
    match vip {
        Some(vip) => status.with_vip(vip),
        None => status,
    }
}

/// Turns the result of a handler body into a status, logging failures.
pub fn status_from<K: ManagedResource>(
    obj: &K,
    external_name: &str,
    result: Result<(), String>,
) -> ResourceStatus {
    let (namespace, name) = object_key(obj);
    match result {
        Ok(()) => {
            info!(
                kind = K::KIND,
                namespace = %namespace,
                name = %name,
                external_name = %external_name,
                "Resource converged"
            );
            ResourceStatus::available()
        }
        Err(message) => {
            error!(
                kind = K::KIND,
                namespace = %namespace,
                name = %name,
                external_name = %external_name,
                error = %message,
                "Reconciliation failed"
            );
            ResourceStatus::error(message)
        }
    }
}

/// Drives one [`EventHandler`] from informer notifications.
pub struct Reconciler<H: EventHandler> {
    handler: H,
    client: Option<Client>,
}

impl<H: EventHandler> Reconciler<H> {
    /// Creates a reconciler that writes status through `client`.
    pub fn new(handler: H, client: Client) -> Self {
        Self {
            handler,
            client: Some(client),
        }
    }

    /// Creates a reconciler that never writes status.
    pub fn without_status_writes(handler: H) -> Self {
        Self {
            handler,
            client: None,
        }
    }

    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Runs the handler for one notification and returns the resource together
    /// with the status to write, if any.
    pub async fn dispatch(
        &self,
        notification: Notification<H::Resource>,
    ) -> (H::Resource, Option<ResourceStatus>) {
        match notification {
            Notification::Added(obj) => {
                let status = self.handler.on_add(&obj).await;
                (obj, Some(status))
            }
            Notification::Updated { old, new } => {
                let status = if is_available(&old) {
                    self.handler.on_update(&old, &new).await
                } else if old.same_spec(&new) {
                    None
                } else {
                    // The delta assumes every child of `old` exists
                    Some(self.handler.on_recover(&old, &new).await)
                };
                (new, status)
            }
            Notification::Resync(obj) => {
                let status = self.handler.on_resync(&obj).await;
                (obj, status)
            }
            Notification::Deleted(obj) => {
                if let Err(e) = self.handler.on_delete(&obj).await {
                    let (namespace, name) = object_key(&obj);
                    error!(
                        kind = H::Resource::KIND,
                        namespace = %namespace,
                        name = %name,
                        error = %e,
                        "Cleanup of deleted resource failed"
                    );
                    return (obj, Some(ResourceStatus::error(e.to_string())));
                }
                (obj, None)
            }
        }
    }
}

#[async_trait]
impl<H: EventHandler> NotificationSink<H::Resource> for Reconciler<H> {
    async fn handle(&self, notification: Notification<H::Resource>) {
        let started = Instant::now();
        let event = notification.event();
        let deleted = matches!(notification, Notification::Deleted(_));

        let (obj, new_status) = self.dispatch(notification).await;

        let outcome = match &new_status {
            None => "skipped",
            Some(s) if s.is_error() => "error",
            Some(_) => "success",
        };
        metrics::record_reconciliation(H::Resource::KIND, event, outcome, started.elapsed());

        let (namespace, name) = object_key(&obj);
        debug!(
            kind = H::Resource::KIND,
            namespace = %namespace,
            name = %name,
            event = event,
            outcome = outcome,
            elapsed_ms = started.elapsed().as_millis(),
            "Notification handled"
        );

        // A deleted object has no status to write
        if deleted {
            return;
        }
        if let (Some(client), Some(new_status)) = (&self.client, new_status) {
            status::write_status(client, &obj, new_status).await;
        }
    }
}
