// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status write-back for edgelb resources.
//!
//! Handlers return a bare [`ResourceStatus`] (state, message, vip). Before it
//! is written, [`prepare_status`] stamps it with the object's generation and a
//! transition timestamp. The timestamp only moves when the state, message or
//! vip actually change, so a resync that reaches the same outcome does not
//! produce a write.
//!
//! # Example
//!
//! ```rust
//! use edgelb::crd::ResourceStatus;
//! use edgelb::reconcilers::status::status_changed;
//!
//! let current = ResourceStatus::available();
//! assert!(!status_changed(Some(&current), &ResourceStatus::available()));
//! assert!(status_changed(Some(&current), &ResourceStatus::error("pool missing")));
//! ```

use crate::crd::{ManagedResource, ResourceStatus};
use crate::metrics;
use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::{debug, warn};

/// True if `new` differs from `current` in anything but the timestamp.
#[must_use]
pub fn status_changed(current: Option<&ResourceStatus>, new: &ResourceStatus) -> bool {
    let Some(current) = current else {
        return true;
    };
    current.state != new.state
        || current.message != new.message
        || current.vip != new.vip
        || (new.observed_generation.is_some()
            && current.observed_generation != new.observed_generation)
}

/// Completes a handler's status with `observedGeneration` and `lastUpdated`.
///
/// `lastUpdated` is carried over from the current status when the outcome did
/// not change.
#[must_use]
pub fn prepare_status<K: ManagedResource>(obj: &K, status: ResourceStatus) -> ResourceStatus {
    let mut status = ResourceStatus {
        observed_generation: obj.meta().generation,
        ..status
    };
    let current = obj.resource_status();
    let same_outcome = current.is_some_and(|c| {
        c.state == status.state && c.message == status.message && c.vip == status.vip
    });
    status.last_updated = match current {
        Some(c) if same_outcome && c.last_updated.is_some() => c.last_updated.clone(),
        _ => Some(Utc::now().to_rfc3339()),
    };
    status
}

/// Writes `status` to the object's status subresource, unless it is unchanged.
///
/// Failures are logged and counted; the next notification for the object
/// writes again.
pub async fn write_status<K: ManagedResource>(client: &Client, obj: &K, status: ResourceStatus) {
    let status = prepare_status(obj, status);
    if !status_changed(obj.resource_status(), &status) {
        debug!(
            kind = K::KIND,
            name = %obj.name_any(),
            "Status unchanged, skipping update"
        );
        return;
    }

    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let api: Api<K> = Api::namespaced(client.clone(), &namespace);
    // Explicit nulls so a merge patch clears a stale message or vip
    let patch = json!({
        "status": {
            "state": status.state,
            "message": status.message,
            "vip": status.vip,
            "observedGeneration": status.observed_generation,
            "lastUpdated": status.last_updated,
        }
    });

    match api
        .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => debug!(
            kind = K::KIND,
            namespace = %namespace,
            name = %name,
            state = %status.state,
            "Updated status"
        ),
        Err(e) => {
            warn!(
                kind = K::KIND,
                namespace = %namespace,
                name = %name,
                error = %e,
                "Failed to update status"
            );
            metrics::record_status_write_failure(K::KIND);
        }
    }
}
