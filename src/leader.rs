// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Singleton gating through a Kubernetes `Lease`.
//!
//! Only the replica holding the lease runs the reconcilers. Leadership loss is
//! fatal: the work future is dropped and an error is returned so the process
//! exits and restarts as a standby.

use crate::constants::{DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_RENEW_DEADLINE_SECS};
use crate::metrics;
use anyhow::{anyhow, Context, Result};
use kube::Client;
use kube_lease_manager::LeaseManagerBuilder;
use std::future::Future;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Identity of the lease and of this replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElectionSettings {
    pub lease_name: String,
    pub namespace: String,
    pub identity: String,
}

/// Blocks until this replica holds the lease, then runs `work` for as long as
/// the lease is held.
///
/// # Errors
///
/// Returns an error if the lease cannot be managed, if leadership is lost, or
/// if `work` fails.
pub async fn run_as_leader<F, Fut>(
    client: Client,
    settings: &ElectionSettings,
    work: F,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let manager = LeaseManagerBuilder::new(client, &settings.lease_name)
        .with_namespace(&settings.namespace)
        .with_identity(&settings.identity)
        .with_duration(DEFAULT_LEASE_DURATION_SECS)
        .with_grace(DEFAULT_LEASE_DURATION_SECS - DEFAULT_LEASE_RENEW_DEADLINE_SECS)
        .build()
        .await
        .context("failed to create lease manager")?;
    let (mut channel, lease_task) = manager.watch().await;

    info!(
        lease = %settings.lease_name,
        namespace = %settings.namespace,
        identity = %settings.identity,
        "Waiting for leadership"
    );
    wait_for_leadership(&mut channel).await?;
    info!(identity = %settings.identity, "Acquired leadership");
    metrics::record_leader_elected(&settings.identity);

    let result = tokio::select! {
        result = work() => result,
        () = wait_for_loss(&mut channel) => {
            error!(identity = %settings.identity, lease = %settings.lease_name, "Lost leadership");
            metrics::record_leader_lost(&settings.identity);
            Err(anyhow!("lost leadership of lease {}", settings.lease_name))
        }
    };

    // Dropping the receiver releases the lease
    drop(channel);
    if let Err(e) = lease_task.await {
        warn!(error = %e, "Lease manager task did not shut down cleanly");
    }
    result
}

/// Resolves once the channel reports leadership.
///
/// # Errors
///
/// Returns an error if the lease manager stops first.
pub async fn wait_for_leadership(channel: &mut watch::Receiver<bool>) -> Result<()> {
    while !*channel.borrow_and_update() {
        channel
            .changed()
            .await
            .context("lease manager stopped before leadership was acquired")?;
    }
    Ok(())
}

/// Resolves once leadership is lost or the lease manager stops.
pub async fn wait_for_loss(channel: &mut watch::Receiver<bool>) {
    loop {
        if channel.changed().await.is_err() {
            return;
        }
        if !*channel.borrow_and_update() {
            return;
        }
    }
}

#[cfg(test)]
#[path = "leader_tests.rs"]
mod leader_tests;
