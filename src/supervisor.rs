// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Runs one informer task per resource kind.
//!
//! Each task gets its own driver instance and client handle and processes its
//! notifications sequentially; tasks run in parallel. The supervisor waits for
//! every initial listing to complete within the sync timeout. After that, any
//! task exiting is fatal.

use crate::crd::ManagedResource;
use crate::drivers::DriverFactory;
use crate::informer;
use crate::naming::NameGenerator;
use crate::reconcilers::{
    AppExternalNatHandler, AppLoadBalancerHandler, AppLoadBalancerPoolHandler,
    ClassicExternalNatHandler, EventHandler, ExternalNatPoolHandler, Reconciler,
};
use anyhow::{anyhow, bail, Context, Result};
use kube::{Api, Client};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

/// Timing knobs of the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Maximum time to wait for all informers to list their resources.
    pub sync_timeout: Duration,
    /// Interval between full resyncs of each informer cache.
    pub resync_period: Duration,
}

/// A task's initial-sync signal, labelled with its kind.
pub type SyncSignal = (&'static str, oneshot::Receiver<()>);

/// Starts all five reconcilers and runs until one of them stops.
///
/// # Errors
///
/// Returns an error if a driver cannot be built, if the informers do not sync
/// within `settings.sync_timeout`, or when any task exits.
pub async fn run(
    client: Client,
    factory: &DriverFactory,
    names: &NameGenerator,
    settings: SupervisorSettings,
) -> Result<()> {
    let mut tasks = JoinSet::new();
    let resync = settings.resync_period;

    let synced = vec![
        spawn_reconciler(
            &mut tasks,
            client.clone(),
            ExternalNatPoolHandler::new(factory.nat_driver()?, names.clone()),
            resync,
        ),
        spawn_reconciler(
            &mut tasks,
            client.clone(),
            AppExternalNatHandler::new(factory.nat_driver()?, names.clone()),
            resync,
        ),
        spawn_reconciler(
            &mut tasks,
            client.clone(),
            ClassicExternalNatHandler::new(factory.nat_driver()?, names.clone()),
            resync,
        ),
        spawn_reconciler(
            &mut tasks,
            client.clone(),
            AppLoadBalancerHandler::new(factory.content_switch_driver()?, names.clone()),
            resync,
        ),
        spawn_reconciler(
            &mut tasks,
            client,
            AppLoadBalancerPoolHandler::new(factory.content_switch_driver()?, names.clone()),
            resync,
        ),
    ];

    info!(
        controllers = synced.len(),
        timeout_secs = settings.sync_timeout.as_secs(),
        "Waiting for informer caches to sync"
    );
    wait_for_sync(&mut tasks, synced, settings.sync_timeout).await?;
    info!("All informer caches synced");

    match tasks.join_next().await {
        Some(joined) => Err(task_exit(joined)),
        None => bail!("no controller tasks are running"),
    }
}

fn spawn_reconciler<H: EventHandler>(
    tasks: &mut JoinSet<Result<()>>,
    client: Client,
    handler: H,
    resync_period: Duration,
) -> SyncSignal {
    let kind = <H::Resource as ManagedResource>::KIND;
    let (tx, rx) = oneshot::channel();
    let api: Api<H::Resource> = Api::all(client.clone());
    let reconciler = Reconciler::new(handler, client);

    tasks.spawn(async move {
        info!(kind = kind, "Starting controller");
        informer::run(api, resync_period, &reconciler, tx)
            .await
            .with_context(|| format!("{kind} controller failed"))
    });
    (kind, rx)
}

/// Waits until every signal fires, a task exits, or `timeout` elapses.
///
/// # Errors
///
/// Returns an error on timeout, or when a task exits before syncing.
pub async fn wait_for_sync(
    tasks: &mut JoinSet<Result<()>>,
    signals: Vec<SyncSignal>,
    timeout: Duration,
) -> Result<()> {
    let all_synced = futures::future::try_join_all(signals.into_iter().map(|(kind, rx)| async move {
        rx.await
            .map_err(|_| anyhow!("{kind} informer stopped before its cache synced"))?;
        info!(kind = kind, "Informer cache synced");
        Ok::<_, anyhow::Error>(())
    }));

    tokio::select! {
        result = tokio::time::timeout(timeout, all_synced) => match result {
            Ok(synced) => synced.map(|_| ()),
            Err(_) => {
                error!(timeout_secs = timeout.as_secs(), "Timed out waiting for informer caches to sync");
                bail!("timed out after {timeout:?} waiting for informer caches to sync")
            }
        },
        Some(joined) = tasks.join_next() => Err(task_exit(joined)),
    }
}

fn task_exit(joined: Result<Result<()>, JoinError>) -> anyhow::Error {
    let err = match joined {
        Ok(Ok(())) => anyhow!("controller task exited unexpectedly"),
        Ok(Err(e)) => e,
        Err(e) => anyhow!("controller task panicked: {e}"),
    };
    error!(error = %err, "CRITICAL: controller stopped");
    err
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod supervisor_tests;
