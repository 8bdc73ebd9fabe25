// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watch-to-notification adapter.
//!
//! The `kube` watcher reports raw `Apply`/`Delete` events plus relist markers
//! (`Init`, `InitApply`, `InitDone`). Reconcilers need the previous snapshot on
//! every update, and must learn about objects deleted while the watch was
//! down. [`NotificationCache`] keeps the last seen object per key and turns the
//! event stream into [`Notification`]s:
//!
//! - first sighting of a key: [`Notification::Added`]
//! - new `resourceVersion` for a known key: [`Notification::Updated`] with the old snapshot
//! - `Delete`, or a key missing from a completed relist: [`Notification::Deleted`]
//! - every resync period, each cached object: [`Notification::Resync`]
//!
//! [`run`] drives the watch and hands notifications to a [`NotificationSink`]
//! one at a time.

use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource, ResourceExt};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A change to hand to a reconciler.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification<K> {
    Added(K),
    Updated { old: K, new: K },
    Deleted(K),
    Resync(K),
}

impl<K> Notification<K> {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Self::Added(_) => "add",
            Self::Updated { .. } => "update",
            Self::Deleted(_) => "delete",
            Self::Resync(_) => "resync",
        }
    }
}

/// Receives notifications, strictly one at a time.
#[async_trait]
pub trait NotificationSink<K>: Send + Sync
where
    K: Send + 'static,
{
    async fn handle(&self, notification: Notification<K>);
}

/// Last seen object per key, plus the state of an in-progress relist.
pub struct NotificationCache<K>
where
    K: Resource<DynamicType = ()>,
{
    objects: HashMap<ObjectRef<K>, K>,
    relisting: Option<HashSet<ObjectRef<K>>>,
    synced: bool,
}

impl<K> Default for NotificationCache<K>
where
    K: Resource<DynamicType = ()>,
{
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            relisting: None,
            synced: false,
        }
    }
}

impl<K> NotificationCache<K>
where
    K: Resource<DynamicType = ()> + Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the first relist has completed.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Folds one watcher event into the cache and returns the resulting notifications.
    pub fn apply(&mut self, event: Event<K>) -> Vec<Notification<K>> {
        match event {
            Event::Init => {
                self.relisting = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                if let Some(seen) = self.relisting.as_mut() {
                    seen.insert(ObjectRef::from_obj(&obj));
                }
                self.upsert(obj).into_iter().collect()
            }
            Event::InitDone => {
                let seen = self.relisting.take().unwrap_or_default();
                let vanished: Vec<ObjectRef<K>> = self
                    .objects
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                self.synced = true;
                let mut deleted: Vec<K> = vanished
                    .iter()
                    .filter_map(|key| self.objects.remove(key))
                    .collect();
                sort_by_name(&mut deleted);
                deleted.into_iter().map(Notification::Deleted).collect()
            }
            Event::Apply(obj) => self.upsert(obj).into_iter().collect(),
            Event::Delete(obj) => {
                let cached = self.objects.remove(&ObjectRef::from_obj(&obj));
                vec![Notification::Deleted(cached.unwrap_or(obj))]
            }
        }
    }

    /// One [`Notification::Resync`] per cached object, ordered by namespace and name.
    #[must_use]
    pub fn resync(&self) -> Vec<Notification<K>> {
        let mut objects: Vec<K> = self.objects.values().cloned().collect();
        sort_by_name(&mut objects);
        objects.into_iter().map(Notification::Resync).collect()
    }

    fn upsert(&mut self, obj: K) -> Option<Notification<K>> {
        let key = ObjectRef::from_obj(&obj);
        match self.objects.insert(key, obj.clone()) {
            None => Some(Notification::Added(obj)),
            // A relist replays unchanged objects
            Some(old) if old.resource_version().is_some()
                && old.resource_version() == obj.resource_version() =>
            {
                None
            }
            Some(old) => Some(Notification::Updated { old, new: obj }),
        }
    }
}

fn sort_by_name<K: Resource>(objects: &mut [K]) {
    objects.sort_by(|a, b| {
        (a.namespace(), a.name_any()).cmp(&(b.namespace(), b.name_any()))
    });
}

/// Watches `api` and feeds every notification to `sink` until the watch ends.
///
/// `synced` fires after the first complete listing has been delivered. Every
/// `resync_period` after that, all cached objects are delivered again as
/// [`Notification::Resync`].
///
/// # Errors
///
/// Returns an error if the watch stream terminates.
pub async fn run<K, S>(
    api: Api<K>,
    resync_period: Duration,
    sink: &S,
    synced: oneshot::Sender<()>,
) -> anyhow::Result<()>
where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static,
    S: NotificationSink<K> + ?Sized,
{
    let kind = K::kind(&()).to_string();
    let stream = watcher::watcher(api, watcher::Config::default().any_semantic()).default_backoff();
    let mut stream = std::pin::pin!(stream);

    let mut resync = tokio::time::interval(resync_period);
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    resync.tick().await;

    let mut cache = NotificationCache::<K>::new();
    let mut synced = Some(synced);

    info!(kind = %kind, "Informer started");

    loop {
        tokio::select! {
            event = stream.next() => {
                let Some(event) = event else {
                    anyhow::bail!("watch stream for {kind} ended");
                };
                match event {
                    Ok(event) => {
                        for notification in cache.apply(event) {
                            sink.handle(notification).await;
                        }
                        if cache.is_synced() {
                            if let Some(tx) = synced.take() {
                                info!(kind = %kind, objects = cache.len(), "Informer cache synced");
                                let _ = tx.send(());
                            }
                        }
                    }
                    Err(e) => {
                        warn!(kind = %kind, error = %e, "Watch error, retrying with backoff");
                    }
                }
            }
            _ = resync.tick() => {
                if cache.is_synced() {
                    debug!(kind = %kind, objects = cache.len(), "Periodic resync");
                    for notification in cache.resync() {
                        sink.handle(notification).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "informer_tests.rs"]
mod informer_tests;
