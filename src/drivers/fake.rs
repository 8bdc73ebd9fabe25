// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory driver recording every call, for reconciler tests.

use super::{
    ContentRule, ContentSwitchDriver, DriverResult, PoolDriver, Route, VirtualServerDriver,
    VirtualServerKind,
};
use crate::crd::{LbMethod, PoolMember, Protocol};
use crate::errors::DriverError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

/// A recorded driver call. The first field is the operation name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call(pub &'static str, pub Vec<String>);

impl Call {
    pub fn new(op: &'static str, args: &[&str]) -> Self {
        Self(op, args.iter().map(ToString::to_string).collect())
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    counts: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, usize>,
    pools: BTreeMap<String, LbMethod>,
    members: BTreeMap<String, BTreeSet<String>>,
    servers: BTreeSet<String>,
}

/// Driver double with idempotent creates and injectable failures.
///
/// Like the real appliances, adding a member to a missing pool or binding to a
/// missing virtual server fails with HTTP 404. Removals stay lenient.
#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<State>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `nth` (1-based) call of `op` fail once.
    pub fn fail_on(&self, op: &'static str, nth: usize) {
        self.state.lock().unwrap().failures.insert(op, nth);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Recorded calls of one operation.
    pub fn calls_of(&self, op: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.0 == op).collect()
    }

    pub fn clear_calls(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.clear();
        state.counts.clear();
    }

    pub fn pools(&self) -> BTreeMap<String, LbMethod> {
        self.state.lock().unwrap().pools.clone()
    }

    pub fn members(&self, pool: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .members
            .get(pool)
            .cloned()
            .unwrap_or_default()
    }

    pub fn servers(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().servers.clone()
    }

    /// Creates a pool without recording a call.
    pub fn seed_pool(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .pools
            .insert(name.to_string(), LbMethod::default());
    }

    /// Creates a virtual server without recording a call.
    pub fn seed_server(&self, name: &str) {
        self.state.lock().unwrap().servers.insert(name.to_string());
    }

    fn record(&self, call: Call) -> Result<std::sync::MutexGuard<'_, State>, DriverError> {
        let mut state = self.state.lock().unwrap();
        let op = call.0;
        state.calls.push(call);
        let count = {
            let count = state.counts.entry(op).or_insert(0);
            *count += 1;
            *count
        };
        if state.failures.get(op) == Some(&count) {
            state.failures.remove(op);
            return Err(DriverError::Http {
                operation: op.to_string(),
                status: 500,
                body: format!("injected failure on {op}"),
            });
        }
        Ok(state)
    }
}

fn not_found(op: &str, object: &str, name: &str) -> DriverError {
    DriverError::Http {
        operation: format!("{op} {name}"),
        status: 404,
        body: format!("{object} {name} not found"),
    }
}

fn require_server(state: &State, op: &str, name: &str) -> DriverResult {
    if state.servers.contains(name) {
        Ok(())
    } else {
        Err(not_found(op, "virtual server", name))
    }
}

fn member_key(member: &PoolMember) -> String {
    format!(
        "{}:{}:{}",
        member.ip,
        member.port,
        member.weight.unwrap_or(1)
    )
}

#[async_trait]
impl PoolDriver for FakeDriver {
    async fn create_pool(&self, name: &str, method: LbMethod) -> DriverResult {
        let mut state = self.record(Call::new("create_pool", &[name, &format!("{method:?}")]))?;
        state.pools.insert(name.to_string(), method);
        Ok(())
    }

    async fn delete_pool(&self, name: &str) -> DriverResult {
        let mut state = self.record(Call::new("delete_pool", &[name]))?;
        state.pools.remove(name);
        state.members.remove(name);
        Ok(())
    }

    async fn add_member(&self, pool: &str, member: &PoolMember) -> DriverResult {
        let key = member_key(member);
        let mut state = self.record(Call::new("add_member", &[pool, &key]))?;
        if !state.pools.contains_key(pool) {
            return Err(not_found("add_member", "pool", pool));
        }
        // Members are identified by ip:port on the appliance; a new weight replaces the old one
        let prefix = format!("{}:{}:", member.ip, member.port);
        let members = state.members.entry(pool.to_string()).or_default();
        members.retain(|m| !m.starts_with(&prefix));
        members.insert(key);
        Ok(())
    }

    async fn remove_member(&self, pool: &str, member: &PoolMember) -> DriverResult {
        let key = member_key(member);
        let mut state = self.record(Call::new("remove_member", &[pool, &key]))?;
        if let Some(members) = state.members.get_mut(pool) {
            members.remove(&key);
        }
        Ok(())
    }
}

#[async_trait]
impl VirtualServerDriver for FakeDriver {
    async fn create_virtual_server(
        &self,
        kind: VirtualServerKind,
        name: &str,
        address: &str,
        port: u16,
        protocol: Protocol,
    ) -> DriverResult {
        let mut state = self.record(Call::new(
            "create_virtual_server",
            &[
                &format!("{kind:?}"),
                name,
                address,
                &port.to_string(),
                &protocol.to_string(),
            ],
        ))?;
        state.servers.insert(name.to_string());
        Ok(())
    }

    async fn delete_virtual_server(&self, name: &str) -> DriverResult {
        let mut state = self.record(Call::new("delete_virtual_server", &[name]))?;
        state.servers.remove(name);
        Ok(())
    }

    async fn bind_pool(&self, vs: &str, pool: &str) -> DriverResult {
        let state = self.record(Call::new("bind_pool", &[vs, pool]))?;
        require_server(&state, "bind_pool", vs)
    }

    async fn unbind_pool(&self, vs: &str, pool: &str) -> DriverResult {
        self.record(Call::new("unbind_pool", &[vs, pool])).map(|_| ())
    }

    async fn bind_route(&self, vs: &str, route: &Route) -> DriverResult {
        let state = self.record(Call::new(
            "bind_route",
            &[vs, &route.host, route.path.as_deref().unwrap_or(""), &route.pool],
        ))?;
        require_server(&state, "bind_route", vs)
    }

    async fn unbind_route(&self, vs: &str, route: &Route) -> DriverResult {
        self.record(Call::new(
            "unbind_route",
            &[vs, &route.host, route.path.as_deref().unwrap_or(""), &route.pool],
        ))
        .map(|_| ())
    }
}

#[async_trait]
impl ContentSwitchDriver for FakeDriver {
    async fn create_lb(&self, name: &str, vip: &str, port: u16) -> DriverResult {
        let mut state = self.record(Call::new("create_lb", &[name, vip, &port.to_string()]))?;
        state.servers.insert(name.to_string());
        Ok(())
    }

    async fn delete_lb(&self, name: &str) -> DriverResult {
        let mut state = self.record(Call::new("delete_lb", &[name]))?;
        state.servers.remove(name);
        Ok(())
    }

    async fn add_rule(&self, lb: &str, rule: &ContentRule) -> DriverResult {
        let state = self.record(Call::new(
            "add_rule",
            &[lb, &rule.host, rule.path.as_deref().unwrap_or(""), &rule.pool],
        ))?;
        require_server(&state, "add_rule", lb)
    }

    async fn remove_rule(&self, lb: &str, rule: &ContentRule) -> DriverResult {
        self.record(Call::new(
            "remove_rule",
            &[lb, &rule.host, rule.path.as_deref().unwrap_or(""), &rule.pool],
        ))
        .map(|_| ())
    }
}
