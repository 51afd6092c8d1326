use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_derive::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ParseProxyStateError;

/// Routability of a proxy as advertised to the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyState {
    /// Accepting new connections.
    Up,
    /// No new connections, existing ones are left to finish.
    Draining,
    /// Excluded entirely, safe to terminate.
    Down,
}

impl ProxyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyState::Up => "UP",
            ProxyState::Draining => "DRAINING",
            ProxyState::Down => "DOWN",
        }
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyState {
    type Err = ParseProxyStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(ProxyState::Up),
            "DRAIN" | "DRAINING" => Ok(ProxyState::Draining),
            "DOWN" => Ok(ProxyState::Down),
            _ => Err(ParseProxyStateError(s.to_owned())),
        }
    }
}

/// Health record of a single proxy. Always read and written as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProxyHealth {
    pub state: ProxyState,
    pub max_players: u32,
}

impl ProxyHealth {
    pub fn new(max_players: u32) -> Self {
        Self {
            state: ProxyState::Up,
            max_players,
        }
    }
}

/// A proxy as listed by [`ProxyRegistry::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyEntry {
    pub name: String,
    #[serde(flatten)]
    pub health: ProxyHealth,
    pub awaiting_stop: bool,
}

#[derive(Default)]
struct Proxies {
    health: HashMap<String, ProxyHealth>,
    /// Proxies in a drain cycle, waiting for the deferred stop. Every member has a record
    /// in `health`.
    awaiting_stop: HashSet<String>,
}

impl Proxies {
    fn get_or_create(&mut self, name: &str, default_max_players: u32) -> &mut ProxyHealth {
        self.health
            .entry(name.to_owned())
            .or_insert_with(|| ProxyHealth::new(default_max_players))
    }
}

/// Shared source of truth for the health of every proxy seen so far, and for the set of
/// proxies awaiting a deferred stop.
///
/// The registry is read by the agent-check listener and mutated from the event dispatch
/// path, so every operation below is a single critical section: a caller never observes a
/// record mid-update, and the awaiting-stop membership always moves together with the
/// record it belongs to. Cloning the registry yields another handle to the same state.
#[derive(Clone, Default)]
pub struct ProxyRegistry {
    default_max_players: u32,
    proxies: Arc<RwLock<Proxies>>,
}

impl ProxyRegistry {
    /// `default_max_players` is advertised for proxies whose capacity was never reported.
    pub fn new(default_max_players: u32) -> Self {
        Self {
            default_max_players,
            proxies: Default::default(),
        }
    }

    // Writers never leave `Proxies` half-updated, so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Proxies> {
        self.proxies.read().unwrap_or_else(|poisoned| {
            warn!("poisoned ProxyRegistry lock");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Proxies> {
        self.proxies.write().unwrap_or_else(|poisoned| {
            warn!("poisoned ProxyRegistry lock");
            poisoned.into_inner()
        })
    }

    /// Return the record for `name`, inserting an `UP` record first if it is unknown.
    pub fn get_or_create(&self, name: &str) -> ProxyHealth {
        *self.write().get_or_create(name, self.default_max_players)
    }

    /// Non-creating read.
    pub fn get(&self, name: &str) -> Option<ProxyHealth> {
        self.read().health.get(name).copied()
    }

    /// Set the state of `name`, creating the record if needed.
    /// Returns the previous state, or `None` if the record was just created.
    pub fn set_state(&self, name: &str, state: ProxyState) -> Option<ProxyState> {
        let mut proxies = self.write();
        let previous = proxies.health.get(name).map(|health| health.state);
        proxies.get_or_create(name, self.default_max_players).state = state;
        previous
    }

    /// Update the advertised capacity of a known proxy. Unknown proxies are left alone and
    /// `false` is returned.
    pub fn set_max_players(&self, name: &str, max_players: u32) -> bool {
        match self.write().health.get_mut(name) {
            Some(health) => {
                health.max_players = max_players;
                true
            }
            None => false,
        }
    }

    pub fn is_awaiting_stop(&self, name: &str) -> bool {
        self.read().awaiting_stop.contains(name)
    }

    /// Mark `name` as draining and waiting for its deferred stop.
    pub fn begin_drain(&self, name: &str) {
        let mut proxies = self.write();
        proxies.get_or_create(name, self.default_max_players).state = ProxyState::Draining;
        _ = proxies.awaiting_stop.insert(name.to_owned());
    }

    /// Mark `name` as down for an immediate stop, dropping any leftover drain membership.
    /// Returns the previous state, or `None` if the record was just created.
    pub fn mark_down(&self, name: &str) -> Option<ProxyState> {
        let mut proxies = self.write();
        let previous = proxies.health.get(name).map(|health| health.state);
        proxies.get_or_create(name, self.default_max_players).state = ProxyState::Down;
        _ = proxies.awaiting_stop.remove(name);
        previous
    }

    /// Complete a drain cycle whose proxy was already confirmed down: if `name` is awaiting
    /// its stop and is `DOWN`, remove it from the awaiting set and return `true`.
    pub fn finish_drain(&self, name: &str) -> bool {
        let mut proxies = self.write();
        let is_down = matches!(
            proxies.health.get(name),
            Some(ProxyHealth {
                state: ProxyState::Down,
                ..
            })
        );
        is_down && proxies.awaiting_stop.remove(name)
    }

    /// Take ownership of issuing the deferred stop for `name`. Exactly one caller gets
    /// `true` per drain cycle.
    pub fn claim_stop(&self, name: &str) -> bool {
        self.write().awaiting_stop.remove(name)
    }

    /// Put `name` back in the awaiting set after its stop could not be delivered.
    /// Returns `false` if the proxy was evicted or left `DRAINING` in the meantime.
    pub fn release_claim(&self, name: &str) -> bool {
        let mut proxies = self.write();
        match proxies.health.get(name) {
            Some(health) if health.state == ProxyState::Draining => {
                proxies.awaiting_stop.insert(name.to_owned())
            }
            _ => false,
        }
    }

    /// Mark a known proxy `DOWN` once its deferred stop was delivered. Never creates a
    /// record: returns `None` if the proxy was evicted while the stop was in flight.
    pub fn mark_stopped(&self, name: &str) -> Option<ProxyState> {
        let mut proxies = self.write();
        let health = proxies.health.get_mut(name)?;
        let previous = health.state;
        health.state = ProxyState::Down;
        Some(previous)
    }

    /// Replace the whole record of `name` in one write, creating it if needed.
    /// Returns the previous record.
    pub fn set_health(&self, name: &str, health: ProxyHealth) -> Option<ProxyHealth> {
        self.write().health.insert(name.to_owned(), health)
    }

    /// Forget `name` entirely.
    pub fn evict(&self, name: &str) -> Option<ProxyHealth> {
        let mut proxies = self.write();
        _ = proxies.awaiting_stop.remove(name);
        proxies.health.remove(name)
    }

    /// Non-creating read of the record and drain membership of `name`.
    pub fn entry(&self, name: &str) -> Option<ProxyEntry> {
        let proxies = self.read();
        proxies.health.get(name).map(|health| ProxyEntry {
            name: name.to_owned(),
            health: *health,
            awaiting_stop: proxies.awaiting_stop.contains(name),
        })
    }

    /// All known proxies, sorted by name.
    pub fn snapshot(&self) -> Vec<ProxyEntry> {
        let proxies = self.read();
        let mut entries: Vec<ProxyEntry> = proxies
            .health
            .iter()
            .map(|(name, health)| ProxyEntry {
                name: name.clone(),
                health: *health,
                awaiting_stop: proxies.awaiting_stop.contains(name),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.read().health.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().health.is_empty()
    }
}
