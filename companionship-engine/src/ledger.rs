//! Per-actor retry gates.
//!
//! Each entry stores the tick at which an action becomes permissible again.
//! An entry whose tick is at or before `now` is treated as absent.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::actor::{ActorId, Tick};

/// Which retry gate an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Loiter task could not be issued (spot unreachable or reserved).
    Unreachable,
    /// Provider recently ended a session without success.
    ProviderRetry,
}

impl BackoffKind {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::ProviderRetry => "provider_retry",
        }
    }
}

/// Serialized form of one ledger gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub actor: ActorId,
    pub kind: BackoffKind,
    pub until_tick: Tick,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CooldownLedger {
    gates: BTreeMap<(ActorId, BackoffKind), Tick>,
}

impl CooldownLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `kind` for `actor` until `now + duration`. A longer existing gate is kept.
    pub fn arm(&mut self, actor: ActorId, kind: BackoffKind, now: Tick, duration: Tick) -> Tick {
        let until = now.saturating_add(duration.max(0));
        let slot = self.gates.entry((actor, kind)).or_insert(until);
        if *slot < until {
            *slot = until;
        }
        *slot
    }

    #[must_use]
    pub fn ready_at(&self, actor: ActorId, kind: BackoffKind) -> Option<Tick> {
        self.gates.get(&(actor, kind)).copied()
    }

    #[must_use]
    pub fn is_ready(&self, actor: ActorId, kind: BackoffKind, now: Tick) -> bool {
        self.ready_at(actor, kind).is_none_or(|until| until <= now)
    }

    /// Ticks left before the gate opens, zero when already open.
    #[must_use]
    pub fn remaining(&self, actor: ActorId, kind: BackoffKind, now: Tick) -> Tick {
        self.ready_at(actor, kind)
            .map_or(0, |until| until.saturating_sub(now).max(0))
    }

    pub fn clear(&mut self, actor: ActorId, kind: BackoffKind) {
        self.gates.remove(&(actor, kind));
    }

    /// Drop every gate held by `actor`.
    pub fn forget(&mut self, actor: ActorId) {
        self.gates.retain(|(owner, _), _| *owner != actor);
    }

    /// Drop gates that have opened; returns how many were removed.
    pub fn prune(&mut self, now: Tick) -> usize {
        let before = self.gates.len();
        self.gates.retain(|_, until| *until > now);
        before - self.gates.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<CooldownEntry> {
        self.gates
            .iter()
            .map(|(&(actor, kind), &until_tick)| CooldownEntry {
                actor,
                kind,
                until_tick,
            })
            .collect()
    }

    #[must_use]
    pub fn from_entries(entries: &[CooldownEntry]) -> Self {
        let mut ledger = Self::new();
        for entry in entries {
            let slot = ledger
                .gates
                .entry((entry.actor, entry.kind))
                .or_insert(entry.until_tick);
            *slot = (*slot).max(entry.until_tick);
        }
        ledger
    }
}

/// True when `interval` ticks have passed since `last`, or nothing happened yet.
#[must_use]
pub fn elapsed_since(last: Option<Tick>, interval: Tick, now: Tick) -> bool {
    last.is_none_or(|at| now.saturating_sub(at) >= interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ActorId = ActorId(1);
    const B: ActorId = ActorId(2);

    #[test]
    fn gate_opens_exactly_at_until_tick() {
        let mut ledger = CooldownLedger::new();
        assert!(ledger.is_ready(A, BackoffKind::Unreachable, 0));
        let until = ledger.arm(A, BackoffKind::Unreachable, 100, 50);
        assert_eq!(until, 150);
        assert!(!ledger.is_ready(A, BackoffKind::Unreachable, 149));
        assert!(ledger.is_ready(A, BackoffKind::Unreachable, 150));
        assert_eq!(ledger.remaining(A, BackoffKind::Unreachable, 120), 30);
        assert_eq!(ledger.remaining(A, BackoffKind::Unreachable, 200), 0);
    }

    #[test]
    fn arming_keeps_the_later_deadline() {
        let mut ledger = CooldownLedger::new();
        ledger.arm(A, BackoffKind::ProviderRetry, 0, 500);
        ledger.arm(A, BackoffKind::ProviderRetry, 10, 20);
        assert_eq!(ledger.ready_at(A, BackoffKind::ProviderRetry), Some(500));
    }

    #[test]
    fn kinds_and_actors_are_independent() {
        let mut ledger = CooldownLedger::new();
        ledger.arm(A, BackoffKind::Unreachable, 0, 10);
        assert!(ledger.is_ready(A, BackoffKind::ProviderRetry, 0));
        assert!(ledger.is_ready(B, BackoffKind::Unreachable, 0));
        ledger.arm(B, BackoffKind::Unreachable, 0, 10);
        ledger.forget(A);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn prune_drops_open_gates_only() {
        let mut ledger = CooldownLedger::new();
        ledger.arm(A, BackoffKind::Unreachable, 0, 10);
        ledger.arm(B, BackoffKind::ProviderRetry, 0, 100);
        assert_eq!(ledger.prune(10), 1);
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.entries()[0].actor, B);
    }

    #[test]
    fn entries_rebuild_an_equal_ledger() {
        let mut ledger = CooldownLedger::new();
        ledger.arm(A, BackoffKind::Unreachable, 0, 10);
        ledger.arm(B, BackoffKind::ProviderRetry, 5, 250);
        let rebuilt = CooldownLedger::from_entries(&ledger.entries());
        assert_eq!(rebuilt, ledger);
    }

    #[test]
    fn elapsed_since_handles_first_use() {
        assert!(elapsed_since(None, 500, 0));
        assert!(!elapsed_since(Some(100), 500, 599));
        assert!(elapsed_since(Some(100), 500, 600));
    }
}
