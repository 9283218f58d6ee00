//! Structured diagnostics emitted by the tracker.
//!
//! Every state transition worth explaining lands in a bounded journal that
//! callers drain between polls. The same transitions are mirrored to the `log`
//! facade at the call site.
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::actor::{ActorId, Tick};
use crate::record::VisitorPhase;
use crate::session::EndReason;

/// Stable, deterministic identifier for a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    pub tick: Tick,
    /// Per-tick sequence number (0-based).
    pub seq: u16,
}

impl EventId {
    #[must_use]
    pub const fn new(tick: Tick, seq: u16) -> Self {
        Self { tick, seq }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    VisitorTracked,
    VisitorDropped,
    DesireRolled,
    CooldownExpired,
    LoiterIssued,
    LoiterFailed,
    Claimed,
    Released,
    PhaseChanged,
    ResourceBound,
    SessionEnded,
    Rewarded,
    FillerIssued,
    StaleClaimCleared,
    DesireReset,
    RestoreRepaired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub severity: EventSeverity,
    /// Actor the event is about (usually the client).
    pub actor: ActorId,
    /// The other participant, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<VisitorPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl TrackerEvent {
    #[must_use]
    pub const fn new(id: EventId, kind: EventKind, actor: ActorId) -> Self {
        Self {
            id,
            kind,
            severity: EventSeverity::Info,
            actor,
            counterpart: None,
            phase: None,
            reason: None,
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub const fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub const fn with_counterpart(mut self, counterpart: ActorId) -> Self {
        self.counterpart = Some(counterpart);
        self
    }

    #[must_use]
    pub const fn with_phase(mut self, phase: VisitorPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    #[must_use]
    pub const fn with_reason(mut self, reason: EndReason) -> Self {
        self.reason = Some(reason);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Bounded FIFO of tracker events. The oldest event is dropped on overflow.
#[derive(Debug, Clone)]
pub struct EventJournal {
    capacity: usize,
    events: VecDeque<TrackerEvent>,
    tick: Tick,
    seq: u16,
    dropped: u64,
}

impl EventJournal {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: VecDeque::new(),
            tick: Tick::MIN,
            seq: 0,
            dropped: 0,
        }
    }

    /// Next stable id for an event raised at `tick`.
    pub const fn next_id(&mut self, tick: Tick) -> EventId {
        if tick != self.tick {
            self.tick = tick;
            self.seq = 0;
        }
        let id = EventId::new(tick, self.seq);
        self.seq = self.seq.saturating_add(1);
        id
    }

    pub fn push(&mut self, event: TrackerEvent) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.events.len() > self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
    }

    pub fn drain(&mut self) -> Vec<TrackerEvent> {
        self.events.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackerEvent> {
        self.events.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events discarded because the journal was full.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}
