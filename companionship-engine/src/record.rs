//! Per-visitor bookkeeping owned by the registry.
use serde::{Deserialize, Serialize};

use crate::actor::{ActorId, Tick};
use crate::session::EndReason;

/// Where a visitor currently sits in the encounter pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitorPhase {
    #[default]
    None,
    WaitingNearSpot,
    Claimed,
    Greeting,
    Escorting,
    AtBed,
    Cooldown,
}

impl VisitorPhase {
    /// Phases that require a claim (and a live session) to exist.
    #[must_use]
    pub const fn is_claimed(self) -> bool {
        matches!(
            self,
            Self::Claimed | Self::Greeting | Self::Escorting | Self::AtBed
        )
    }

    /// Phases in which both actors are expected to run pipeline tasks.
    #[must_use]
    pub const fn is_in_pipeline(self) -> bool {
        matches!(self, Self::Greeting | Self::Escorting | Self::AtBed)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::WaitingNearSpot => "waiting_near_spot",
            Self::Claimed => "claimed",
            Self::Greeting => "greeting",
            Self::Escorting => "escorting",
            Self::AtBed => "at_bed",
            Self::Cooldown => "cooldown",
        }
    }
}

impl std::fmt::Display for VisitorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Registry entry for one tracked client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorRecord {
    pub actor: ActorId,
    pub spawned_at_tick: Tick,
    #[serde(default)]
    pub rolled: bool,
    #[serde(default)]
    pub wants_encounter: bool,
    #[serde(default)]
    pub phase: VisitorPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_force_task_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_end_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_end_reason: Option<EndReason>,
    /// Sampled desire value, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desire_roll: Option<f32>,
}

impl VisitorRecord {
    #[must_use]
    pub const fn new(actor: ActorId, now: Tick) -> Self {
        Self {
            actor,
            spawned_at_tick: now,
            rolled: false,
            wants_encounter: false,
            phase: VisitorPhase::None,
            claimed_by: None,
            claimed_at_tick: None,
            cooldown_until_tick: None,
            last_force_task_tick: None,
            last_session_end_tick: None,
            last_session_end_reason: None,
            desire_roll: None,
        }
    }

    /// Phase a record without claim or cooldown should rest in.
    #[must_use]
    pub const fn resting_phase(&self) -> VisitorPhase {
        if self.wants_encounter {
            VisitorPhase::WaitingNearSpot
        } else {
            VisitorPhase::None
        }
    }

    pub const fn clear_claim(&mut self) {
        self.claimed_by = None;
        self.claimed_at_tick = None;
    }

    /// Whether `provider` would conflict with an existing claim at `now`.
    ///
    /// A claim by someone else blocks only while it is younger than `grace`;
    /// older ones are considered abandoned.
    #[must_use]
    pub fn claim_blocks(&self, provider: ActorId, now: Tick, grace: Tick) -> bool {
        match (self.claimed_by, self.claimed_at_tick) {
            (Some(owner), _) if owner == provider => false,
            (Some(_), Some(at)) => now.saturating_sub(at) < grace,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}
