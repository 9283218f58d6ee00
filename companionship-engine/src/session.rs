//! State of one encounter from claim to end.
use serde::{Deserialize, Serialize};

use crate::actor::{ActorId, ThingId, Tick};
use crate::record::VisitorPhase;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    #[serde(alias = "completed")]
    Success,
    #[serde(alias = "cancelled")]
    Released,
    Timeout,
    Interrupted,
    ClientPulledFromPipeline,
    ProviderNotInPipeline,
    ProviderFeatureDisabled,
    ClientInvalid,
    ProviderInvalid,
    ResourceInvalid,
    LocationInvalid,
    Unknown,
}

impl EndReason {
    pub const ALL: [Self; 12] = [
        Self::Success,
        Self::Released,
        Self::Timeout,
        Self::Interrupted,
        Self::ClientPulledFromPipeline,
        Self::ProviderNotInPipeline,
        Self::ProviderFeatureDisabled,
        Self::ClientInvalid,
        Self::ProviderInvalid,
        Self::ResourceInvalid,
        Self::LocationInvalid,
        Self::Unknown,
    ];

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Released => "released",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
            Self::ClientPulledFromPipeline => "client_pulled_from_pipeline",
            Self::ProviderNotInPipeline => "provider_not_in_pipeline",
            Self::ProviderFeatureDisabled => "provider_feature_disabled",
            Self::ClientInvalid => "client_invalid",
            Self::ProviderInvalid => "provider_invalid",
            Self::ResourceInvalid => "resource_invalid",
            Self::LocationInvalid => "location_invalid",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// First-entry tick of each claimed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhaseTicks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escorting: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_bed: Option<Tick>,
}

impl PhaseTicks {
    /// Record the entry tick unless the phase was entered before.
    pub fn mark(&mut self, phase: VisitorPhase, now: Tick) {
        let slot = match phase {
            VisitorPhase::Claimed => &mut self.claimed,
            VisitorPhase::Greeting => &mut self.greeting,
            VisitorPhase::Escorting => &mut self.escorting,
            VisitorPhase::AtBed => &mut self.at_bed,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(now);
        }
    }

    #[must_use]
    pub const fn get(&self, phase: VisitorPhase) -> Option<Tick> {
        match phase {
            VisitorPhase::Claimed => self.claimed,
            VisitorPhase::Greeting => self.greeting,
            VisitorPhase::Escorting => self.escorting,
            VisitorPhase::AtBed => self.at_bed,
            _ => None,
        }
    }
}

/// Position along the claimed pipeline; unclaimed phases sort first.
const fn pipeline_rank(phase: VisitorPhase) -> u8 {
    match phase {
        VisitorPhase::Claimed => 1,
        VisitorPhase::Greeting => 2,
        VisitorPhase::Escorting => 3,
        VisitorPhase::AtBed => 4,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub client: ActorId,
    pub provider: ActorId,
    /// Waiting spot the claim was made at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<ThingId>,
    /// Shared two-slot furniture bound for the final phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resource: Option<ThingId>,
    pub phase: VisitorPhase,
    pub started_tick: Tick,
    pub last_phase_change_tick: Tick,
    #[serde(default)]
    pub phase_ticks: PhaseTicks,
    #[serde(default)]
    pub ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    #[serde(default)]
    pub rewarded: bool,
}

impl Session {
    #[must_use]
    pub fn new(client: ActorId, provider: ActorId, location: Option<ThingId>, now: Tick) -> Self {
        let mut phase_ticks = PhaseTicks::default();
        phase_ticks.mark(VisitorPhase::Claimed, now);
        Self {
            client,
            provider,
            location,
            target_resource: None,
            phase: VisitorPhase::Claimed,
            started_tick: now,
            last_phase_change_tick: now,
            phase_ticks,
            ended: false,
            ended_tick: None,
            end_reason: None,
            rewarded: false,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.ended
    }

    /// Move to `phase`; ended sessions never change and phases only advance.
    pub fn set_phase(&mut self, phase: VisitorPhase, now: Tick) -> bool {
        if self.ended || pipeline_rank(phase) < pipeline_rank(self.phase) {
            return false;
        }
        if self.phase != phase {
            self.phase = phase;
            self.last_phase_change_tick = now;
        }
        self.phase_ticks.mark(phase, now);
        true
    }

    /// Terminate the session. Returns false when it had already ended.
    pub const fn end(&mut self, reason: EndReason, now: Tick) -> bool {
        if self.ended {
            return false;
        }
        self.ended = true;
        self.ended_tick = Some(now);
        self.end_reason = Some(reason);
        true
    }

    #[must_use]
    pub const fn phase_entered_tick(&self, phase: VisitorPhase) -> Option<Tick> {
        self.phase_ticks.get(phase)
    }

    /// Ticks spent in the current phase.
    #[must_use]
    pub const fn time_in_phase(&self, now: Tick) -> Tick {
        now.saturating_sub(self.last_phase_change_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(ActorId(1), ActorId(2), Some(ThingId(9)), 100)
    }

    #[test]
    fn new_session_starts_claimed() {
        let session = session();
        assert_eq!(session.phase, VisitorPhase::Claimed);
        assert_eq!(session.phase_entered_tick(VisitorPhase::Claimed), Some(100));
        assert!(session.is_active());
    }

    #[test]
    fn phase_entry_ticks_are_recorded_once() {
        let mut session = session();
        assert!(session.set_phase(VisitorPhase::Greeting, 200));
        assert!(session.set_phase(VisitorPhase::Greeting, 250));
        assert!(session.set_phase(VisitorPhase::Escorting, 300));
        assert_eq!(session.phase_entered_tick(VisitorPhase::Greeting), Some(200));
        assert_eq!(session.last_phase_change_tick, 300);
        assert_eq!(session.time_in_phase(450), 150);
    }

    #[test]
    fn phases_never_move_backwards() {
        let mut session = session();
        assert!(session.set_phase(VisitorPhase::Escorting, 300));
        assert!(!session.set_phase(VisitorPhase::Greeting, 400));
        assert!(!session.set_phase(VisitorPhase::Claimed, 400));
        assert!(!session.set_phase(VisitorPhase::None, 400));
        assert_eq!(session.phase, VisitorPhase::Escorting);
        assert_eq!(session.last_phase_change_tick, 300);
        assert!(session.set_phase(VisitorPhase::AtBed, 500));
    }

    #[test]
    fn end_is_terminal() {
        let mut session = session();
        assert!(session.end(EndReason::Timeout, 500));
        assert!(!session.end(EndReason::Success, 600));
        assert_eq!(session.end_reason, Some(EndReason::Timeout));
        assert_eq!(session.ended_tick, Some(500));
        assert!(!session.set_phase(VisitorPhase::AtBed, 700));
        assert_eq!(session.phase, VisitorPhase::Claimed);
    }

    #[test]
    fn legacy_reason_names_deserialize() {
        let completed: EndReason = serde_json::from_str("\"completed\"").expect("alias");
        let cancelled: EndReason = serde_json::from_str("\"cancelled\"").expect("alias");
        assert_eq!(completed, EndReason::Success);
        assert_eq!(cancelled, EndReason::Released);
        assert_eq!(
            serde_json::to_string(&EndReason::ClientPulledFromPipeline).expect("serialize"),
            "\"client_pulled_from_pipeline\""
        );
    }

    #[test]
    fn only_success_counts_as_success() {
        let successes = EndReason::ALL.iter().filter(|r| r.is_success()).count();
        assert_eq!(successes, 1);
    }
}
