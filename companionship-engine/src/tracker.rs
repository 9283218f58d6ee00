//! The per-area component tying registry, arbiter and validator together.
//!
//! One tracker is constructed explicitly for each managed area. The poll is
//! the only place autonomous transitions happen; drivers call the claim
//! operations between polls.
use std::collections::BTreeMap;

use crate::actor::{ActorId, Tick};
use crate::config::{TrackerConfig, TrackerConfigError, TrackerConfigOverlay};
use crate::eligibility::{EligibilityRules, StandardEligibility};
use crate::events::{EventJournal, EventKind, TrackerEvent};
use crate::host::{Host, NoReward, RewardHook, WorldView};
use crate::ledger::CooldownLedger;
use crate::record::VisitorRecord;
use crate::session::{EndReason, Session};

/// Counters describing what one poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub tick: Tick,
    pub discovered: usize,
    pub dropped: usize,
    pub rolled: usize,
    pub wanting: usize,
    pub cooldowns_expired: usize,
    pub loiters_issued: usize,
    pub loiters_failed: usize,
    pub sessions_retired: usize,
    pub fillers_issued: usize,
    pub stale_claims_cleared: usize,
    /// Sessions ended by cleanup or validation during this poll.
    pub sessions_ended: Vec<(ActorId, EndReason)>,
}

#[derive(Debug, Clone)]
pub struct CompanionshipTracker<E = StandardEligibility, R = NoReward> {
    pub(crate) config: TrackerConfig,
    pub(crate) seed: u64,
    pub(crate) eligibility: E,
    pub(crate) reward: R,
    pub(crate) records: BTreeMap<ActorId, VisitorRecord>,
    /// Keyed by client; at most one entry per client, ended or not.
    pub(crate) sessions: BTreeMap<ActorId, Session>,
    pub(crate) ledger: CooldownLedger,
    pub(crate) journal: EventJournal,
    pub(crate) last_poll_tick: Option<Tick>,
}

impl CompanionshipTracker {
    /// Tracker with the standard eligibility rules and no reward hook.
    ///
    /// # Errors
    ///
    /// Returns `TrackerConfigError` when `config` fails validation.
    pub fn new(config: TrackerConfig, seed: u64) -> Result<Self, TrackerConfigError> {
        Self::with_parts(config, seed, StandardEligibility::default(), NoReward)
    }
}

impl<E: EligibilityRules, R: RewardHook> CompanionshipTracker<E, R> {
    /// # Errors
    ///
    /// Returns `TrackerConfigError` when `config` fails validation.
    pub fn with_parts(
        config: TrackerConfig,
        seed: u64,
        eligibility: E,
        reward: R,
    ) -> Result<Self, TrackerConfigError> {
        config.validate()?;
        let journal = EventJournal::new(config.event_journal_capacity);
        Ok(Self {
            config,
            seed,
            eligibility,
            reward,
            records: BTreeMap::new(),
            sessions: BTreeMap::new(),
            ledger: CooldownLedger::new(),
            journal,
            last_poll_tick: None,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Replace the effective configuration. The old one stays on error.
    ///
    /// # Errors
    ///
    /// Returns `TrackerConfigError` when `config` fails validation.
    pub fn set_config(&mut self, config: TrackerConfig) -> Result<(), TrackerConfigError> {
        config.validate()?;
        self.journal.set_capacity(config.event_journal_capacity);
        self.config = config;
        Ok(())
    }

    /// Merge `overlay` onto the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns `TrackerConfigError` when the merged configuration is invalid.
    pub fn apply_overlay(
        &mut self,
        overlay: &TrackerConfigOverlay,
    ) -> Result<(), TrackerConfigError> {
        let merged = self.config.with_overlay(overlay);
        self.set_config(merged)
    }

    #[must_use]
    pub const fn eligibility(&self) -> &E {
        &self.eligibility
    }

    #[must_use]
    pub const fn reward(&self) -> &R {
        &self.reward
    }

    pub const fn reward_mut(&mut self) -> &mut R {
        &mut self.reward
    }

    #[must_use]
    pub const fn ledger(&self) -> &CooldownLedger {
        &self.ledger
    }

    #[must_use]
    pub const fn last_poll_tick(&self) -> Option<Tick> {
        self.last_poll_tick
    }

    /// Take every buffered diagnostic event.
    pub fn drain_events(&mut self) -> Vec<TrackerEvent> {
        self.journal.drain()
    }

    #[must_use]
    pub const fn journal(&self) -> &EventJournal {
        &self.journal
    }

    /// Host tick hook: polls only on the configured cadence.
    pub fn on_host_tick<H: Host + ?Sized>(&mut self, host: &mut H) -> Option<PollSummary> {
        let now = host.now();
        if now.rem_euclid(self.config.poll_interval_ticks) != 0 {
            return None;
        }
        Some(self.poll(host))
    }

    /// Run one full registry and session pass.
    pub fn poll<H: Host + ?Sized>(&mut self, host: &mut H) -> PollSummary {
        let now = host.now();
        let mut summary = PollSummary {
            tick: now,
            ..PollSummary::default()
        };
        self.cleanup_records(&*host, now, &mut summary);
        self.discover(&*host, now, &mut summary);
        self.roll_desires(now, &mut summary);
        self.expire_cooldowns(now, &mut summary);
        self.nudge_waiting(host, now, &mut summary);
        self.sweep_sessions(host, now, &mut summary);
        self.validate_sessions(host, now, &mut summary);
        self.ledger.prune(now);
        self.last_poll_tick = Some(now);
        log::trace!(
            "poll at {now}: {} tracked, {} sessions, {} ended",
            self.records.len(),
            self.sessions.len(),
            summary.sessions_ended.len()
        );
        summary
    }

    pub(crate) fn emit(
        &mut self,
        now: Tick,
        kind: EventKind,
        actor: ActorId,
        decorate: impl FnOnce(TrackerEvent) -> TrackerEvent,
    ) {
        let id = self.journal.next_id(now);
        self.journal.push(decorate(TrackerEvent::new(id, kind, actor)));
    }

    /// Whether the actor currently satisfies client eligibility.
    pub(crate) fn client_is_valid<W: WorldView + ?Sized>(&self, world: &W, actor: ActorId) -> bool {
        world.actor(actor).is_some_and(|snapshot| {
            self.eligibility.is_present(&snapshot) && self.eligibility.may_be_client(&snapshot)
        })
    }

    /// Whether the actor may act as provider, feature gate included.
    pub(crate) fn provider_is_ready<W: WorldView + ?Sized>(
        &self,
        world: &W,
        actor: ActorId,
    ) -> bool {
        world.actor(actor).is_some_and(|snapshot| {
            self.eligibility.is_present(&snapshot)
                && self.eligibility.may_be_provider(&snapshot)
                && self.eligibility.provider_feature_enabled(&snapshot)
                && !snapshot.is_incapacitated()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorSnapshot, Cell};
    use crate::sandbox::SandboxMap;

    fn config() -> TrackerConfig {
        TrackerConfig {
            desire_delay_ticks: 0,
            desire_chance: 1.0,
            ..TrackerConfig::default()
        }
    }

    #[test]
    fn invalid_config_is_refused_at_construction() {
        let bad = TrackerConfig {
            max_claim_ticks: 0,
            ..TrackerConfig::default()
        };
        assert!(CompanionshipTracker::new(bad, 1).is_err());
    }

    #[test]
    fn set_config_keeps_old_config_on_error() {
        let mut tracker = CompanionshipTracker::new(config(), 1).expect("valid config");
        let overlay = TrackerConfigOverlay {
            desire_chance: Some(2.0),
            ..TrackerConfigOverlay::default()
        };
        assert!(tracker.apply_overlay(&overlay).is_err());
        assert!((tracker.config().desire_chance - 1.0).abs() < f32::EPSILON);

        let overlay = TrackerConfigOverlay {
            max_claim_ticks: Some(123),
            ..TrackerConfigOverlay::default()
        };
        tracker.apply_overlay(&overlay).expect("valid overlay");
        assert_eq!(tracker.config().max_claim_ticks, 123);
    }

    #[test]
    fn host_tick_polls_on_cadence_only() {
        let mut tracker = CompanionshipTracker::new(config(), 1).expect("valid config");
        let mut map = SandboxMap::new(59);
        assert!(tracker.on_host_tick(&mut map).is_none());
        map.set_now(120);
        let summary = tracker.on_host_tick(&mut map).expect("poll due");
        assert_eq!(summary.tick, 120);
        assert_eq!(tracker.last_poll_tick(), Some(120));
    }

    #[test]
    fn poll_discovers_and_rolls_in_one_pass_with_zero_delay() {
        let mut tracker = CompanionshipTracker::new(config(), 1).expect("valid config");
        let mut map = SandboxMap::new(0);
        map.add_actor(ActorSnapshot::visitor(ActorId(1), Cell::new(0, 0)));
        let summary = tracker.poll(&mut map);
        assert_eq!(summary.discovered, 1);
        assert_eq!(summary.rolled, 1);
        assert_eq!(summary.wanting, 1);
        let kinds: Vec<_> = tracker.drain_events().iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EventKind::VisitorTracked));
        assert!(kinds.contains(&EventKind::DesireRolled));
    }
}
