//! Visitor registry passes: cleanup, discovery, desire roll, cooldown expiry
//! and movement nudges.
use serde_json::json;

use crate::actor::{ActorId, Tick};
use crate::desire::roll_desire;
use crate::eligibility::EligibilityRules;
use crate::events::{EventKind, EventSeverity};
use crate::host::{Host, RewardHook, SpotSnapshot, TaskKind, WorldView};
use crate::ledger::{BackoffKind, elapsed_since};
use crate::record::{VisitorPhase, VisitorRecord};
use crate::session::EndReason;
use crate::tracker::{CompanionshipTracker, PollSummary};

impl<E: EligibilityRules, R: RewardHook> CompanionshipTracker<E, R> {
    #[must_use]
    pub fn record(&self, actor: ActorId) -> Option<&VisitorRecord> {
        self.records.get(&actor)
    }

    pub fn records(&self) -> impl Iterator<Item = &VisitorRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }

    /// Clear the visit's desire so it rolls again after the configured delay.
    ///
    /// Refused while the actor has an active session.
    pub fn reset_desire<W: WorldView + ?Sized>(&mut self, world: &W, actor: ActorId) -> bool {
        if self.has_active_session(actor) {
            return false;
        }
        let now = world.now();
        let Some(record) = self.records.get_mut(&actor) else {
            return false;
        };
        record.rolled = false;
        record.wants_encounter = false;
        record.desire_roll = None;
        record.spawned_at_tick = now;
        record.phase = VisitorPhase::None;
        record.cooldown_until_tick = None;
        record.clear_claim();
        log::debug!("{actor}: desire reset at {now}");
        self.emit(now, EventKind::DesireReset, actor, |event| event);
        true
    }

    pub(crate) fn cleanup_records<W: WorldView + ?Sized>(
        &mut self,
        world: &W,
        now: Tick,
        summary: &mut PollSummary,
    ) {
        let gone: Vec<ActorId> = self
            .records
            .keys()
            .copied()
            .filter(|&actor| !self.client_is_valid(world, actor))
            .collect();
        for actor in gone {
            if self.has_active_session(actor)
                && self.finish_session(world, actor, EndReason::ClientInvalid, now)
            {
                summary.sessions_ended.push((actor, EndReason::ClientInvalid));
            }
            self.records.remove(&actor);
            self.ledger.forget(actor);
            summary.dropped += 1;
            log::debug!("{actor}: no longer a valid client, record dropped");
            self.emit(now, EventKind::VisitorDropped, actor, |event| event);
        }
    }

    pub(crate) fn discover<W: WorldView + ?Sized>(
        &mut self,
        world: &W,
        now: Tick,
        summary: &mut PollSummary,
    ) {
        for snapshot in world.actors() {
            if self.records.contains_key(&snapshot.id) {
                continue;
            }
            if !(self.eligibility.is_present(&snapshot)
                && self.eligibility.may_be_client(&snapshot))
            {
                continue;
            }
            self.records
                .insert(snapshot.id, VisitorRecord::new(snapshot.id, now));
            summary.discovered += 1;
            log::debug!("{}: tracked at {now}", snapshot.id);
            self.emit(now, EventKind::VisitorTracked, snapshot.id, |event| event);
        }
    }

    pub(crate) fn roll_desires(&mut self, now: Tick, summary: &mut PollSummary) {
        let delay = self.config.desire_delay_ticks;
        let chance = self.config.desire_chance;
        let mut rolled = Vec::new();
        for record in self.records.values_mut() {
            if record.rolled || now.saturating_sub(record.spawned_at_tick) < delay {
                continue;
            }
            let outcome = roll_desire(self.seed, record.actor, record.spawned_at_tick, chance);
            record.rolled = true;
            record.wants_encounter = outcome.wants;
            record.desire_roll = Some(outcome.roll);
            if outcome.wants && record.phase == VisitorPhase::None {
                record.phase = VisitorPhase::WaitingNearSpot;
            }
            rolled.push((record.actor, outcome.roll, outcome.wants));
        }
        for (actor, roll, wants) in rolled {
            summary.rolled += 1;
            if wants {
                summary.wanting += 1;
            }
            log::debug!("{actor}: desire roll {roll:.3} (wants: {wants})");
            self.emit(now, EventKind::DesireRolled, actor, |event| {
                event.with_payload(json!({ "roll": roll, "wants": wants }))
            });
        }
    }

    pub(crate) fn expire_cooldowns(&mut self, now: Tick, summary: &mut PollSummary) {
        let mut expired = Vec::new();
        for record in self.records.values_mut() {
            if record.phase != VisitorPhase::Cooldown {
                continue;
            }
            if record.cooldown_until_tick.is_some_and(|until| until > now) {
                continue;
            }
            record.cooldown_until_tick = None;
            record.phase = record.resting_phase();
            expired.push((record.actor, record.phase));
        }
        for (actor, phase) in expired {
            summary.cooldowns_expired += 1;
            self.emit(now, EventKind::CooldownExpired, actor, |event| {
                event.with_phase(phase)
            });
        }
    }

    pub(crate) fn nudge_waiting<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        now: Tick,
        summary: &mut PollSummary,
    ) {
        let spots: Vec<SpotSnapshot> = host
            .waiting_spots()
            .into_iter()
            .filter(SpotSnapshot::is_usable)
            .collect();
        if spots.is_empty() {
            return;
        }
        let force_cooldown = self.config.force_task_cooldown_ticks;
        let waiting: Vec<ActorId> = self
            .records
            .values()
            .filter(|record| {
                record.phase == VisitorPhase::WaitingNearSpot
                    && record.claimed_by.is_none()
                    && elapsed_since(record.last_force_task_tick, force_cooldown, now)
            })
            .map(|record| record.actor)
            .filter(|&actor| {
                !self.has_active_session(actor)
                    && self.ledger.is_ready(actor, BackoffKind::Unreachable, now)
            })
            .collect();

        for actor in waiting {
            let Some(snapshot) = host.actor(actor) else {
                continue;
            };
            if snapshot.is_incapacitated() {
                continue;
            }
            if host.current_task(actor) == Some(TaskKind::LoiterNearSpot) {
                continue;
            }
            let Some(spot) = spots
                .iter()
                .min_by_key(|spot| (spot.cell.distance_squared(snapshot.cell), spot.id))
            else {
                continue;
            };
            if host.issue_loiter(actor, spot.id, self.config.loiter_expiry_ticks) {
                if let Some(record) = self.records.get_mut(&actor) {
                    record.last_force_task_tick = Some(now);
                }
                summary.loiters_issued += 1;
                log::debug!("{actor}: sent to wait at {}", spot.id);
                let spot_id = spot.id.0;
                self.emit(now, EventKind::LoiterIssued, actor, |event| {
                    event.with_payload(json!({ "spot": spot_id }))
                });
            } else {
                let until = self.ledger.arm(
                    actor,
                    BackoffKind::Unreachable,
                    now,
                    self.config.unreachable_backoff_ticks,
                );
                summary.loiters_failed += 1;
                log::warn!(
                    "{actor}: waiting spot {} unreachable, backing off until {until}",
                    spot.id
                );
                self.emit(now, EventKind::LoiterFailed, actor, |event| {
                    event
                        .with_severity(EventSeverity::Warning)
                        .with_payload(json!({ "retry_at": until }))
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::actor::{ActorId, ActorSnapshot, Cell, GuestStatus};
    use crate::config::TrackerConfig;
    use crate::host::TaskKind;
    use crate::record::VisitorPhase;
    use crate::sandbox::SandboxMap;
    use crate::tracker::CompanionshipTracker;

    const VISITOR: ActorId = ActorId(1);

    fn tracker(delay: i64, chance: f32) -> CompanionshipTracker {
        let config = TrackerConfig {
            desire_delay_ticks: delay,
            desire_chance: chance,
            ..TrackerConfig::default()
        };
        CompanionshipTracker::new(config, 99).expect("valid config")
    }

    fn map_with_visitor() -> SandboxMap {
        let mut map = SandboxMap::new(1_000);
        map.add_spot(Cell::new(0, 0));
        map.add_actor(ActorSnapshot::visitor(VISITOR, Cell::new(20, 20)));
        map
    }

    #[test]
    fn desire_waits_for_delay_and_rolls_once() {
        let mut tracker = tracker(400, 1.0);
        let mut map = map_with_visitor();
        tracker.poll(&mut map);
        let record = tracker.record(VISITOR).expect("tracked");
        assert_eq!(record.spawned_at_tick, 1_000);
        assert!(!record.rolled);

        map.set_now(1_399);
        tracker.poll(&mut map);
        assert!(!tracker.record(VISITOR).expect("tracked").rolled);

        map.set_now(1_400);
        let summary = tracker.poll(&mut map);
        assert_eq!(summary.rolled, 1);
        let record = tracker.record(VISITOR).expect("tracked").clone();
        assert!(record.wants_encounter);
        assert_eq!(record.phase, VisitorPhase::WaitingNearSpot);

        map.set_now(5_000);
        let summary = tracker.poll(&mut map);
        assert_eq!(summary.rolled, 0);
        assert_eq!(
            tracker.record(VISITOR).expect("tracked").desire_roll,
            record.desire_roll
        );
    }

    #[test]
    fn unlucky_visitor_stays_idle() {
        let mut tracker = tracker(0, 0.0);
        let mut map = map_with_visitor();
        tracker.poll(&mut map);
        let record = tracker.record(VISITOR).expect("tracked");
        assert!(record.rolled);
        assert!(!record.wants_encounter);
        assert_eq!(record.phase, VisitorPhase::None);
        assert!(map.issued_loiters().is_empty());
    }

    #[test]
    fn waiting_visitor_is_nudged_with_spacing() {
        let mut tracker = tracker(0, 1.0);
        let mut map = map_with_visitor();
        let summary = tracker.poll(&mut map);
        assert_eq!(summary.loiters_issued, 1);
        assert_eq!(map.current_task_of(VISITOR), Some(TaskKind::LoiterNearSpot));

        // Loiter task got preempted; the force-task spacing still applies.
        map.set_task(VISITOR, None);
        map.set_now(1_060);
        assert_eq!(tracker.poll(&mut map).loiters_issued, 0);
        map.set_now(1_500);
        assert_eq!(tracker.poll(&mut map).loiters_issued, 1);
    }

    #[test]
    fn unreachable_spot_arms_backoff() {
        let mut tracker = tracker(0, 1.0);
        let mut map = map_with_visitor();
        map.set_spots_reachable(false);
        let summary = tracker.poll(&mut map);
        assert_eq!(summary.loiters_failed, 1);
        assert!(
            !tracker
                .ledger()
                .is_ready(VISITOR, crate::ledger::BackoffKind::Unreachable, 1_000)
        );
        map.set_spots_reachable(true);
        map.set_now(1_600);
        assert_eq!(tracker.poll(&mut map).loiters_issued, 0);
        map.set_now(3_500);
        assert_eq!(tracker.poll(&mut map).loiters_issued, 1);
    }

    #[test]
    fn nudging_is_skipped_without_spots() {
        let mut tracker = tracker(0, 1.0);
        let mut map = SandboxMap::new(0);
        map.add_actor(ActorSnapshot::visitor(VISITOR, Cell::new(0, 0)));
        let summary = tracker.poll(&mut map);
        assert_eq!(summary.wanting, 1);
        assert_eq!(summary.loiters_issued + summary.loiters_failed, 0);
    }

    #[test]
    fn invalid_clients_are_dropped() {
        let mut tracker = tracker(0, 1.0);
        let mut map = map_with_visitor();
        tracker.poll(&mut map);
        map.update_actor(VISITOR, |actor| actor.guest = GuestStatus::Prisoner);
        let summary = tracker.poll(&mut map);
        assert_eq!(summary.dropped, 1);
        assert!(tracker.record(VISITOR).is_none());
    }

    #[test]
    fn reset_desire_restarts_the_delay() {
        let mut tracker = tracker(400, 1.0);
        let mut map = map_with_visitor();
        tracker.poll(&mut map);
        map.set_now(1_400);
        tracker.poll(&mut map);
        map.set_now(2_000);
        assert!(tracker.reset_desire(&map, VISITOR));
        let record = tracker.record(VISITOR).expect("tracked");
        assert!(!record.rolled);
        assert_eq!(record.spawned_at_tick, 2_000);
        map.set_now(2_399);
        tracker.poll(&mut map);
        assert!(!tracker.record(VISITOR).expect("tracked").rolled);
        map.set_now(2_400);
        tracker.poll(&mut map);
        assert!(tracker.record(VISITOR).expect("tracked").rolled);
        assert!(!tracker.reset_desire(&map, ActorId(404)));
    }
}
