//! Per-poll session sweep and validation.
//!
//! [`evaluate_session`] applies the checks in a fixed order and the first
//! failing one names the end reason. The sweep retires ended sessions and
//! flushes pipeline tasks left running on their participants.
use crate::actor::{ActorId, Tick};
use crate::config::TrackerConfig;
use crate::eligibility::EligibilityRules;
use crate::events::{EventKind, EventSeverity};
use crate::host::{Host, RewardHook, TaskKind, WorldView};
use crate::record::VisitorPhase;
use crate::session::{EndReason, Session};
use crate::tracker::{CompanionshipTracker, PollSummary};

/// Tasks each side may run while the session sits in `phase`.
#[must_use]
pub const fn expected_tasks(phase: VisitorPhase) -> (&'static [TaskKind], &'static [TaskKind]) {
    match phase {
        VisitorPhase::Greeting => (
            &[TaskKind::GreetAndEscort],
            &[TaskKind::LoiterNearSpot, TaskKind::ParticipateGreeting],
        ),
        VisitorPhase::Escorting => (
            &[TaskKind::GreetAndEscort],
            &[TaskKind::FollowToBed, TaskKind::ParticipateGreeting],
        ),
        VisitorPhase::AtBed => (
            &[TaskKind::GreetAndEscort, TaskKind::Intimacy],
            &[TaskKind::FollowToBed, TaskKind::IntimacyPartner],
        ),
        _ => (&[], &[]),
    }
}

fn runs_one_of<W: WorldView + ?Sized>(world: &W, actor: ActorId, expected: &[TaskKind]) -> bool {
    world
        .current_task(actor)
        .is_some_and(|task| expected.contains(&task))
}

/// First reason the active session can no longer continue, if any.
#[must_use]
pub fn evaluate_session<E, W>(
    config: &TrackerConfig,
    eligibility: &E,
    world: &W,
    session: &Session,
    now: Tick,
) -> Option<EndReason>
where
    E: EligibilityRules + ?Sized,
    W: WorldView + ?Sized,
{
    let client_present = world
        .actor(session.client)
        .is_some_and(|actor| eligibility.is_present(&actor));
    if !client_present {
        return Some(EndReason::ClientInvalid);
    }
    let Some(provider) = world
        .actor(session.provider)
        .filter(|actor| eligibility.is_present(actor) && eligibility.may_be_provider(actor))
    else {
        return Some(EndReason::ProviderInvalid);
    };

    if !eligibility.provider_feature_enabled(&provider) {
        return Some(EndReason::ProviderFeatureDisabled);
    }

    if session.phase == VisitorPhase::Claimed {
        let claimed_at = session
            .phase_entered_tick(VisitorPhase::Claimed)
            .unwrap_or(session.started_tick);
        if now.saturating_sub(claimed_at) >= config.max_claim_ticks {
            return Some(EndReason::Timeout);
        }
    }

    if let Some(resource_id) = session.target_resource {
        let usable = world.resource(resource_id).is_some_and(|resource| {
            resource.is_intact()
                && !resource.occupied_by_third_party(session.client, session.provider)
                && world.can_reach_and_reserve(session.client, resource_id)
                && world.can_reach_and_reserve(session.provider, resource_id)
        });
        if !usable {
            return Some(EndReason::ResourceInvalid);
        }
    }
    if matches!(session.phase, VisitorPhase::Claimed | VisitorPhase::Greeting) {
        if let Some(location) = session.location {
            if !world.spot(location).is_some_and(|spot| spot.is_usable()) {
                return Some(EndReason::LocationInvalid);
            }
        }
    }

    if session.phase.is_in_pipeline() {
        let (provider_tasks, client_tasks) = expected_tasks(session.phase);
        if !runs_one_of(world, session.provider, provider_tasks) {
            return Some(EndReason::ProviderNotInPipeline);
        }
        if !runs_one_of(world, session.client, client_tasks) {
            return Some(EndReason::ClientPulledFromPipeline);
        }
        if let Some(duration) = config.phase_durations.for_phase(session.phase) {
            let limit = duration.saturating_add(config.phase_timeout_slack_ticks);
            if session.time_in_phase(now) >= limit {
                return Some(EndReason::Timeout);
            }
        }
    }
    None
}

impl<E: EligibilityRules, R: RewardHook> CompanionshipTracker<E, R> {
    pub(crate) fn validate_sessions<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        now: Tick,
        summary: &mut PollSummary,
    ) {
        let verdicts: Vec<(ActorId, ActorId, EndReason)> = self
            .sessions
            .values()
            .filter(|session| session.is_active())
            .filter_map(|session| {
                evaluate_session(&self.config, &self.eligibility, &*host, session, now)
                    .map(|reason| (session.client, session.provider, reason))
            })
            .collect();
        for (client, provider, reason) in verdicts {
            if !self.finish_session(&*host, client, reason, now) {
                continue;
            }
            summary.sessions_ended.push((client, reason));
            for participant in [client, provider] {
                if self.flush_pipeline_task(host, participant, now) {
                    summary.fillers_issued += 1;
                }
            }
        }
    }

    pub(crate) fn sweep_sessions<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        now: Tick,
        summary: &mut PollSummary,
    ) {
        let ended: Vec<(ActorId, ActorId)> = self
            .sessions
            .values()
            .filter(|session| session.ended)
            .map(|session| (session.client, session.provider))
            .collect();
        for (client, provider) in ended {
            self.sessions.remove(&client);
            summary.sessions_retired += 1;
            for participant in [client, provider] {
                if self.flush_pipeline_task(host, participant, now) {
                    summary.fillers_issued += 1;
                }
            }
        }

        let grace = self.config.claim_grace_ticks;
        let stale: Vec<ActorId> = self
            .records
            .values()
            .filter(|record| !self.has_active_session(record.actor))
            .filter(|record| match (record.claimed_by, record.claimed_at_tick) {
                (Some(owner), at) => {
                    at.is_none_or(|at| now.saturating_sub(at) >= grace)
                        || !host
                            .actor(owner)
                            .is_some_and(|actor| self.eligibility.is_present(&actor))
                }
                (None, _) => record.phase.is_claimed(),
            })
            .map(|record| record.actor)
            .collect();
        for actor in stale {
            let valid = self.client_is_valid(&*host, actor);
            let Some(record) = self.records.get_mut(&actor) else {
                continue;
            };
            let owner = record.claimed_by;
            record.clear_claim();
            if record.phase.is_claimed() {
                record.phase = if valid {
                    record.resting_phase()
                } else {
                    VisitorPhase::None
                };
            }
            summary.stale_claims_cleared += 1;
            log::warn!("{actor}: cleared claim without session (owner {owner:?})");
            self.emit(now, EventKind::StaleClaimCleared, actor, |event| {
                let event = event.with_severity(EventSeverity::Warning);
                match owner {
                    Some(owner) => event.with_counterpart(owner),
                    None => event,
                }
            });
        }
    }

    /// Replace a lingering pipeline task with filler unless the actor is busy
    /// in another active session.
    fn flush_pipeline_task<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        actor: ActorId,
        now: Tick,
    ) -> bool {
        let in_other_session = self
            .sessions
            .values()
            .any(|session| {
                session.is_active() && (session.client == actor || session.provider == actor)
            });
        if in_other_session {
            return false;
        }
        if !host.current_task(actor).is_some_and(TaskKind::is_pipeline) {
            return false;
        }
        host.interrupt_with_filler(actor, self.config.filler_task_ticks);
        log::debug!("{actor}: pipeline task replaced with filler");
        self.emit(now, EventKind::FillerIssued, actor, |event| event);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorSnapshot, Cell, ThingId};
    use crate::eligibility::StandardEligibility;
    use crate::sandbox::SandboxMap;

    const CLIENT: ActorId = ActorId(1);
    const PROVIDER: ActorId = ActorId(2);
    const STRANGER: ActorId = ActorId(3);

    struct Fixture {
        config: TrackerConfig,
        map: SandboxMap,
        session: Session,
        bed: ThingId,
    }

    fn fixture() -> Fixture {
        let mut map = SandboxMap::new(1_000);
        let spot = map.add_spot(Cell::new(0, 0));
        let bed = map.add_bed(Cell::new(4, 4));
        map.add_actor(ActorSnapshot::visitor(CLIENT, Cell::new(0, 1)));
        map.add_actor(ActorSnapshot::colonist(PROVIDER, Cell::new(1, 0)));
        Fixture {
            config: TrackerConfig::default(),
            map,
            session: Session::new(CLIENT, PROVIDER, Some(spot), 1_000),
            bed,
        }
    }

    fn verdict(fixture: &Fixture, now: Tick) -> Option<EndReason> {
        evaluate_session(
            &fixture.config,
            &StandardEligibility::default(),
            &fixture.map,
            &fixture.session,
            now,
        )
    }

    fn into_phase(
        fixture: &mut Fixture,
        phase: VisitorPhase,
        provider: TaskKind,
        client: TaskKind,
    ) {
        fixture.session.set_phase(phase, 1_000);
        fixture.map.set_task(PROVIDER, Some(provider));
        fixture.map.set_task(CLIENT, Some(client));
    }

    #[test]
    fn healthy_claim_passes() {
        let fixture = fixture();
        assert_eq!(verdict(&fixture, 1_500), None);
    }

    #[test]
    fn missing_participants_are_invalid() {
        let mut fixture = fixture();
        fixture.map.remove_actor(CLIENT);
        assert_eq!(verdict(&fixture, 1_000), Some(EndReason::ClientInvalid));

        let mut fixture = self::fixture();
        fixture.map.update_actor(PROVIDER, |actor| actor.dead = true);
        assert_eq!(verdict(&fixture, 1_000), Some(EndReason::ProviderInvalid));
    }

    #[test]
    fn disabled_work_type_ends_session() {
        let mut fixture = fixture();
        fixture.map.update_actor(PROVIDER, |actor| actor.work_enabled = false);
        assert_eq!(verdict(&fixture, 1_000), Some(EndReason::ProviderFeatureDisabled));
    }

    #[test]
    fn claimed_phase_times_out_at_the_limit() {
        let fixture = fixture();
        assert_eq!(verdict(&fixture, 20_999), None);
        assert_eq!(verdict(&fixture, 21_000), Some(EndReason::Timeout));
    }

    #[test]
    fn resource_problems_are_detected() {
        let mut fixture = fixture();
        fixture.session.target_resource = Some(fixture.bed);
        assert_eq!(verdict(&fixture, 1_000), None);

        fixture.map.ignite(fixture.bed);
        assert_eq!(verdict(&fixture, 1_000), Some(EndReason::ResourceInvalid));

        let mut fixture = self::fixture();
        fixture.session.target_resource = Some(fixture.bed);
        fixture.map.occupy(fixture.bed, STRANGER);
        assert_eq!(verdict(&fixture, 1_000), Some(EndReason::ResourceInvalid));

        let mut fixture = self::fixture();
        fixture.session.target_resource = Some(fixture.bed);
        fixture.map.set_unreachable(CLIENT, fixture.bed);
        assert_eq!(verdict(&fixture, 1_000), Some(EndReason::ResourceInvalid));

        let mut fixture = self::fixture();
        fixture.session.target_resource = Some(ThingId(999));
        assert_eq!(verdict(&fixture, 1_000), Some(EndReason::ResourceInvalid));
    }

    #[test]
    fn destroyed_spot_only_matters_before_escort() {
        let mut fixture = fixture();
        let spot = fixture.session.location.expect("spot");
        fixture.map.destroy_thing(spot);
        assert_eq!(verdict(&fixture, 1_000), Some(EndReason::LocationInvalid));

        into_phase(
            &mut fixture,
            VisitorPhase::Escorting,
            TaskKind::GreetAndEscort,
            TaskKind::FollowToBed,
        );
        assert_eq!(verdict(&fixture, 1_000), None);
    }

    #[test]
    fn pipeline_tasks_are_checked_per_side() {
        let mut fixture = fixture();
        into_phase(
            &mut fixture,
            VisitorPhase::Greeting,
            TaskKind::GreetAndEscort,
            TaskKind::ParticipateGreeting,
        );
        assert_eq!(verdict(&fixture, 1_000), None);

        fixture.map.set_task(PROVIDER, Some(TaskKind::Unrelated));
        assert_eq!(verdict(&fixture, 1_000), Some(EndReason::ProviderNotInPipeline));

        fixture.map.set_task(PROVIDER, Some(TaskKind::GreetAndEscort));
        fixture.map.set_task(CLIENT, None);
        assert_eq!(verdict(&fixture, 1_000), Some(EndReason::ClientPulledFromPipeline));
    }

    #[test]
    fn at_bed_accepts_both_provider_tasks() {
        let mut fixture = fixture();
        into_phase(
            &mut fixture,
            VisitorPhase::AtBed,
            TaskKind::Intimacy,
            TaskKind::IntimacyPartner,
        );
        assert_eq!(verdict(&fixture, 1_000), None);
        fixture.map.set_task(PROVIDER, Some(TaskKind::GreetAndEscort));
        fixture.map.set_task(CLIENT, Some(TaskKind::FollowToBed));
        assert_eq!(verdict(&fixture, 1_000), None);
    }

    #[test]
    fn pipeline_phase_times_out_after_duration_and_slack() {
        let mut fixture = fixture();
        into_phase(
            &mut fixture,
            VisitorPhase::Greeting,
            TaskKind::GreetAndEscort,
            TaskKind::ParticipateGreeting,
        );
        assert_eq!(verdict(&fixture, 1_000 + 4_999), None);
        assert_eq!(verdict(&fixture, 1_000 + 5_000), Some(EndReason::Timeout));
    }

    #[test]
    fn first_failing_check_wins() {
        let mut fixture = fixture();
        fixture.map.update_actor(PROVIDER, |actor| actor.work_enabled = false);
        fixture.map.remove_actor(CLIENT);
        assert_eq!(verdict(&fixture, 99_999), Some(EndReason::ClientInvalid));
    }
}
