use companionship_engine::{
    ActorId, ActorSnapshot, Cell, CompanionshipTracker, EndReason, EventKind, RecordingReward,
    ResourceFinder, SandboxMap, StandardEligibility, TaskKind, ThingId, TrackerConfig,
    VisitorPhase,
};

const CLIENT: ActorId = ActorId(1);
const PROVIDER: ActorId = ActorId(100);

type Tracker = CompanionshipTracker<StandardEligibility, RecordingReward>;

struct World {
    tracker: Tracker,
    map: SandboxMap,
    spot: ThingId,
}

fn world(config: TrackerConfig, start: i64) -> World {
    let tracker = CompanionshipTracker::with_parts(
        config,
        2024,
        StandardEligibility::default(),
        RecordingReward::default(),
    )
    .unwrap();
    let mut map = SandboxMap::new(start);
    let spot = map.add_spot(Cell::new(0, 0));
    map.add_bed(Cell::new(6, 6));
    map.add_actor(ActorSnapshot::visitor(CLIENT, Cell::new(1, 2)));
    map.add_actor(ActorSnapshot::colonist(PROVIDER, Cell::new(3, 0)));
    World { tracker, map, spot }
}

fn eager_config() -> TrackerConfig {
    TrackerConfig {
        desire_delay_ticks: 0,
        desire_chance: 1.0,
        ..TrackerConfig::default()
    }
}

fn poll_at(world: &mut World, tick: i64) {
    world.map.set_now(tick);
    world.tracker.poll(&mut world.map);
}

fn claimed_world() -> World {
    let mut world = world(eager_config(), 1_000);
    poll_at(&mut world, 1_000);
    let found = world
        .tracker
        .find_eligible_waiting_client(&world.map, world.spot, PROVIDER);
    assert_eq!(found, Some(CLIENT));
    assert!(world.tracker.try_claim(&world.map, CLIENT, PROVIDER));
    world
}

fn assert_no_orphaned_claims(tracker: &Tracker) {
    for record in tracker.records() {
        if record.claimed_by.is_some() {
            assert!(
                tracker.has_active_session(record.actor),
                "{} holds a claim without session",
                record.actor
            );
        }
        if record.phase.is_claimed() {
            assert!(tracker.has_active_session(record.actor));
        }
    }
}

#[test]
fn claim_timeout_walkthrough() {
    let config = TrackerConfig {
        desire_delay_ticks: 400,
        desire_chance: 1.0,
        ..TrackerConfig::default()
    };
    let max_claim = config.max_claim_ticks;
    let retry = config.retry_cooldown_ticks;
    let mut world = world(config, 1_000);

    poll_at(&mut world, 1_000);
    let record = world.tracker.record(CLIENT).unwrap();
    assert_eq!(record.spawned_at_tick, 1_000);
    assert!(!record.rolled);

    poll_at(&mut world, 1_400);
    let record = world.tracker.record(CLIENT).unwrap();
    assert!(record.rolled && record.wants_encounter);
    assert_eq!(record.phase, VisitorPhase::WaitingNearSpot);

    world.map.set_now(1_500);
    assert!(world.tracker.try_claim(&world.map, CLIENT, PROVIDER));
    assert_eq!(
        world.tracker.record(CLIENT).unwrap().phase,
        VisitorPhase::Claimed
    );

    poll_at(&mut world, 1_500 + max_claim - 1);
    assert!(world.tracker.has_active_session(CLIENT));

    poll_at(&mut world, 1_500 + max_claim);
    assert!(!world.tracker.has_active_session(CLIENT));
    let record = world.tracker.record(CLIENT).unwrap().clone();
    assert_eq!(record.last_session_end_reason, Some(EndReason::Timeout));
    assert_eq!(record.phase, VisitorPhase::Cooldown);
    assert_eq!(record.cooldown_until_tick, Some(1_500 + max_claim + retry));
    assert_eq!(record.claimed_by, None);

    poll_at(&mut world, 1_500 + max_claim + retry - 1);
    assert_eq!(
        world.tracker.record(CLIENT).unwrap().phase,
        VisitorPhase::Cooldown
    );
    poll_at(&mut world, 1_500 + max_claim + retry);
    assert_eq!(
        world.tracker.record(CLIENT).unwrap().phase,
        VisitorPhase::WaitingNearSpot
    );
    assert!(world.tracker.reward().grants.is_empty());
}

#[test]
fn full_session_rewards_once_and_flushes_tasks() {
    let mut world = claimed_world();
    let bed = world.map.find_free_resource(PROVIDER, CLIENT).unwrap();
    assert!(world.tracker.bind_resource(&world.map, CLIENT, bed));

    world.map.set_task(PROVIDER, Some(TaskKind::GreetAndEscort));
    world.map.set_now(1_100);
    assert!(world.tracker.set_phase(&world.map, CLIENT, VisitorPhase::Greeting));
    poll_at(&mut world, 1_120);
    assert!(world.tracker.has_active_session(CLIENT));

    world.map.set_task(CLIENT, Some(TaskKind::FollowToBed));
    assert!(world.tracker.set_phase(&world.map, CLIENT, VisitorPhase::Escorting));
    poll_at(&mut world, 1_200);
    assert!(world.tracker.has_active_session(CLIENT));

    world.map.occupy(bed, PROVIDER);
    world.map.occupy(bed, CLIENT);
    world.map.set_task(PROVIDER, Some(TaskKind::Intimacy));
    world.map.set_task(CLIENT, Some(TaskKind::IntimacyPartner));
    assert!(world.tracker.set_phase(&world.map, CLIENT, VisitorPhase::AtBed));
    poll_at(&mut world, 1_300);
    assert!(world.tracker.has_active_session(CLIENT));

    assert!(world.tracker.complete_session(&world.map, CLIENT, PROVIDER));
    assert!(!world.tracker.complete_session(&world.map, CLIENT, PROVIDER));
    assert_eq!(world.tracker.reward().grants.len(), 1);
    let session = world.tracker.session(CLIENT).unwrap();
    assert!(session.rewarded);
    assert_eq!(session.phase_entered_tick(VisitorPhase::Greeting), Some(1_100));

    poll_at(&mut world, 1_360);
    assert!(world.tracker.session(CLIENT).is_none());
    let flushed: Vec<ActorId> = world
        .map
        .issued_fillers()
        .iter()
        .map(|order| order.actor)
        .collect();
    assert!(flushed.contains(&PROVIDER));
    assert!(flushed.contains(&CLIENT));

    let record = world.tracker.record(CLIENT).unwrap();
    assert_eq!(record.last_session_end_reason, Some(EndReason::Success));
    assert!(!record.wants_encounter);

    let loiters_before = world.map.issued_loiters().len();
    for tick in (1_400..60_000).step_by(600) {
        poll_at(&mut world, tick);
        assert_eq!(
            world.tracker.record(CLIENT).unwrap().phase,
            VisitorPhase::None
        );
    }
    assert_eq!(world.map.issued_loiters().len(), loiters_before);
    assert_eq!(world.tracker.reward().grants.len(), 1);
}

#[test]
fn destroyed_provider_leaves_no_orphaned_claim() {
    let mut world = claimed_world();
    world.map.remove_actor(PROVIDER);
    poll_at(&mut world, 1_060);
    assert!(!world.tracker.has_active_session(CLIENT));
    let record = world.tracker.record(CLIENT).unwrap();
    assert_eq!(record.last_session_end_reason, Some(EndReason::ProviderInvalid));
    assert_eq!(record.phase, VisitorPhase::Cooldown);
    assert_no_orphaned_claims(&world.tracker);
}

#[test]
fn client_yanked_mid_greeting_is_detected_and_provider_flushed() {
    let mut world = claimed_world();
    world.map.set_task(PROVIDER, Some(TaskKind::GreetAndEscort));
    world.map.set_task(CLIENT, Some(TaskKind::ParticipateGreeting));
    assert!(world.tracker.set_phase(&world.map, CLIENT, VisitorPhase::Greeting));
    poll_at(&mut world, 1_060);
    assert!(world.tracker.has_active_session(CLIENT));

    world.map.set_task(CLIENT, Some(TaskKind::Unrelated));
    world.map.set_now(1_120);
    let summary = world.tracker.poll(&mut world.map);
    assert_eq!(
        summary.sessions_ended,
        vec![(CLIENT, EndReason::ClientPulledFromPipeline)]
    );
    assert_eq!(world.map.current_task_of(PROVIDER), Some(TaskKind::Filler));
    assert_eq!(world.map.current_task_of(CLIENT), Some(TaskKind::Unrelated));
    assert_no_orphaned_claims(&world.tracker);
}

#[test]
fn burning_bed_ends_session() {
    let mut world = claimed_world();
    let bed = world.map.find_free_resource(PROVIDER, CLIENT).unwrap();
    assert!(world.tracker.bind_resource(&world.map, CLIENT, bed));
    world.map.ignite(bed);
    poll_at(&mut world, 1_060);
    assert_eq!(
        world.tracker.record(CLIENT).unwrap().last_session_end_reason,
        Some(EndReason::ResourceInvalid)
    );
}

#[test]
fn work_toggle_ends_session_and_blocks_new_claims() {
    let mut world = claimed_world();
    world
        .map
        .update_actor(PROVIDER, |actor| actor.work_enabled = false);
    poll_at(&mut world, 1_060);
    assert_eq!(
        world.tracker.record(CLIENT).unwrap().last_session_end_reason,
        Some(EndReason::ProviderFeatureDisabled)
    );
    poll_at(&mut world, 1_500 + 5_000);
    assert_eq!(
        world
            .tracker
            .find_eligible_waiting_client(&world.map, world.spot, PROVIDER),
        None
    );
}

#[test]
fn departing_client_ends_session_and_record() {
    let mut world = claimed_world();
    world.map.update_actor(CLIENT, |actor| actor.spawned = false);
    let summary = {
        world.map.set_now(1_060);
        world.tracker.poll(&mut world.map)
    };
    assert_eq!(summary.dropped, 1);
    assert!(summary
        .sessions_ended
        .contains(&(CLIENT, EndReason::ClientInvalid)));
    assert!(world.tracker.record(CLIENT).is_none());
    assert!(world.tracker.session(CLIENT).is_none());
    let events = world.tracker.drain_events();
    assert!(events.iter().any(|event| event.kind == EventKind::VisitorDropped));
}

#[test]
fn destroyed_spot_ends_claim_with_location_reason() {
    let mut world = claimed_world();
    world.map.destroy_thing(world.spot);
    poll_at(&mut world, 1_060);
    assert_eq!(
        world.tracker.record(CLIENT).unwrap().last_session_end_reason,
        Some(EndReason::LocationInvalid)
    );
}

#[test]
fn returning_to_claimed_does_not_restart_the_claim_clock() {
    let mut world = claimed_world();
    let max_claim = world.tracker.config().max_claim_ticks;
    world.map.set_task(PROVIDER, Some(TaskKind::GreetAndEscort));
    world.map.set_task(CLIENT, Some(TaskKind::ParticipateGreeting));
    world.map.set_now(1_000 + max_claim - 20);
    assert!(world.tracker.set_phase(&world.map, CLIENT, VisitorPhase::Greeting));
    assert!(!world.tracker.set_phase(&world.map, CLIENT, VisitorPhase::Claimed));
    assert_eq!(
        world.tracker.record(CLIENT).unwrap().phase,
        VisitorPhase::Greeting
    );

    poll_at(&mut world, 1_000 + max_claim);
    assert!(world.tracker.has_active_session(CLIENT));
    assert_eq!(
        world.tracker.session(CLIENT).unwrap().phase,
        VisitorPhase::Greeting
    );
}

#[test]
fn extreme_durations_saturate_instead_of_overflowing() {
    let config = TrackerConfig {
        retry_cooldown_ticks: i64::MAX,
        phase_timeout_slack_ticks: i64::MAX,
        ..eager_config()
    };
    let mut world = world(config, 1_000);
    poll_at(&mut world, 1_000);
    assert!(world.tracker.try_claim(&world.map, CLIENT, PROVIDER));
    world.map.set_task(PROVIDER, Some(TaskKind::GreetAndEscort));
    world.map.set_task(CLIENT, Some(TaskKind::ParticipateGreeting));
    world.map.set_now(1_100);
    assert!(world.tracker.set_phase(&world.map, CLIENT, VisitorPhase::Greeting));

    poll_at(&mut world, 1_200);
    assert!(world.tracker.has_active_session(CLIENT));

    world.map.set_now(1_300);
    assert!(
        world
            .tracker
            .try_end_session(&world.map, CLIENT, EndReason::Interrupted)
    );
    let record = world.tracker.record(CLIENT).unwrap();
    assert_eq!(record.phase, VisitorPhase::Cooldown);
    assert_eq!(record.cooldown_until_tick, Some(i64::MAX));

    poll_at(&mut world, 1_360);
    assert!(world.tracker.set_phase(&world.map, CLIENT, VisitorPhase::Cooldown));
    let record = world.tracker.record(CLIENT).unwrap();
    assert_eq!(record.phase, VisitorPhase::Cooldown);
    assert_eq!(record.cooldown_until_tick, Some(i64::MAX));
}
