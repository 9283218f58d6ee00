//! Headless simulation of one managed area.
//!
//! A [`SimulationPlan`] lays out actors and beds on a [`SandboxMap`], drives
//! the providers with scripted [`ProviderDriver`]s and injects disruptions.
//! The tracker invariants are checked after every host step.
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use companionship_engine::{
    ActorId, ActorSnapshot, Cell, CompanionshipTracker, EndReason, EventKind, RecordingReward,
    SandboxMap, StandardEligibility, TaskKind, Tick, TrackerConfig, TrackerConfigOverlay,
    VisitorPhase, WorldView,
};

use super::driver::{DriverTimings, ProviderDriver};

pub type SimTracker = CompanionshipTracker<StandardEligibility, RecordingReward>;

const FIRST_CLIENT: u64 = 1;
const FIRST_PROVIDER: u64 = 500;
/// Every client cell stays inside the wait radius of this cell.
const REPLACEMENT_SPOT: Cell = Cell { x: 0, z: -1 };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisruptionKind {
    /// Kill the provider of an active session.
    DestroyProvider,
    /// Set the bound bed of a session on fire.
    IgniteBed,
    /// Turn off the companionship work type for an active provider.
    DisableWork,
    /// Pull a client in the pipeline onto an unrelated task.
    YankClient,
    /// Destroy the spot a session met at and build a replacement.
    DestroySpot,
    /// A tracked visitor leaves the map.
    ClientLeaves,
}

impl DisruptionKind {
    pub const ALL: [Self; 6] = [
        Self::DestroyProvider,
        Self::IgniteBed,
        Self::DisableWork,
        Self::YankClient,
        Self::DestroySpot,
        Self::ClientLeaves,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DestroyProvider => "destroy-provider",
            Self::IgniteBed => "ignite-bed",
            Self::DisableWork => "disable-work",
            Self::YankClient => "yank-client",
            Self::DestroySpot => "destroy-spot",
            Self::ClientLeaves => "client-leaves",
        }
    }
}

impl fmt::Display for DisruptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Disruption applied at the first step at or after `at` with a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disruption {
    pub at: Tick,
    pub kind: DisruptionKind,
}

#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub providers: usize,
    pub clients: usize,
    pub beds: usize,
    pub duration_ticks: Tick,
    pub step_ticks: Tick,
    pub overlay: TrackerConfigOverlay,
    pub timings: DriverTimings,
    pub stalled_providers: bool,
    pub disruptions: Vec<Disruption>,
    /// Mean spacing of random disruptions.
    pub random_disruptions: Option<Tick>,
    /// A new visitor arrives every this many ticks.
    pub arrivals: Option<Tick>,
    pub expectations: Vec<SimulationExpectation>,
}

impl SimulationPlan {
    #[must_use]
    pub fn new(providers: usize, clients: usize) -> Self {
        Self {
            providers,
            clients,
            beds: 1,
            duration_ticks: 12_000,
            step_ticks: 30,
            overlay: TrackerConfigOverlay::default(),
            timings: DriverTimings::default(),
            stalled_providers: false,
            disruptions: Vec::new(),
            random_disruptions: None,
            arrivals: None,
            expectations: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_beds(mut self, beds: usize) -> Self {
        self.beds = beds;
        self
    }

    #[must_use]
    pub const fn with_duration(mut self, ticks: Tick) -> Self {
        self.duration_ticks = ticks;
        self
    }

    #[must_use]
    pub fn with_overlay(mut self, overlay: TrackerConfigOverlay) -> Self {
        self.overlay = overlay;
        self
    }

    #[must_use]
    pub const fn with_stalled_providers(mut self) -> Self {
        self.stalled_providers = true;
        self
    }

    #[must_use]
    pub fn with_disruption(mut self, at: Tick, kind: DisruptionKind) -> Self {
        self.disruptions.push(Disruption { at, kind });
        self
    }

    #[must_use]
    pub const fn with_random_disruptions(mut self, every: Tick) -> Self {
        self.random_disruptions = Some(every);
        self
    }

    #[must_use]
    pub const fn with_arrivals(mut self, every: Tick) -> Self {
        self.arrivals = Some(every);
        self
    }

    #[must_use]
    pub fn with_expectation(mut self, expectation: impl Into<SimulationExpectation>) -> Self {
        self.expectations.push(expectation.into());
        self
    }
}

/// Assertion hook run after a simulation completes.
type SimulationExpectationFn =
    Arc<dyn Fn(&SimulationSummary) -> Result<()> + Send + Sync + 'static>;

#[derive(Clone)]
pub struct SimulationExpectation(SimulationExpectationFn);

impl fmt::Debug for SimulationExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationExpectation").finish()
    }
}

impl SimulationExpectation {
    /// # Errors
    ///
    /// Returns the expectation's failure.
    pub fn evaluate(&self, summary: &SimulationSummary) -> Result<()> {
        (self.0)(summary)
    }
}

impl<F> From<F> for SimulationExpectation
where
    F: Fn(&SimulationSummary) -> Result<()> + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Self(Arc::new(f))
    }
}

/// Complete record of a simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulationSummary {
    pub seed: u64,
    pub final_tick: Tick,
    pub polls: usize,
    pub claims: usize,
    pub end_reasons: BTreeMap<&'static str, usize>,
    pub rewards: usize,
    pub cooldowns_expired: usize,
    pub fillers_issued: usize,
    pub stale_claims_cleared: usize,
    pub disruptions: Vec<(Tick, DisruptionKind)>,
    pub violations: Vec<String>,
}

impl SimulationSummary {
    #[must_use]
    pub fn ended_with(&self, reason: EndReason) -> usize {
        self.end_reasons.get(reason.label()).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn successes(&self) -> usize {
        self.ended_with(EndReason::Success)
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.end_reasons.values().sum::<usize>() - self.successes()
    }

    /// One-line digest for failure messages.
    #[must_use]
    pub fn digest(&self) -> String {
        let reasons = if self.end_reasons.is_empty() {
            "none".to_string()
        } else {
            self.end_reasons
                .iter()
                .map(|(reason, count)| format!("{reason}={count}"))
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "tick {} polls {} claims {} rewards {} ends [{reasons}] \
             fillers {} stale {} disruptions {}",
            self.final_tick,
            self.polls,
            self.claims,
            self.rewards,
            self.fillers_issued,
            self.stale_claims_cleared,
            self.disruptions.len()
        )
    }
}

/// Run `plan` on top of `base` with the given seed.
///
/// # Errors
///
/// Returns an error if the merged configuration is invalid.
pub fn run_plan(
    plan: &SimulationPlan,
    base: &TrackerConfig,
    seed: u64,
    verbose: bool,
) -> Result<SimulationSummary> {
    let config = base.with_overlay(&plan.overlay);
    let mut tracker: SimTracker = CompanionshipTracker::with_parts(
        config,
        seed,
        StandardEligibility::default(),
        RecordingReward::default(),
    )?;
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut map = SandboxMap::new(0);
    map.add_spot(Cell::new(0, 0));
    for index in 0..plan.beds {
        let x = 5 + 2 * i32::try_from(index).unwrap_or(0);
        map.add_bed(Cell::new(x, 5));
    }

    let mut next_client = FIRST_CLIENT;
    for _ in 0..plan.clients {
        spawn_client(&mut map, &mut rng, &mut next_client);
    }
    let mut drivers: Vec<ProviderDriver> = (0..plan.providers)
        .map(|index| {
            let id = ActorId(FIRST_PROVIDER + u64::try_from(index).unwrap_or(0));
            let cell = Cell::new(rng.gen_range(-4..=4), rng.gen_range(2..=6));
            map.add_actor(ActorSnapshot::colonist(id, cell));
            let driver = ProviderDriver::new(id, plan.timings);
            if plan.stalled_providers {
                driver.stalled()
            } else {
                driver
            }
        })
        .collect();

    let mut summary = SimulationSummary {
        seed,
        ..SimulationSummary::default()
    };
    let mut pending = plan.disruptions.clone();
    let mut next_random = plan
        .random_disruptions
        .map(|every| jitter(&mut rng, every));
    let mut next_arrival = plan.arrivals;

    let mut now: Tick = 0;
    while now <= plan.duration_ticks {
        map.set_now(now);

        let mut index = 0;
        while index < pending.len() {
            let disruption = pending[index];
            let applied = disruption.at <= now
                && apply_disruption(&tracker, &mut map, &mut rng, disruption.kind);
            if applied {
                summary.disruptions.push((now, disruption.kind));
                pending.remove(index);
            } else {
                index += 1;
            }
        }
        if let (Some(at), Some(every)) = (next_random, plan.random_disruptions)
            && at <= now
        {
            let kind = DisruptionKind::ALL[rng.gen_range(0..DisruptionKind::ALL.len())];
            if apply_disruption(&tracker, &mut map, &mut rng, kind) {
                summary.disruptions.push((now, kind));
            }
            next_random = Some(now + jitter(&mut rng, every));
        }
        if let (Some(at), Some(every)) = (next_arrival, plan.arrivals)
            && at <= now
        {
            spawn_client(&mut map, &mut rng, &mut next_client);
            next_arrival = Some(now + every);
        }

        if tracker.on_host_tick(&mut map).is_some() {
            summary.polls += 1;
        }
        for driver in &mut drivers {
            if let Some(event) = driver.step(&mut tracker, &mut map)
                && verbose
            {
                log::debug!(
                    "[{now}] {} {event:?} serving {:?}",
                    driver.provider(),
                    driver.client()
                );
            }
        }
        tally_events(&mut tracker, &mut summary);
        check_invariants(&tracker, now, &mut summary.violations);
        now += plan.step_ticks;
    }

    summary.final_tick = map.now();
    summary.rewards = tracker.reward().grants.len();
    Ok(summary)
}

fn jitter(rng: &mut ChaCha20Rng, every: Tick) -> Tick {
    let every = every.max(2);
    rng.gen_range(every / 2..=every + every / 2)
}

fn spawn_client(map: &mut SandboxMap, rng: &mut ChaCha20Rng, next: &mut u64) {
    let id = ActorId(*next);
    *next += 1;
    let cell = Cell::new(rng.gen_range(-4..=4), rng.gen_range(-4..=1));
    map.add_actor(ActorSnapshot::visitor(id, cell));
}

fn apply_disruption(
    tracker: &SimTracker,
    map: &mut SandboxMap,
    rng: &mut ChaCha20Rng,
    kind: DisruptionKind,
) -> bool {
    let active: Vec<_> = tracker
        .sessions()
        .filter(|session| session.is_active())
        .cloned()
        .collect();
    match kind {
        DisruptionKind::DestroyProvider => active.choose(rng).is_some_and(|session| {
            map.update_actor(session.provider, |actor| actor.dead = true)
        }),
        DisruptionKind::DisableWork => active.choose(rng).is_some_and(|session| {
            map.update_actor(session.provider, |actor| actor.work_enabled = false)
        }),
        DisruptionKind::IgniteBed => {
            let beds: Vec<_> = active
                .iter()
                .filter_map(|session| session.target_resource)
                .collect();
            beds.choose(rng).is_some_and(|bed| {
                map.ignite(*bed);
                true
            })
        }
        DisruptionKind::YankClient => {
            let clients: Vec<_> = active
                .iter()
                .filter(|session| session.phase.is_in_pipeline())
                .map(|session| session.client)
                .collect();
            clients.choose(rng).is_some_and(|client| {
                map.set_task(*client, Some(TaskKind::Unrelated));
                true
            })
        }
        DisruptionKind::DestroySpot => {
            let spots: Vec<_> = active
                .iter()
                .filter(|session| {
                    matches!(session.phase, VisitorPhase::Claimed | VisitorPhase::Greeting)
                })
                .filter_map(|session| session.location)
                .filter(|spot| map.spot(*spot).is_some_and(|spot| spot.is_usable()))
                .collect();
            let Some(spot) = spots.choose(rng).copied() else {
                return false;
            };
            map.destroy_thing(spot);
            map.add_spot(REPLACEMENT_SPOT);
            true
        }
        DisruptionKind::ClientLeaves => {
            let tracked: Vec<ActorId> = tracker.records().map(|record| record.actor).collect();
            tracked.choose(rng).is_some_and(|client| {
                map.update_actor(*client, |actor| actor.spawned = false)
            })
        }
    }
}

fn tally_events(tracker: &mut SimTracker, summary: &mut SimulationSummary) {
    for event in tracker.drain_events() {
        match event.kind {
            EventKind::Claimed => summary.claims += 1,
            EventKind::SessionEnded => {
                let reason = event.reason.unwrap_or(EndReason::Unknown);
                *summary.end_reasons.entry(reason.label()).or_default() += 1;
            }
            EventKind::CooldownExpired => summary.cooldowns_expired += 1,
            EventKind::FillerIssued => summary.fillers_issued += 1,
            EventKind::StaleClaimCleared => summary.stale_claims_cleared += 1,
            _ => {}
        }
    }
}

/// Ownership and bookkeeping invariants that must hold between steps.
pub fn check_invariants(tracker: &SimTracker, now: Tick, violations: &mut Vec<String>) {
    let mut busy: Vec<ActorId> = Vec::new();
    for session in tracker.sessions().filter(|session| session.is_active()) {
        if busy.contains(&session.provider) {
            violations.push(format!("[{now}] {} serves two clients", session.provider));
        }
        busy.push(session.provider);
        match tracker.record(session.client) {
            Some(record) if record.claimed_by == Some(session.provider) => {
                if record.phase != session.phase {
                    violations.push(format!(
                        "[{now}] {} record phase {} but session phase {}",
                        session.client, record.phase, session.phase
                    ));
                }
            }
            Some(record) => violations.push(format!(
                "[{now}] {} session owned by {} but claim is {:?}",
                session.client, session.provider, record.claimed_by
            )),
            None => violations.push(format!(
                "[{now}] {} has a session but no record",
                session.client
            )),
        }
    }
    for record in tracker.records() {
        let claimed = record.claimed_by.is_some() || record.phase.is_claimed();
        if claimed && !tracker.has_active_session(record.actor) {
            violations.push(format!("[{now}] {} holds an orphaned claim", record.actor));
        }
        if record.phase == VisitorPhase::Cooldown && record.cooldown_until_tick.is_none() {
            violations.push(format!("[{now}] {} cools down forever", record.actor));
        }
    }
    for session in tracker.sessions().filter(|session| session.ended) {
        if session.rewarded && session.end_reason != Some(EndReason::Success) {
            violations.push(format!(
                "[{now}] {} rewarded for {:?}",
                session.client, session.end_reason
            ));
        }
    }
}
