//! Scripted provider behaviour.
//!
//! Each driver plays one provider through the pipeline the way host job
//! drivers would: claim, walk over, greet, escort to a bed, finish. The bed
//! is reserved (occupied) the moment it is bound. A driver gives up as soon
//! as its session is gone.
use companionship_engine::{
    ActorId, CompanionshipTracker, EligibilityRules, ResourceFinder, RewardHook, SandboxMap,
    TaskKind, ThingId, Tick, VisitorPhase, WorldView,
};

/// Ticks each driver stage takes before advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverTimings {
    pub approach: Tick,
    pub greeting: Tick,
    pub escort: Tick,
    pub at_bed: Tick,
}

impl Default for DriverTimings {
    fn default() -> Self {
        Self {
            approach: 300,
            greeting: 600,
            escort: 900,
            at_bed: 1_500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Approaching { client: ActorId, since: Tick },
    Greeting { client: ActorId, since: Tick },
    Escorting { client: ActorId, bed: ThingId, since: Tick },
    AtBed { client: ActorId, bed: ThingId, since: Tick },
}

impl Stage {
    const fn client(self) -> Option<ActorId> {
        match self {
            Self::Idle => None,
            Self::Approaching { client, .. }
            | Self::Greeting { client, .. }
            | Self::Escorting { client, .. }
            | Self::AtBed { client, .. } => Some(client),
        }
    }

    const fn bed(self) -> Option<ThingId> {
        match self {
            Self::Escorting { bed, .. } | Self::AtBed { bed, .. } => Some(bed),
            _ => None,
        }
    }
}

/// What a driver step did, for verbose tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverEvent {
    Claimed(ActorId),
    Advanced(ActorId, VisitorPhase),
    Completed(ActorId),
    Released(ActorId),
    Abandoned(ActorId),
}

#[derive(Debug, Clone)]
pub struct ProviderDriver {
    provider: ActorId,
    timings: DriverTimings,
    /// Claims but never starts the greeting.
    stalled: bool,
    stage: Stage,
}

impl ProviderDriver {
    #[must_use]
    pub const fn new(provider: ActorId, timings: DriverTimings) -> Self {
        Self {
            provider,
            timings,
            stalled: false,
            stage: Stage::Idle,
        }
    }

    #[must_use]
    pub const fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    #[must_use]
    pub const fn provider(&self) -> ActorId {
        self.provider
    }

    #[must_use]
    pub const fn client(&self) -> Option<ActorId> {
        self.stage.client()
    }

    /// Advance the driver by one host step.
    pub fn step<E, R>(
        &mut self,
        tracker: &mut CompanionshipTracker<E, R>,
        map: &mut SandboxMap,
    ) -> Option<DriverEvent>
    where
        E: EligibilityRules,
        R: RewardHook,
    {
        map.actor(self.provider)?;
        let now = map.now();

        if let Some(client) = self.stage.client() {
            let still_mine = tracker
                .session(client)
                .is_some_and(|session| session.is_active() && session.provider == self.provider);
            if !still_mine {
                self.reset(map);
                return Some(DriverEvent::Abandoned(client));
            }
        }

        match self.stage {
            Stage::Idle => self.try_start(tracker, map),
            Stage::Approaching { client, since } => {
                if self.stalled || now - since < self.timings.approach {
                    return None;
                }
                map.set_task(self.provider, Some(TaskKind::GreetAndEscort));
                map.set_task(client, Some(TaskKind::ParticipateGreeting));
                tracker.set_phase(&*map, client, VisitorPhase::Greeting);
                self.stage = Stage::Greeting { client, since: now };
                Some(DriverEvent::Advanced(client, VisitorPhase::Greeting))
            }
            Stage::Greeting { client, since } => {
                if now - since < self.timings.greeting {
                    return None;
                }
                let reserved = map
                    .find_free_resource(self.provider, client)
                    .filter(|bed| {
                        let seated = map.occupy(*bed, self.provider) && map.occupy(*bed, client);
                        if !seated {
                            map.vacate(*bed);
                        }
                        seated
                    });
                let Some(bed) = reserved else {
                    tracker.release(&*map, client, self.provider);
                    self.reset(map);
                    return Some(DriverEvent::Released(client));
                };
                tracker.bind_resource(&*map, client, bed);
                map.set_task(client, Some(TaskKind::FollowToBed));
                tracker.set_phase(&*map, client, VisitorPhase::Escorting);
                self.stage = Stage::Escorting {
                    client,
                    bed,
                    since: now,
                };
                Some(DriverEvent::Advanced(client, VisitorPhase::Escorting))
            }
            Stage::Escorting { client, bed, since } => {
                if now - since < self.timings.escort {
                    return None;
                }
                map.set_task(self.provider, Some(TaskKind::Intimacy));
                map.set_task(client, Some(TaskKind::IntimacyPartner));
                tracker.set_phase(&*map, client, VisitorPhase::AtBed);
                self.stage = Stage::AtBed {
                    client,
                    bed,
                    since: now,
                };
                Some(DriverEvent::Advanced(client, VisitorPhase::AtBed))
            }
            Stage::AtBed { client, since, .. } => {
                if now - since < self.timings.at_bed {
                    return None;
                }
                let completed = tracker.complete_session(&*map, client, self.provider);
                self.reset(map);
                completed.then_some(DriverEvent::Completed(client))
            }
        }
    }

    fn try_start<E, R>(
        &mut self,
        tracker: &mut CompanionshipTracker<E, R>,
        map: &mut SandboxMap,
    ) -> Option<DriverEvent>
    where
        E: EligibilityRules,
        R: RewardHook,
    {
        let spots = map.waiting_spots();
        let client = spots
            .iter()
            .filter(|spot| spot.is_usable())
            .find_map(|spot| tracker.find_eligible_waiting_client(&*map, spot.id, self.provider))?;
        if !tracker.try_claim(&*map, client, self.provider) {
            return None;
        }
        self.stage = Stage::Approaching {
            client,
            since: map.now(),
        };
        Some(DriverEvent::Claimed(client))
    }

    fn reset(&mut self, map: &mut SandboxMap) {
        if let Some(bed) = self.stage.bed() {
            map.vacate(bed);
        }
        self.stage = Stage::Idle;
    }
}
