//! Seams to the host simulation.
//!
//! The tracker never owns actors, furniture or tasks. It reads them through
//! [`WorldView`], nudges visitors through [`TaskIssuer`], and reports
//! completed sessions to a [`RewardHook`].
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::actor::{ActorId, ActorSnapshot, Cell, ThingId, Tick};
use crate::session::Session;

/// Task an actor is currently executing, as far as the tracker cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Client loitering at a waiting spot.
    LoiterNearSpot,
    /// Provider walking up to, greeting and escorting the client.
    GreetAndEscort,
    /// Provider side of the final phase.
    Intimacy,
    /// Client standing still for the greeting.
    ParticipateGreeting,
    /// Client following the provider to the resource.
    FollowToBed,
    /// Client side of the final phase.
    IntimacyPartner,
    /// Short idle used to flush a pipeline task.
    Filler,
    /// Anything the host scheduler assigned on its own.
    Unrelated,
}

impl TaskKind {
    /// Tasks that belong to the encounter pipeline on either side.
    #[must_use]
    pub const fn is_pipeline(self) -> bool {
        matches!(
            self,
            Self::GreetAndEscort
                | Self::Intimacy
                | Self::ParticipateGreeting
                | Self::FollowToBed
                | Self::IntimacyPartner
        )
    }
}

/// A placed waiting spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotSnapshot {
    pub id: ThingId,
    pub cell: Cell,
    pub spawned: bool,
    pub destroyed: bool,
}

impl SpotSnapshot {
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.spawned && !self.destroyed
    }
}

/// A two-slot shared resource (bed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub id: ThingId,
    pub cell: Cell,
    pub spawned: bool,
    pub destroyed: bool,
    pub burning: bool,
    pub slots: u8,
    /// Actors currently occupying or holding a reservation on the resource.
    #[serde(default)]
    pub occupants: SmallVec<[ActorId; 2]>,
}

impl ResourceSnapshot {
    /// Someone other than the given pair holds the resource.
    #[must_use]
    pub fn occupied_by_third_party(&self, client: ActorId, provider: ActorId) -> bool {
        self.occupants
            .iter()
            .any(|occupant| *occupant != client && *occupant != provider)
    }

    #[must_use]
    pub const fn is_intact(&self) -> bool {
        self.spawned && !self.destroyed && !self.burning
    }
}

/// Read-only view of the managed area.
pub trait WorldView {
    fn now(&self) -> Tick;

    /// Live-actor lookup; `None` means the actor no longer exists.
    fn actor(&self, id: ActorId) -> Option<ActorSnapshot>;

    /// Every actor currently on the managed area.
    fn actors(&self) -> Vec<ActorSnapshot>;

    fn current_task(&self, id: ActorId) -> Option<TaskKind>;

    fn waiting_spots(&self) -> Vec<SpotSnapshot>;

    fn spot(&self, id: ThingId) -> Option<SpotSnapshot>;

    fn resource(&self, id: ThingId) -> Option<ResourceSnapshot>;

    /// The actor can path to the resource and could reserve it.
    fn can_reach_and_reserve(&self, actor: ActorId, resource: ThingId) -> bool;
}

/// Task injection into the host scheduler.
pub trait TaskIssuer {
    /// Queue the loiter task at `spot`. Returns false when the host refused
    /// (unreachable or unreservable spot).
    fn issue_loiter(&mut self, actor: ActorId, spot: ThingId, expiry: Tick) -> bool;

    /// Replace whatever the actor is doing with a short filler task.
    fn interrupt_with_filler(&mut self, actor: ActorId, duration: Tick);
}

/// Everything a poll needs from the host.
pub trait Host: WorldView + TaskIssuer {}

impl<T: WorldView + TaskIssuer> Host for T {}

/// Locates a free two-slot resource for a pair. Used by drivers, not the core.
pub trait ResourceFinder {
    fn find_free_resource(&self, provider: ActorId, client: ActorId) -> Option<ThingId>;
}

/// Invoked exactly once per successful session.
pub trait RewardHook {
    fn on_success(&mut self, client: ActorId, provider: ActorId, session: &Session);
}

/// Reward hook that grants nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReward;

impl RewardHook for NoReward {
    fn on_success(&mut self, _client: ActorId, _provider: ActorId, _session: &Session) {}
}

/// One granted reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardGrant {
    pub client: ActorId,
    pub provider: ActorId,
    pub started_tick: Tick,
    pub ended_tick: Option<Tick>,
}

/// Reward hook that remembers every grant.
#[derive(Debug, Clone, Default)]
pub struct RecordingReward {
    pub grants: Vec<RewardGrant>,
}

impl RewardHook for RecordingReward {
    fn on_success(&mut self, client: ActorId, provider: ActorId, session: &Session) {
        self.grants.push(RewardGrant {
            client,
            provider,
            started_tick: session.started_tick,
            ended_tick: session.ended_tick,
        });
    }
}
