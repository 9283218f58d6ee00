//! Identity and host-side views of the actors the tracker reasons about.
use serde::{Deserialize, Serialize};

/// Simulation time in host ticks.
pub type Tick = i64;

/// Opaque identity of an actor (client or provider) in the host simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u64);

/// Opaque identity of a placed thing (waiting spot, shared furniture).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThingId(pub u64);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

impl std::fmt::Display for ThingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "thing#{}", self.0)
    }
}

/// Integer grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub z: i32,
}

impl Cell {
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Squared euclidean distance; comparisons never need the root.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dz = i64::from(self.z) - i64::from(other.z);
        dx * dx + dz * dz
    }
}

/// How the actor's faction relates to the managing (player) faction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactionStance {
    /// Factionless actors (wild, unaffiliated).
    Unaffiliated,
    /// The managing faction itself.
    Player,
    /// Another faction at peace with the player.
    Friendly,
    /// Another faction hostile to the player.
    Hostile,
}

/// Guest relationship between the actor and the managing faction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestStatus {
    None,
    Guest,
    Prisoner,
    Slave,
}

/// Why a foreign actor is present on the managed area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitPurpose {
    None,
    Visiting,
    Trading,
    Other,
}

/// Point-in-time host view of an actor, produced by the live-actor lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub id: ActorId,
    pub cell: Cell,
    /// Spawned on the managed area (false once it left or despawned).
    pub spawned: bool,
    pub destroyed: bool,
    pub dead: bool,
    pub humanlike: bool,
    pub downed: bool,
    pub mental_break: bool,
    pub faction: FactionStance,
    pub guest: GuestStatus,
    pub visit: VisitPurpose,
    /// Caravan trader role; traders are never clients.
    pub trader: bool,
    /// Provider-side feature toggle (the companion work type).
    pub work_enabled: bool,
}

impl ActorSnapshot {
    /// A friendly visiting actor, the typical client.
    #[must_use]
    pub const fn visitor(id: ActorId, cell: Cell) -> Self {
        Self {
            id,
            cell,
            spawned: true,
            destroyed: false,
            dead: false,
            humanlike: true,
            downed: false,
            mental_break: false,
            faction: FactionStance::Friendly,
            guest: GuestStatus::None,
            visit: VisitPurpose::Visiting,
            trader: false,
            work_enabled: false,
        }
    }

    /// A player-faction actor with the companion work type enabled.
    #[must_use]
    pub const fn colonist(id: ActorId, cell: Cell) -> Self {
        Self {
            id,
            cell,
            spawned: true,
            destroyed: false,
            dead: false,
            humanlike: true,
            downed: false,
            mental_break: false,
            faction: FactionStance::Player,
            guest: GuestStatus::None,
            visit: VisitPurpose::None,
            trader: false,
            work_enabled: true,
        }
    }

    /// Downed or mentally broken actors cannot take part in anything right now.
    #[must_use]
    pub const fn is_incapacitated(&self) -> bool {
        self.downed || self.mental_break
    }
}
