//! In-memory host used by tests and the scenario tester.
//!
//! Holds actors, waiting spots and two-slot beds, remembers every task the
//! tracker issued, and lets callers break things on purpose.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::actor::{ActorId, ActorSnapshot, Cell, ThingId, Tick};
use crate::host::{
    ResourceFinder, ResourceSnapshot, SpotSnapshot, TaskIssuer, TaskKind, WorldView,
};

const FIRST_THING_ID: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoiterOrder {
    pub tick: Tick,
    pub actor: ActorId,
    pub spot: ThingId,
    pub expiry: Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillerOrder {
    pub tick: Tick,
    pub actor: ActorId,
    pub duration: Tick,
    /// Task the filler replaced.
    pub replaced: Option<TaskKind>,
}

#[derive(Debug, Clone)]
pub struct SandboxMap {
    now: Tick,
    next_thing: u64,
    actors: BTreeMap<ActorId, ActorSnapshot>,
    tasks: BTreeMap<ActorId, TaskKind>,
    spots: BTreeMap<ThingId, SpotSnapshot>,
    beds: BTreeMap<ThingId, ResourceSnapshot>,
    unreachable: BTreeSet<(ActorId, ThingId)>,
    spots_reachable: bool,
    loiters: Vec<LoiterOrder>,
    fillers: Vec<FillerOrder>,
}

impl SandboxMap {
    #[must_use]
    pub const fn new(now: Tick) -> Self {
        Self {
            now,
            next_thing: FIRST_THING_ID,
            actors: BTreeMap::new(),
            tasks: BTreeMap::new(),
            spots: BTreeMap::new(),
            beds: BTreeMap::new(),
            unreachable: BTreeSet::new(),
            spots_reachable: true,
            loiters: Vec::new(),
            fillers: Vec::new(),
        }
    }

    pub const fn set_now(&mut self, now: Tick) {
        self.now = now;
    }

    pub const fn advance(&mut self, ticks: Tick) {
        self.now += ticks;
    }

    pub fn add_actor(&mut self, actor: ActorSnapshot) {
        self.actors.insert(actor.id, actor);
    }

    /// Despawn and forget the actor entirely.
    pub fn remove_actor(&mut self, id: ActorId) {
        self.actors.remove(&id);
        self.tasks.remove(&id);
        for bed in self.beds.values_mut() {
            bed.occupants.retain(|occupant| *occupant != id);
        }
    }

    /// Apply `change` to a live actor; returns false for unknown ids.
    pub fn update_actor(&mut self, id: ActorId, change: impl FnOnce(&mut ActorSnapshot)) -> bool {
        match self.actors.get_mut(&id) {
            Some(actor) => {
                change(actor);
                true
            }
            None => false,
        }
    }

    pub fn add_spot(&mut self, cell: Cell) -> ThingId {
        let id = self.allocate();
        self.spots.insert(
            id,
            SpotSnapshot {
                id,
                cell,
                spawned: true,
                destroyed: false,
            },
        );
        id
    }

    pub fn add_bed(&mut self, cell: Cell) -> ThingId {
        let id = self.allocate();
        self.beds.insert(
            id,
            ResourceSnapshot {
                id,
                cell,
                spawned: true,
                destroyed: false,
                burning: false,
                slots: 2,
                occupants: SmallVec::new(),
            },
        );
        id
    }

    /// Destroy a spot or bed.
    pub fn destroy_thing(&mut self, id: ThingId) {
        if let Some(spot) = self.spots.get_mut(&id) {
            spot.destroyed = true;
            spot.spawned = false;
        }
        if let Some(bed) = self.beds.get_mut(&id) {
            bed.destroyed = true;
            bed.spawned = false;
            bed.occupants.clear();
        }
    }

    pub fn ignite(&mut self, bed: ThingId) {
        if let Some(bed) = self.beds.get_mut(&bed) {
            bed.burning = true;
        }
    }

    pub fn extinguish(&mut self, bed: ThingId) {
        if let Some(bed) = self.beds.get_mut(&bed) {
            bed.burning = false;
        }
    }

    /// Put `actor` into (or reserve) a bed slot. Fails when the bed is full.
    pub fn occupy(&mut self, bed: ThingId, actor: ActorId) -> bool {
        let Some(bed) = self.beds.get_mut(&bed) else {
            return false;
        };
        if bed.occupants.contains(&actor) {
            return true;
        }
        if bed.occupants.len() >= usize::from(bed.slots) {
            return false;
        }
        bed.occupants.push(actor);
        true
    }

    pub fn vacate(&mut self, bed: ThingId) {
        if let Some(bed) = self.beds.get_mut(&bed) {
            bed.occupants.clear();
        }
    }

    pub fn set_unreachable(&mut self, actor: ActorId, thing: ThingId) {
        self.unreachable.insert((actor, thing));
    }

    pub fn set_reachable(&mut self, actor: ActorId, thing: ThingId) {
        self.unreachable.remove(&(actor, thing));
    }

    /// Toggle whether loiter orders succeed at all.
    pub const fn set_spots_reachable(&mut self, reachable: bool) {
        self.spots_reachable = reachable;
    }

    /// Assign (or clear) the actor's current task, as the host scheduler would.
    pub fn set_task(&mut self, actor: ActorId, task: Option<TaskKind>) {
        match task {
            Some(task) => {
                self.tasks.insert(actor, task);
            }
            None => {
                self.tasks.remove(&actor);
            }
        }
    }

    #[must_use]
    pub fn current_task_of(&self, actor: ActorId) -> Option<TaskKind> {
        self.tasks.get(&actor).copied()
    }

    #[must_use]
    pub fn issued_loiters(&self) -> &[LoiterOrder] {
        &self.loiters
    }

    #[must_use]
    pub fn issued_fillers(&self) -> &[FillerOrder] {
        &self.fillers
    }

    #[must_use]
    pub fn bed(&self, id: ThingId) -> Option<&ResourceSnapshot> {
        self.beds.get(&id)
    }

    const fn allocate(&mut self) -> ThingId {
        let id = ThingId(self.next_thing);
        self.next_thing += 1;
        id
    }

    fn reachable(&self, actor: ActorId, thing: ThingId) -> bool {
        !self.unreachable.contains(&(actor, thing))
    }
}

impl WorldView for SandboxMap {
    fn now(&self) -> Tick {
        self.now
    }

    fn actor(&self, id: ActorId) -> Option<ActorSnapshot> {
        self.actors.get(&id).cloned()
    }

    fn actors(&self) -> Vec<ActorSnapshot> {
        self.actors
            .values()
            .filter(|actor| actor.spawned)
            .cloned()
            .collect()
    }

    fn current_task(&self, id: ActorId) -> Option<TaskKind> {
        self.current_task_of(id)
    }

    fn waiting_spots(&self) -> Vec<SpotSnapshot> {
        self.spots.values().copied().collect()
    }

    fn spot(&self, id: ThingId) -> Option<SpotSnapshot> {
        self.spots.get(&id).copied()
    }

    fn resource(&self, id: ThingId) -> Option<ResourceSnapshot> {
        self.beds.get(&id).cloned()
    }

    fn can_reach_and_reserve(&self, actor: ActorId, resource: ThingId) -> bool {
        self.beds.get(&resource).is_some_and(|bed| {
            bed.is_intact()
                && self.reachable(actor, resource)
                && (bed.occupants.contains(&actor) || bed.occupants.len() < usize::from(bed.slots))
        })
    }
}

impl TaskIssuer for SandboxMap {
    fn issue_loiter(&mut self, actor: ActorId, spot: ThingId, expiry: Tick) -> bool {
        let usable = self.spots.get(&spot).is_some_and(SpotSnapshot::is_usable);
        if !usable || !self.spots_reachable || !self.reachable(actor, spot) {
            return false;
        }
        self.tasks.insert(actor, TaskKind::LoiterNearSpot);
        self.loiters.push(LoiterOrder {
            tick: self.now,
            actor,
            spot,
            expiry,
        });
        true
    }

    fn interrupt_with_filler(&mut self, actor: ActorId, duration: Tick) {
        let replaced = self.tasks.insert(actor, TaskKind::Filler);
        self.fillers.push(FillerOrder {
            tick: self.now,
            actor,
            duration,
            replaced,
        });
    }
}

impl ResourceFinder for SandboxMap {
    fn find_free_resource(&self, provider: ActorId, client: ActorId) -> Option<ThingId> {
        let origin = self.actors.get(&provider)?.cell;
        self.beds
            .values()
            .filter(|bed| {
                bed.is_intact()
                    && !bed.occupied_by_third_party(client, provider)
                    && self.can_reach_and_reserve(provider, bed.id)
                    && self.can_reach_and_reserve(client, bed.id)
            })
            .min_by_key(|bed| (bed.cell.distance_squared(origin), bed.id))
            .map(|bed| bed.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROVIDER: ActorId = ActorId(1);
    const CLIENT: ActorId = ActorId(2);

    fn map() -> SandboxMap {
        let mut map = SandboxMap::new(0);
        map.add_actor(ActorSnapshot::colonist(PROVIDER, Cell::new(0, 0)));
        map.add_actor(ActorSnapshot::visitor(CLIENT, Cell::new(1, 1)));
        map
    }

    #[test]
    fn finder_prefers_nearest_free_bed() {
        let mut map = map();
        let far = map.add_bed(Cell::new(10, 10));
        let near = map.add_bed(Cell::new(2, 2));
        assert_eq!(map.find_free_resource(PROVIDER, CLIENT), Some(near));
        map.occupy(near, ActorId(99));
        assert_eq!(map.find_free_resource(PROVIDER, CLIENT), Some(far));
        map.ignite(far);
        assert_eq!(map.find_free_resource(PROVIDER, CLIENT), None);
    }

    #[test]
    fn beds_hold_two() {
        let mut map = map();
        let bed = map.add_bed(Cell::new(2, 2));
        assert!(map.occupy(bed, PROVIDER));
        assert!(map.occupy(bed, CLIENT));
        assert!(!map.occupy(bed, ActorId(3)));
        assert!(map.can_reach_and_reserve(PROVIDER, bed));
        assert!(!map.can_reach_and_reserve(ActorId(3), bed));
    }

    #[test]
    fn loiter_orders_respect_reachability() {
        let mut map = map();
        let spot = map.add_spot(Cell::new(0, 0));
        map.set_unreachable(CLIENT, spot);
        assert!(!map.issue_loiter(CLIENT, spot, 100));
        map.set_reachable(CLIENT, spot);
        assert!(map.issue_loiter(CLIENT, spot, 100));
        assert_eq!(map.current_task_of(CLIENT), Some(TaskKind::LoiterNearSpot));
        assert_eq!(map.issued_loiters().len(), 1);
    }

    #[test]
    fn filler_records_what_it_replaced() {
        let mut map = map();
        map.set_task(PROVIDER, Some(TaskKind::Intimacy));
        map.interrupt_with_filler(PROVIDER, 60);
        assert_eq!(map.current_task_of(PROVIDER), Some(TaskKind::Filler));
        assert_eq!(map.issued_fillers()[0].replaced, Some(TaskKind::Intimacy));
    }

    #[test]
    fn removed_actors_are_gone() {
        let mut map = map();
        map.remove_actor(CLIENT);
        assert!(map.actor(CLIENT).is_none());
        assert_eq!(map.actors().len(), 1);
        assert!(!map.update_actor(CLIENT, |actor| actor.downed = true));
    }
}
