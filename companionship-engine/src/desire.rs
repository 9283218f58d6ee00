//! Deterministic once-per-visit desire roll.
//!
//! Each visit gets its own stream, keyed by the tracker seed and the visit's
//! identity (actor and spawn tick). Re-running a poll over the same visit
//! always samples the same value.
use hmac::{Hmac, Mac};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sha2::Sha256;

use crate::actor::{ActorId, Tick};

const DESIRE_DOMAIN: &[u8] = b"desire";

/// Outcome of a desire roll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DesireRoll {
    pub roll: f32,
    pub wants: bool,
}

/// Seed for the desire stream of one visit.
#[must_use]
pub fn visit_seed(tracker_seed: u64, actor: ActorId, spawned_at: Tick) -> u64 {
    let mut mac = Hmac::<Sha256>::new_from_slice(&tracker_seed.to_le_bytes())
        .expect("64-bit seed is valid key");
    mac.update(DESIRE_DOMAIN);
    mac.update(&actor.0.to_le_bytes());
    mac.update(&spawned_at.to_le_bytes());
    let digest = mac.finalize().into_bytes();
    let mut seed_bytes = [0_u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed_bytes)
}

/// Sample the visit's desire; `wants` is `roll < chance`.
#[must_use]
pub fn roll_desire(tracker_seed: u64, actor: ActorId, spawned_at: Tick, chance: f32) -> DesireRoll {
    let mut rng = SmallRng::seed_from_u64(visit_seed(tracker_seed, actor, spawned_at));
    let roll = rng.gen_range(0.0_f32..1.0);
    DesireRoll {
        roll,
        wants: roll < chance,
    }
}
