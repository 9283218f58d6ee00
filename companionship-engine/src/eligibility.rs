//! Role eligibility predicates.
//!
//! The free functions are the standard rules; trackers consume them through
//! [`EligibilityRules`] so hosts can substitute their own policy.
use crate::actor::{ActorSnapshot, FactionStance, GuestStatus, VisitPurpose};

/// Present on the managed area, alive, and humanlike.
#[must_use]
pub const fn is_present(actor: &ActorSnapshot) -> bool {
    actor.spawned && !actor.destroyed && !actor.dead && actor.humanlike
}

/// Whether the actor may be tracked as a client right now.
#[must_use]
pub const fn is_valid_client(actor: &ActorSnapshot) -> bool {
    if !is_present(actor) {
        return false;
    }
    if !matches!(actor.faction, FactionStance::Friendly) {
        return false;
    }
    if actor.trader {
        return false;
    }
    match actor.guest {
        GuestStatus::Prisoner | GuestStatus::Slave => false,
        GuestStatus::Guest => true,
        GuestStatus::None => matches!(actor.visit, VisitPurpose::Visiting | VisitPurpose::Trading),
    }
}

/// Whether the actor may act as a provider right now (feature gate excluded).
#[must_use]
pub const fn is_valid_provider(actor: &ActorSnapshot) -> bool {
    is_present(actor)
        && matches!(actor.faction, FactionStance::Player)
        && matches!(actor.guest, GuestStatus::None)
}

/// Provider-side feature toggle.
#[must_use]
pub const fn provider_feature_enabled(actor: &ActorSnapshot) -> bool {
    actor.work_enabled
}

/// Injected predicate set deciding who may take part in an encounter.
pub trait EligibilityRules {
    /// Present, alive and humanlike on the managed area.
    fn is_present(&self, actor: &ActorSnapshot) -> bool {
        is_present(actor)
    }

    fn may_be_client(&self, actor: &ActorSnapshot) -> bool;

    fn may_be_provider(&self, actor: &ActorSnapshot) -> bool;

    fn provider_feature_enabled(&self, actor: &ActorSnapshot) -> bool {
        provider_feature_enabled(actor)
    }
}

/// Default rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StandardEligibility {
    /// Let caravan traders become clients (off by default; their pack animals follow them indoors).
    pub allow_traders: bool,
}

impl EligibilityRules for StandardEligibility {
    fn may_be_client(&self, actor: &ActorSnapshot) -> bool {
        if self.allow_traders && actor.trader {
            let mut relaxed = actor.clone();
            relaxed.trader = false;
            return is_valid_client(&relaxed);
        }
        is_valid_client(actor)
    }

    fn may_be_provider(&self, actor: &ActorSnapshot) -> bool {
        is_valid_provider(actor)
    }
}
