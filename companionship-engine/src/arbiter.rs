//! Claim arbitration and session lifecycle operations.
//!
//! These are the entry points drivers call between polls. `try_claim` is the
//! only way a session comes into existence, and `finish_session` is the only
//! way one ends.
use serde_json::json;

use crate::actor::{ActorId, ThingId, Tick};
use crate::eligibility::EligibilityRules;
use crate::events::{EventKind, EventSeverity};
use crate::host::{RewardHook, WorldView};
use crate::ledger::BackoffKind;
use crate::record::VisitorPhase;
use crate::session::{EndReason, Session};
use crate::tracker::CompanionshipTracker;

impl<E: EligibilityRules, R: RewardHook> CompanionshipTracker<E, R> {
    #[must_use]
    pub fn has_active_session(&self, client: ActorId) -> bool {
        self.sessions.get(&client).is_some_and(Session::is_active)
    }

    /// The session for `client`, including one that ended but was not swept yet.
    #[must_use]
    pub fn session(&self, client: ActorId) -> Option<&Session> {
        self.sessions.get(&client)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    /// Resource bound to the client's active session.
    #[must_use]
    pub fn session_resource(&self, client: ActorId) -> Option<ThingId> {
        self.sessions
            .get(&client)
            .filter(|session| session.is_active())
            .and_then(|session| session.target_resource)
    }

    /// Active session in which `provider` is serving.
    #[must_use]
    pub fn session_for_provider(&self, provider: ActorId) -> Option<&Session> {
        self.sessions
            .values()
            .find(|session| session.is_active() && session.provider == provider)
    }

    /// Nearest waiting client `provider` could claim at `location`.
    #[must_use]
    pub fn find_eligible_waiting_client<W: WorldView + ?Sized>(
        &self,
        world: &W,
        location: ThingId,
        provider: ActorId,
    ) -> Option<ActorId> {
        let now = world.now();
        if !self.provider_is_ready(world, provider)
            || !self.ledger.is_ready(provider, BackoffKind::ProviderRetry, now)
            || self.session_for_provider(provider).is_some()
        {
            return None;
        }
        let provider_cell = world.actor(provider)?.cell;
        let spot = world.spot(location).filter(|spot| spot.is_usable())?;
        let radius = i64::from(self.config.wait_radius);
        let grace = self.config.claim_grace_ticks;

        self.records
            .values()
            .filter(|record| {
                record.wants_encounter
                    && record.phase == VisitorPhase::WaitingNearSpot
                    && !record.claim_blocks(provider, now, grace)
                    && !self.has_active_session(record.actor)
            })
            .filter_map(|record| {
                let snapshot = world.actor(record.actor)?;
                let usable = self.eligibility.is_present(&snapshot)
                    && self.eligibility.may_be_client(&snapshot)
                    && !snapshot.is_incapacitated();
                let to_spot = snapshot.cell.distance_squared(spot.cell);
                (usable && to_spot <= radius * radius).then(|| {
                    let to_provider = snapshot.cell.distance_squared(provider_cell);
                    (to_provider, to_spot, record.actor)
                })
            })
            .min()
            .map(|(_, _, actor)| actor)
    }

    /// Claim `client` for `provider` and open a session.
    pub fn try_claim<W: WorldView + ?Sized>(
        &mut self,
        world: &W,
        client: ActorId,
        provider: ActorId,
    ) -> bool {
        let now = world.now();
        if client == provider || self.has_active_session(client) {
            return false;
        }
        if !self.client_is_valid(world, client) || !self.provider_is_ready(world, provider) {
            return false;
        }
        if self
            .session_for_provider(provider)
            .is_some_and(|session| session.client != client)
        {
            return false;
        }
        let grace = self.config.claim_grace_ticks;
        let Some(record) = self.records.get(&client) else {
            return false;
        };
        if !record.wants_encounter
            || record.phase != VisitorPhase::WaitingNearSpot
            || record.claim_blocks(provider, now, grace)
        {
            return false;
        }

        let location = world.actor(client).and_then(|snapshot| {
            world
                .waiting_spots()
                .into_iter()
                .filter(|spot| spot.is_usable())
                .min_by_key(|spot| (spot.cell.distance_squared(snapshot.cell), spot.id))
                .map(|spot| spot.id)
        });

        let Some(record) = self.records.get_mut(&client) else {
            return false;
        };
        if let Some(previous) = record.claimed_by.filter(|owner| *owner != provider) {
            log::warn!("{client}: overriding abandoned claim by {previous}");
        }
        record.claimed_by = Some(provider);
        record.claimed_at_tick = Some(now);
        record.phase = VisitorPhase::Claimed;
        self.sessions
            .insert(client, Session::new(client, provider, location, now));
        log::info!("{client}: claimed by {provider} at {now}");
        self.emit(now, EventKind::Claimed, client, |event| {
            event
                .with_counterpart(provider)
                .with_phase(VisitorPhase::Claimed)
        });
        true
    }

    /// Give the claim back. No-op unless `provider` owns it.
    pub fn release<W: WorldView + ?Sized>(
        &mut self,
        world: &W,
        client: ActorId,
        provider: ActorId,
    ) -> bool {
        let now = world.now();
        let owned = self
            .records
            .get(&client)
            .is_some_and(|record| record.claimed_by == Some(provider));
        if !owned {
            return false;
        }
        if self.has_active_session(client) {
            return self.finish_session(world, client, EndReason::Released, now);
        }
        let valid = self.client_is_valid(world, client);
        let Some(record) = self.records.get_mut(&client) else {
            return false;
        };
        record.clear_claim();
        record.phase = if valid {
            record.resting_phase()
        } else {
            VisitorPhase::None
        };
        let phase = record.phase;
        log::info!("{client}: released by {provider}");
        self.emit(now, EventKind::Released, client, |event| {
            event.with_counterpart(provider).with_phase(phase)
        });
        true
    }

    /// Advance the client's phase.
    ///
    /// With an active session only claimed phases are accepted and the session
    /// follows. Without one, claimed phases are refused.
    pub fn set_phase<W: WorldView + ?Sized>(
        &mut self,
        world: &W,
        client: ActorId,
        phase: VisitorPhase,
    ) -> bool {
        let now = world.now();
        let active = self.has_active_session(client);
        if active != phase.is_claimed() {
            return false;
        }
        let retry = self.config.retry_cooldown_ticks;
        let Some(record) = self.records.get_mut(&client) else {
            return false;
        };
        if active {
            let Some(session) = self.sessions.get_mut(&client) else {
                return false;
            };
            if !session.set_phase(phase, now) {
                return false;
            }
        } else if phase == VisitorPhase::Cooldown {
            record.cooldown_until_tick = Some(now.saturating_add(retry));
        } else {
            record.cooldown_until_tick = None;
        }
        let previous = record.phase;
        record.phase = phase;
        if previous != phase {
            log::debug!("{client}: {previous} -> {phase}");
            self.emit(now, EventKind::PhaseChanged, client, |event| {
                event.with_phase(phase)
            });
        }
        true
    }

    /// Attach the shared resource to the client's active session.
    pub fn bind_resource<W: WorldView + ?Sized>(
        &mut self,
        world: &W,
        client: ActorId,
        resource: ThingId,
    ) -> bool {
        let Some(session) = self
            .sessions
            .get_mut(&client)
            .filter(|session| session.is_active())
        else {
            return false;
        };
        session.target_resource = Some(resource);
        let provider = session.provider;
        log::debug!("{client}: bound {resource}");
        self.emit(world.now(), EventKind::ResourceBound, client, |event| {
            event
                .with_counterpart(provider)
                .with_payload(json!({ "resource": resource.0 }))
        });
        true
    }

    /// End the session successfully and grant the reward.
    pub fn complete_session<W: WorldView + ?Sized>(
        &mut self,
        world: &W,
        client: ActorId,
        provider: ActorId,
    ) -> bool {
        let matches = self
            .sessions
            .get(&client)
            .is_some_and(|session| session.is_active() && session.provider == provider);
        matches && self.finish_session(world, client, EndReason::Success, world.now())
    }

    /// End the client's session with `reason`; false if there was none to end.
    pub fn try_end_session<W: WorldView + ?Sized>(
        &mut self,
        world: &W,
        client: ActorId,
        reason: EndReason,
    ) -> bool {
        self.finish_session(world, client, reason, world.now())
    }

    /// Terminate the session and apply the record consequences.
    pub(crate) fn finish_session<W: WorldView + ?Sized>(
        &mut self,
        world: &W,
        client: ActorId,
        reason: EndReason,
        now: Tick,
    ) -> bool {
        let client_valid = self.client_is_valid(world, client);
        let Some(session) = self.sessions.get_mut(&client) else {
            return false;
        };
        if !session.end(reason, now) {
            return false;
        }
        let provider = session.provider;

        if let Some(record) = self.records.get_mut(&client) {
            record.clear_claim();
            record.last_session_end_tick = Some(now);
            record.last_session_end_reason = Some(reason);
            if reason.is_success() {
                record.wants_encounter = false;
                record.phase = VisitorPhase::None;
                record.cooldown_until_tick = None;
            } else if record.wants_encounter && client_valid {
                record.phase = VisitorPhase::Cooldown;
                record.cooldown_until_tick =
                    Some(now.saturating_add(self.config.retry_cooldown_ticks));
            } else {
                record.phase = record.resting_phase();
                record.cooldown_until_tick = None;
            }
        }

        let mut rewarded = false;
        if reason.is_success() {
            if !session.rewarded {
                session.rewarded = true;
                self.reward.on_success(client, provider, session);
                rewarded = true;
            }
        } else {
            self.ledger.arm(
                provider,
                BackoffKind::ProviderRetry,
                now,
                self.config.provider_retry_backoff_ticks,
            );
        }

        let severity = match reason {
            EndReason::Success | EndReason::Released => EventSeverity::Info,
            _ => EventSeverity::Warning,
        };
        if severity == EventSeverity::Info {
            log::info!("{client}: session with {provider} ended ({reason})");
        } else {
            log::warn!("{client}: session with {provider} ended ({reason})");
        }
        self.emit(now, EventKind::SessionEnded, client, |event| {
            event
                .with_counterpart(provider)
                .with_reason(reason)
                .with_severity(severity)
        });
        if rewarded {
            self.emit(now, EventKind::Rewarded, client, |event| {
                event.with_counterpart(provider)
            });
        }
        true
    }
}
