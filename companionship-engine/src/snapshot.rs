//! Persistence shapes for the tracker.
//!
//! A snapshot carries everything needed to resume: records, sessions and the
//! retry ledger. Restoring repairs dangling claims instead of failing; only a
//! structurally impossible state is rejected.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actor::{ActorId, Tick};
use crate::config::{TrackerConfig, TrackerConfigError};
use crate::eligibility::EligibilityRules;
use crate::events::{EventKind, EventSeverity};
use crate::host::RewardHook;
use crate::ledger::{CooldownEntry, CooldownLedger};
use crate::record::{VisitorPhase, VisitorRecord};
use crate::session::Session;
use crate::tracker::CompanionshipTracker;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub version: u32,
    pub seed: u64,
    #[serde(default)]
    pub config: TrackerConfig,
    #[serde(default)]
    pub records: Vec<VisitorRecord>,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub ledger: Vec<CooldownEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_poll_tick: Option<Tick>,
}

impl TrackerSnapshot {
    /// # Errors
    ///
    /// Returns `SnapshotError::Json` when serialization fails.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|err| SnapshotError::Json(err.to_string()))
    }

    /// # Errors
    ///
    /// Returns `SnapshotError::Json` for malformed documents.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(json).map_err(|err| SnapshotError::Json(err.to_string()))
    }
}

/// What restore had to fix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub records: usize,
    pub sessions: usize,
    /// Claims without a matching active session that were cleared.
    pub claims_repaired: Vec<ActorId>,
    /// Active sessions whose client had no record; a record was recreated.
    pub records_recreated: Vec<ActorId>,
}

impl RestoreReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.claims_repaired.is_empty() && self.records_recreated.is_empty()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("client {client} has more than one session in the snapshot")]
    DuplicateSession { client: ActorId },
    #[error("provider {provider} serves more than one active session in the snapshot")]
    ProviderOverbooked { provider: ActorId },
    #[error("snapshot config is invalid: {0}")]
    Config(#[from] TrackerConfigError),
    #[error("snapshot JSON error: {0}")]
    Json(String),
}

impl<E: EligibilityRules, R: RewardHook> CompanionshipTracker<E, R> {
    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            version: SNAPSHOT_VERSION,
            seed: self.seed,
            config: self.config.clone(),
            records: self.records.values().cloned().collect(),
            sessions: self.sessions.values().cloned().collect(),
            ledger: self.ledger.entries(),
            last_poll_tick: self.last_poll_tick,
        }
    }

    /// Replace the tracker state with `snapshot`.
    ///
    /// Nothing changes when an error is returned.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` for unknown versions, invalid configuration,
    /// or two sessions for the same client or provider.
    pub fn restore(&mut self, snapshot: TrackerSnapshot) -> Result<RestoreReport, SnapshotError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        snapshot.config.validate()?;

        let mut sessions = BTreeMap::new();
        let mut busy_providers = BTreeSet::new();
        for session in snapshot.sessions {
            if session.is_active() && !busy_providers.insert(session.provider) {
                return Err(SnapshotError::ProviderOverbooked {
                    provider: session.provider,
                });
            }
            let client = session.client;
            if sessions.insert(client, session).is_some() {
                return Err(SnapshotError::DuplicateSession { client });
            }
        }

        let mut records: BTreeMap<ActorId, VisitorRecord> = snapshot
            .records
            .into_iter()
            .map(|record| (record.actor, record))
            .collect();
        let mut report = RestoreReport::default();

        for session in sessions.values().filter(|session| session.is_active()) {
            let record = records.entry(session.client).or_insert_with(|| {
                report.records_recreated.push(session.client);
                let mut record = VisitorRecord::new(session.client, session.started_tick);
                record.rolled = true;
                record.wants_encounter = true;
                record
            });
            record.claimed_by = Some(session.provider);
            if record.claimed_at_tick.is_none() {
                record.claimed_at_tick = Some(session.started_tick);
            }
            record.phase = session.phase;
        }

        for record in records.values_mut() {
            let has_session = sessions
                .get(&record.actor)
                .is_some_and(Session::is_active);
            if has_session {
                continue;
            }
            if record.claimed_by.is_some() || record.phase.is_claimed() {
                record.clear_claim();
                if record.phase.is_claimed() {
                    record.phase = record.resting_phase();
                }
                report.claims_repaired.push(record.actor);
            }
            if record.phase == VisitorPhase::Cooldown && record.cooldown_until_tick.is_none() {
                record.phase = record.resting_phase();
            }
        }

        report.records = records.len();
        report.sessions = sessions.len();
        self.journal.set_capacity(snapshot.config.event_journal_capacity);
        self.config = snapshot.config;
        self.seed = snapshot.seed;
        self.records = records;
        self.sessions = sessions;
        self.ledger = CooldownLedger::from_entries(&snapshot.ledger);
        self.last_poll_tick = snapshot.last_poll_tick;

        let now = self.last_poll_tick.unwrap_or_default();
        for actor in report
            .claims_repaired
            .iter()
            .chain(&report.records_recreated)
            .copied()
            .collect::<Vec<_>>()
        {
            log::warn!("{actor}: repaired while restoring tracker snapshot");
            self.emit(now, EventKind::RestoreRepaired, actor, |event| {
                event.with_severity(EventSeverity::Warning)
            });
        }
        Ok(report)
    }
}
