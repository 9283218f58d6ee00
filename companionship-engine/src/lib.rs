//! Companionship Engine
//!
//! Platform-agnostic visitor tracking, claim arbitration and session
//! validation for two-actor companionship encounters. The host simulation is
//! reached only through the traits in [`host`]; this crate owns no actors.

pub mod actor;
pub mod arbiter;
pub mod config;
pub mod desire;
pub mod eligibility;
pub mod events;
pub mod host;
pub mod ledger;
pub mod record;
pub mod registry;
pub mod sandbox;
pub mod session;
pub mod snapshot;
pub mod tracker;
pub mod validator;

// Re-export commonly used types
pub use actor::{
    ActorId, ActorSnapshot, Cell, FactionStance, GuestStatus, ThingId, Tick, VisitPurpose,
};
pub use config::{PhaseDurations, TrackerConfig, TrackerConfigError, TrackerConfigOverlay};
pub use desire::{DesireRoll, roll_desire, visit_seed};
pub use eligibility::{
    EligibilityRules, StandardEligibility, is_present, is_valid_client, is_valid_provider,
    provider_feature_enabled,
};
pub use events::{EventId, EventJournal, EventKind, EventSeverity, TrackerEvent};
pub use host::{
    Host, NoReward, RecordingReward, ResourceFinder, ResourceSnapshot, RewardGrant, RewardHook,
    SpotSnapshot, TaskIssuer, TaskKind, WorldView,
};
pub use ledger::{BackoffKind, CooldownEntry, CooldownLedger};
pub use record::{VisitorPhase, VisitorRecord};
pub use sandbox::SandboxMap;
pub use session::{EndReason, PhaseTicks, Session};
pub use snapshot::{RestoreReport, SNAPSHOT_VERSION, SnapshotError, TrackerSnapshot};
pub use tracker::{CompanionshipTracker, PollSummary};
pub use validator::{evaluate_session, expected_tasks};

/// Source of the tracker configuration.
/// Platform-specific implementations should provide this
pub trait ConfigLoader {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the effective tracker configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or parsed.
    fn load_tracker_config(&self) -> Result<TrackerConfig, Self::Error>;
}

/// Trait for abstracting save/load of tracker snapshots
pub trait TrackerStorage {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Save a tracker snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be saved.
    fn save_snapshot(&self, slot: &str, snapshot: &TrackerSnapshot) -> Result<(), Self::Error>;

    /// Load a tracker snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded.
    fn load_snapshot(&self, slot: &str) -> Result<Option<TrackerSnapshot>, Self::Error>;

    /// Delete a saved snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be deleted.
    fn delete_snapshot(&self, slot: &str) -> Result<(), Self::Error>;
}

/// Entry point tying configuration loading and persistence to trackers
pub struct CompanionshipEngine<L, S>
where
    L: ConfigLoader,
    S: TrackerStorage,
{
    config_loader: L,
    storage: S,
}

impl<L, S> CompanionshipEngine<L, S>
where
    L: ConfigLoader,
    S: TrackerStorage,
{
    pub const fn new(config_loader: L, storage: S) -> Self {
        Self {
            config_loader,
            storage,
        }
    }

    /// Create a fresh tracker for one managed area
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or is invalid.
    pub fn create_tracker(&self, seed: u64) -> Result<CompanionshipTracker, anyhow::Error>
    where
        L::Error: Into<anyhow::Error>,
    {
        let config = self.config_loader.load_tracker_config().map_err(Into::into)?;
        Ok(CompanionshipTracker::new(config, seed)?)
    }

    /// Save the tracker state under `slot`
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be saved.
    pub fn save_tracker<E, R>(
        &self,
        slot: &str,
        tracker: &CompanionshipTracker<E, R>,
    ) -> Result<(), S::Error>
    where
        E: EligibilityRules,
        R: RewardHook,
    {
        self.storage.save_snapshot(slot, &tracker.snapshot())
    }

    /// Load the tracker saved under `slot`
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded or restored.
    pub fn load_tracker(&self, slot: &str) -> Result<Option<CompanionshipTracker>, anyhow::Error>
    where
        S::Error: Into<anyhow::Error>,
    {
        let Some(snapshot) = self.storage.load_snapshot(slot).map_err(Into::into)? else {
            return Ok(None);
        };
        let mut tracker = CompanionshipTracker::new(snapshot.config.clone(), snapshot.seed)?;
        let report = tracker.restore(snapshot)?;
        if !report.is_clean() {
            log::warn!(
                "restored tracker from {slot} with {} repaired claims and {} recreated records",
                report.claims_repaired.len(),
                report.records_recreated.len()
            );
        }
        Ok(Some(tracker))
    }

    /// Delete the tracker saved under `slot`
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be deleted.
    pub fn delete_tracker(&self, slot: &str) -> Result<(), S::Error> {
        self.storage.delete_snapshot(slot)
    }
}
