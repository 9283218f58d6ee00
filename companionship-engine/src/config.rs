//! Tracker tuning.
//!
//! Every field has a serde default so partial JSON documents load cleanly.
//! Runtime tweaks go through [`TrackerConfigOverlay`], merged with
//! [`TrackerConfig::with_overlay`].
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actor::Tick;
use crate::record::VisitorPhase;

/// Expected duration of each in-pipeline phase before the validator gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDurations {
    #[serde(default = "PhaseDurations::default_greeting")]
    pub greeting: Tick,
    #[serde(default = "PhaseDurations::default_escorting")]
    pub escorting: Tick,
    #[serde(default = "PhaseDurations::default_at_bed")]
    pub at_bed: Tick,
}

impl PhaseDurations {
    const fn default_greeting() -> Tick {
        2_500
    }

    const fn default_escorting() -> Tick {
        15_000
    }

    const fn default_at_bed() -> Tick {
        7_500
    }

    #[must_use]
    pub const fn for_phase(&self, phase: VisitorPhase) -> Option<Tick> {
        match phase {
            VisitorPhase::Greeting => Some(self.greeting),
            VisitorPhase::Escorting => Some(self.escorting),
            VisitorPhase::AtBed => Some(self.at_bed),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), TrackerConfigError> {
        min_ticks("phase_durations.greeting", self.greeting, 1)?;
        min_ticks("phase_durations.escorting", self.escorting, 1)?;
        min_ticks("phase_durations.at_bed", self.at_bed, 1)?;
        Ok(())
    }

    fn sanitize(&mut self) {
        self.greeting = self.greeting.max(1);
        self.escorting = self.escorting.max(1);
        self.at_bed = self.at_bed.max(1);
    }
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            greeting: Self::default_greeting(),
            escorting: Self::default_escorting(),
            at_bed: Self::default_at_bed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Host ticks between two polls.
    #[serde(default = "TrackerConfig::default_poll_interval")]
    pub poll_interval_ticks: Tick,
    /// Cells around a waiting spot in which a visitor counts as waiting there.
    #[serde(default = "TrackerConfig::default_wait_radius")]
    pub wait_radius: i32,
    /// Ticks between discovery and the desire roll.
    #[serde(default = "TrackerConfig::default_desire_delay")]
    pub desire_delay_ticks: Tick,
    #[serde(default = "TrackerConfig::default_desire_chance")]
    pub desire_chance: f32,
    /// Cooldown after a failed session before the visitor waits again.
    #[serde(default = "TrackerConfig::default_retry_cooldown")]
    pub retry_cooldown_ticks: Tick,
    /// Minimum spacing between two loiter-task issues for the same visitor.
    #[serde(default = "TrackerConfig::default_force_task_cooldown")]
    pub force_task_cooldown_ticks: Tick,
    /// Expiry handed to the host with each loiter task.
    #[serde(default = "TrackerConfig::default_loiter_expiry")]
    pub loiter_expiry_ticks: Tick,
    /// How long another provider's claim blocks a new one.
    #[serde(default = "TrackerConfig::default_claim_grace")]
    pub claim_grace_ticks: Tick,
    /// Longest a session may stay in `Claimed` before timing out.
    #[serde(default = "TrackerConfig::default_max_claim")]
    pub max_claim_ticks: Tick,
    #[serde(default)]
    pub phase_durations: PhaseDurations,
    /// Extra ticks granted beyond each phase duration.
    #[serde(default = "TrackerConfig::default_phase_slack")]
    pub phase_timeout_slack_ticks: Tick,
    #[serde(default = "TrackerConfig::default_unreachable_backoff")]
    pub unreachable_backoff_ticks: Tick,
    #[serde(default = "TrackerConfig::default_provider_retry_backoff")]
    pub provider_retry_backoff_ticks: Tick,
    /// Duration of the filler task used to flush lingering pipeline tasks.
    #[serde(default = "TrackerConfig::default_filler_task")]
    pub filler_task_ticks: Tick,
    #[serde(default = "TrackerConfig::default_event_journal_capacity")]
    pub event_journal_capacity: usize,
}

impl TrackerConfig {
    #[must_use]
    pub const fn default_poll_interval() -> Tick {
        60
    }

    #[must_use]
    pub const fn default_wait_radius() -> i32 {
        7
    }

    #[must_use]
    pub const fn default_desire_delay() -> Tick {
        10_000
    }

    #[must_use]
    pub const fn default_desire_chance() -> f32 {
        0.35
    }

    #[must_use]
    pub const fn default_retry_cooldown() -> Tick {
        5_000
    }

    #[must_use]
    pub const fn default_force_task_cooldown() -> Tick {
        500
    }

    #[must_use]
    pub const fn default_loiter_expiry() -> Tick {
        20_000
    }

    #[must_use]
    pub const fn default_claim_grace() -> Tick {
        2_500
    }

    #[must_use]
    pub const fn default_max_claim() -> Tick {
        20_000
    }

    #[must_use]
    pub const fn default_phase_slack() -> Tick {
        2_500
    }

    #[must_use]
    pub const fn default_unreachable_backoff() -> Tick {
        2_500
    }

    #[must_use]
    pub const fn default_provider_retry_backoff() -> Tick {
        250
    }

    #[must_use]
    pub const fn default_filler_task() -> Tick {
        60
    }

    #[must_use]
    pub const fn default_event_journal_capacity() -> usize {
        256
    }

    /// Parse a JSON document and validate it.
    ///
    /// # Errors
    ///
    /// Returns `TrackerConfigError::Parse` for malformed JSON and the matching
    /// bound violation when a field is out of range.
    pub fn from_json(json: &str) -> Result<Self, TrackerConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|err| TrackerConfigError::Parse {
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns `TrackerConfigError` when any field violates its bounds.
    pub fn validate(&self) -> Result<(), TrackerConfigError> {
        min_ticks("poll_interval_ticks", self.poll_interval_ticks, 1)?;
        if self.wait_radius < 1 {
            return Err(TrackerConfigError::MinViolation {
                field: "wait_radius",
                min: 1,
                value: i64::from(self.wait_radius),
            });
        }
        min_ticks("desire_delay_ticks", self.desire_delay_ticks, 0)?;
        if !(0.0..=1.0).contains(&self.desire_chance) {
            return Err(TrackerConfigError::RangeViolation {
                field: "desire_chance",
                min: 0.0,
                max: 1.0,
                value: self.desire_chance,
            });
        }
        min_ticks("retry_cooldown_ticks", self.retry_cooldown_ticks, 0)?;
        min_ticks("force_task_cooldown_ticks", self.force_task_cooldown_ticks, 0)?;
        min_ticks("loiter_expiry_ticks", self.loiter_expiry_ticks, 1)?;
        min_ticks("claim_grace_ticks", self.claim_grace_ticks, 0)?;
        min_ticks("max_claim_ticks", self.max_claim_ticks, 1)?;
        self.phase_durations.validate()?;
        min_ticks("phase_timeout_slack_ticks", self.phase_timeout_slack_ticks, 0)?;
        min_ticks("unreachable_backoff_ticks", self.unreachable_backoff_ticks, 0)?;
        min_ticks(
            "provider_retry_backoff_ticks",
            self.provider_retry_backoff_ticks,
            0,
        )?;
        min_ticks("filler_task_ticks", self.filler_task_ticks, 1)?;
        if self.event_journal_capacity == 0 {
            return Err(TrackerConfigError::MinViolation {
                field: "event_journal_capacity",
                min: 1,
                value: 0,
            });
        }
        Ok(())
    }

    /// Clamp every field into its valid range.
    pub fn sanitize(&mut self) {
        self.poll_interval_ticks = self.poll_interval_ticks.max(1);
        self.wait_radius = self.wait_radius.max(1);
        self.desire_delay_ticks = self.desire_delay_ticks.max(0);
        self.desire_chance = if self.desire_chance.is_finite() {
            self.desire_chance.clamp(0.0, 1.0)
        } else {
            Self::default_desire_chance()
        };
        self.retry_cooldown_ticks = self.retry_cooldown_ticks.max(0);
        self.force_task_cooldown_ticks = self.force_task_cooldown_ticks.max(0);
        self.loiter_expiry_ticks = self.loiter_expiry_ticks.max(1);
        self.claim_grace_ticks = self.claim_grace_ticks.max(0);
        self.max_claim_ticks = self.max_claim_ticks.max(1);
        self.phase_durations.sanitize();
        self.phase_timeout_slack_ticks = self.phase_timeout_slack_ticks.max(0);
        self.unreachable_backoff_ticks = self.unreachable_backoff_ticks.max(0);
        self.provider_retry_backoff_ticks = self.provider_retry_backoff_ticks.max(0);
        self.filler_task_ticks = self.filler_task_ticks.max(1);
        self.event_journal_capacity = self.event_journal_capacity.max(1);
    }

    #[must_use]
    pub fn with_overlay(&self, overlay: &TrackerConfigOverlay) -> Self {
        let mut merged = self.clone();
        if let Some(value) = overlay.poll_interval_ticks {
            merged.poll_interval_ticks = value;
        }
        if let Some(value) = overlay.wait_radius {
            merged.wait_radius = value;
        }
        if let Some(value) = overlay.desire_delay_ticks {
            merged.desire_delay_ticks = value;
        }
        if let Some(value) = overlay.desire_chance {
            merged.desire_chance = value;
        }
        if let Some(value) = overlay.retry_cooldown_ticks {
            merged.retry_cooldown_ticks = value;
        }
        if let Some(value) = overlay.force_task_cooldown_ticks {
            merged.force_task_cooldown_ticks = value;
        }
        if let Some(value) = overlay.loiter_expiry_ticks {
            merged.loiter_expiry_ticks = value;
        }
        if let Some(value) = overlay.claim_grace_ticks {
            merged.claim_grace_ticks = value;
        }
        if let Some(value) = overlay.max_claim_ticks {
            merged.max_claim_ticks = value;
        }
        if let Some(durations) = overlay.phase_durations {
            merged.phase_durations = durations;
        }
        if let Some(value) = overlay.phase_timeout_slack_ticks {
            merged.phase_timeout_slack_ticks = value;
        }
        if let Some(value) = overlay.unreachable_backoff_ticks {
            merged.unreachable_backoff_ticks = value;
        }
        if let Some(value) = overlay.provider_retry_backoff_ticks {
            merged.provider_retry_backoff_ticks = value;
        }
        if let Some(value) = overlay.filler_task_ticks {
            merged.filler_task_ticks = value;
        }
        merged
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ticks: Self::default_poll_interval(),
            wait_radius: Self::default_wait_radius(),
            desire_delay_ticks: Self::default_desire_delay(),
            desire_chance: Self::default_desire_chance(),
            retry_cooldown_ticks: Self::default_retry_cooldown(),
            force_task_cooldown_ticks: Self::default_force_task_cooldown(),
            loiter_expiry_ticks: Self::default_loiter_expiry(),
            claim_grace_ticks: Self::default_claim_grace(),
            max_claim_ticks: Self::default_max_claim(),
            phase_durations: PhaseDurations::default(),
            phase_timeout_slack_ticks: Self::default_phase_slack(),
            unreachable_backoff_ticks: Self::default_unreachable_backoff(),
            provider_retry_backoff_ticks: Self::default_provider_retry_backoff(),
            filler_task_ticks: Self::default_filler_task(),
            event_journal_capacity: Self::default_event_journal_capacity(),
        }
    }
}

/// Partial override applied on top of an effective [`TrackerConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfigOverlay {
    pub poll_interval_ticks: Option<Tick>,
    pub wait_radius: Option<i32>,
    pub desire_delay_ticks: Option<Tick>,
    pub desire_chance: Option<f32>,
    pub retry_cooldown_ticks: Option<Tick>,
    pub force_task_cooldown_ticks: Option<Tick>,
    pub loiter_expiry_ticks: Option<Tick>,
    pub claim_grace_ticks: Option<Tick>,
    pub max_claim_ticks: Option<Tick>,
    pub phase_durations: Option<PhaseDurations>,
    pub phase_timeout_slack_ticks: Option<Tick>,
    pub unreachable_backoff_ticks: Option<Tick>,
    pub provider_retry_backoff_ticks: Option<Tick>,
    pub filler_task_ticks: Option<Tick>,
}

impl TrackerConfigOverlay {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Errors raised when tracker configuration invariants are violated.
#[derive(Debug, Error, PartialEq)]
pub enum TrackerConfigError {
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: i64,
        value: i64,
    },
    #[error("{field} must be between {min:.2} and {max:.2} (got {value:.2})")]
    RangeViolation {
        field: &'static str,
        min: f32,
        max: f32,
        value: f32,
    },
    #[error("tracker config is not valid JSON: {message}")]
    Parse { message: String },
}

fn min_ticks(field: &'static str, value: Tick, min: Tick) -> Result<(), TrackerConfigError> {
    if value < min {
        return Err(TrackerConfigError::MinViolation { field, min, value });
    }
    Ok(())
}
