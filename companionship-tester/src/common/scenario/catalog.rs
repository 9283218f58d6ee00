use anyhow::Result;

use companionship_engine::{EndReason, TrackerConfigOverlay};

use crate::common::scenario::SimulationScenario;
use crate::logic::simulation::{DisruptionKind, SimulationPlan, SimulationSummary};

pub fn catalog_scenarios() -> Vec<SimulationScenario> {
    vec![
        SimulationScenario::new(
            "happy-path",
            "Happy Path",
            "Two providers serve three visitors without interference",
            SimulationPlan::new(2, 3)
                .with_beds(3)
                .with_duration(15_000)
                .with_overlay(eager())
                .with_expectation(every_visit_succeeds(3))
                .with_expectation(rewards_match_successes),
        ),
        SimulationScenario::new(
            "claim-timeout",
            "Claim Timeout",
            "A provider claims and never shows up; the claim expires and the visitor waits again",
            SimulationPlan::new(1, 1)
                .with_overlay(TrackerConfigOverlay {
                    max_claim_ticks: Some(3_000),
                    ..eager()
                })
                .with_stalled_providers()
                .with_expectation(claim_timeout_expectation)
                .with_expectation(rewards_match_successes),
        ),
        SimulationScenario::new(
            "provider-destroyed",
            "Provider Destroyed",
            "The provider dies mid-greeting and another provider finishes the visit",
            SimulationPlan::new(2, 1)
                .with_beds(2)
                .with_overlay(eager())
                .with_disruption(900, DisruptionKind::DestroyProvider)
                .with_expectation(recovers_after(EndReason::ProviderInvalid)),
        ),
        SimulationScenario::new(
            "resource-burned",
            "Resource Burned",
            "The bound bed catches fire during the escort",
            SimulationPlan::new(1, 1)
                .with_beds(2)
                .with_overlay(eager())
                .with_disruption(1_600, DisruptionKind::IgniteBed)
                .with_expectation(recovers_after(EndReason::ResourceInvalid)),
        ),
        SimulationScenario::new(
            "work-disabled",
            "Work Disabled",
            "The provider's companionship work is switched off mid-session",
            SimulationPlan::new(2, 1)
                .with_beds(2)
                .with_overlay(eager())
                .with_disruption(900, DisruptionKind::DisableWork)
                .with_expectation(recovers_after(EndReason::ProviderFeatureDisabled)),
        ),
        SimulationScenario::new(
            "client-yanked",
            "Client Yanked",
            "The visitor is pulled onto an unrelated task during the greeting",
            SimulationPlan::new(1, 1)
                .with_overlay(eager())
                .with_disruption(900, DisruptionKind::YankClient)
                .with_expectation(recovers_after(EndReason::ClientPulledFromPipeline)),
        ),
        SimulationScenario::new(
            "spot-destroyed",
            "Spot Destroyed",
            "The waiting spot is destroyed before the greeting starts",
            SimulationPlan::new(1, 1)
                .with_overlay(eager())
                .with_disruption(700, DisruptionKind::DestroySpot)
                .with_expectation(recovers_after(EndReason::LocationInvalid)),
        ),
        SimulationScenario::new(
            "contention",
            "Contention",
            "Five providers compete for two visitors",
            SimulationPlan::new(5, 2)
                .with_beds(2)
                .with_overlay(eager())
                .with_expectation(contention_expectation),
        ),
        SimulationScenario::new(
            "soak",
            "Soak",
            "Arrivals and random disruptions over a long run",
            SimulationPlan::new(3, 4)
                .with_beds(3)
                .with_duration(60_000)
                .with_overlay(eager())
                .with_arrivals(3_000)
                .with_random_disruptions(4_000)
                .with_expectation(soak_expectation)
                .with_expectation(rewards_match_successes),
        ),
    ]
}

fn eager() -> TrackerConfigOverlay {
    TrackerConfigOverlay {
        desire_delay_ticks: Some(600),
        desire_chance: Some(1.0),
        retry_cooldown_ticks: Some(1_500),
        ..TrackerConfigOverlay::default()
    }
}

fn every_visit_succeeds(visits: usize) -> impl Fn(&SimulationSummary) -> Result<()> + Send + Sync {
    move |summary| {
        anyhow::ensure!(
            summary.successes() == visits,
            "expected {visits} successful sessions, got {}",
            summary.successes()
        );
        anyhow::ensure!(
            summary.failures() == 0,
            "no session should fail, {} did",
            summary.failures()
        );
        Ok(())
    }
}

fn recovers_after(reason: EndReason) -> impl Fn(&SimulationSummary) -> Result<()> + Send + Sync {
    move |summary| {
        anyhow::ensure!(
            !summary.disruptions.is_empty(),
            "the disruption never found a target"
        );
        anyhow::ensure!(
            summary.ended_with(reason) == 1,
            "expected one session ended with {reason}, got {}",
            summary.ended_with(reason)
        );
        anyhow::ensure!(
            summary.successes() == 1,
            "the visitor should be served after the {reason} end"
        );
        anyhow::ensure!(summary.rewards == 1, "expected exactly one reward");
        Ok(())
    }
}

fn rewards_match_successes(summary: &SimulationSummary) -> Result<()> {
    anyhow::ensure!(
        summary.rewards == summary.successes(),
        "{} rewards for {} successful sessions",
        summary.rewards,
        summary.successes()
    );
    Ok(())
}

fn claim_timeout_expectation(summary: &SimulationSummary) -> Result<()> {
    let timeouts = summary.ended_with(EndReason::Timeout);
    anyhow::ensure!(timeouts >= 2, "expected repeated timeouts, got {timeouts}");
    anyhow::ensure!(summary.successes() == 0, "a stalled provider cannot succeed");
    anyhow::ensure!(
        summary.cooldowns_expired >= 1,
        "the visitor never left the cooldown"
    );
    anyhow::ensure!(
        summary.claims > timeouts,
        "the visitor should be claimed again after each timeout"
    );
    Ok(())
}

fn contention_expectation(summary: &SimulationSummary) -> Result<()> {
    anyhow::ensure!(
        summary.claims == 2,
        "each visitor should be claimed once, saw {} claims",
        summary.claims
    );
    every_visit_succeeds(2)(summary)
}

fn soak_expectation(summary: &SimulationSummary) -> Result<()> {
    anyhow::ensure!(summary.claims > 0, "nobody was ever claimed");
    let ended: usize = summary.end_reasons.values().sum();
    anyhow::ensure!(
        ended <= summary.claims,
        "{ended} sessions ended but only {} were claimed",
        summary.claims
    );
    Ok(())
}
