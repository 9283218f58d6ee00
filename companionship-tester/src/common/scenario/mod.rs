pub mod catalog;

use crate::logic::SimulationPlan;
use catalog::catalog_scenarios;

#[derive(Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub plan: SimulationPlan,
}

impl TestScenario {
    #[must_use]
    pub fn simulation(name: impl Into<String>, plan: SimulationPlan) -> Self {
        Self {
            name: name.into(),
            plan,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationScenario {
    key: &'static str,
    name: &'static str,
    description: &'static str,
    plan: SimulationPlan,
}

impl SimulationScenario {
    pub const fn new(
        key: &'static str,
        name: &'static str,
        description: &'static str,
        plan: SimulationPlan,
    ) -> Self {
        Self {
            key,
            name,
            description,
            plan,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.key
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.description
    }

    #[must_use]
    pub fn into_test(self) -> TestScenario {
        TestScenario::simulation(self.name, self.plan)
    }
}

pub fn get_scenario(name: &str) -> Option<TestScenario> {
    let wanted = name.to_lowercase();
    catalog_scenarios()
        .into_iter()
        .find(|scenario| scenario.key() == wanted || scenario.name().to_lowercase() == wanted)
        .map(SimulationScenario::into_test)
}

pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    catalog_scenarios()
        .iter()
        .map(|scenario| (scenario.key(), scenario.description()))
        .collect()
}

pub fn scenario_keys() -> Vec<String> {
    catalog_scenarios()
        .iter()
        .map(|scenario| scenario.key().to_string())
        .collect()
}
