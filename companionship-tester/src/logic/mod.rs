pub mod driver;
pub mod reports;
pub mod simulation;
pub mod tester;

pub use simulation::SimulationPlan;
pub use tester::*;
