mod launch;
mod planner;

pub use launch::LaunchConfig;
pub use planner::{Planner, ProcessPlan, Role};
