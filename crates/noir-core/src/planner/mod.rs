//! Planner interface.
//!
//! A [`Planner`] turns a target and the set of available primitives into an
//! [`InvestigationPlan`]. Planners are untrusted: the [`PlanResolver`]
//! validates whatever they return and substitutes the deterministic fallback
//! plan when the primary strategy errors, times out or produces an invalid
//! plan.

pub mod remote;
pub mod resolver;
pub mod static_planner;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::error::PlanningError;
use crate::domain::plan::InvestigationPlan;
use crate::domain::target::Target;

pub use remote::{HttpPlanningService, PlanningRequest, PlanningService, ServicePlanner};
pub use resolver::{PlanResolver, ResolvedPlan};
pub use static_planner::StaticPlanner;

#[async_trait]
pub trait Planner: Send + Sync {
    /// Strategy name recorded on produced plans.
    fn name(&self) -> &str;

    async fn generate_plan(
        &self,
        target: &Target,
        available: &BTreeSet<String>,
    ) -> Result<InvestigationPlan, PlanningError>;
}
