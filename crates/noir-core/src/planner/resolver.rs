//! Primary-then-fallback plan resolution.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::error::PlanningError;
use crate::domain::plan::InvestigationPlan;
use crate::domain::target::Target;
use crate::obs;
use crate::planner::static_planner::StaticPlanner;
use crate::planner::Planner;

/// A validated plan and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlan {
    pub plan: InvestigationPlan,
    pub used_fallback: bool,
    /// Why the primary planner's output was not used.
    pub primary_error: Option<PlanningError>,
}

/// Runs the primary planner under a timeout, validates its plan, and falls
/// back to [`StaticPlanner::fallback_plan`] on any failure.
#[derive(Clone)]
pub struct PlanResolver {
    primary: Arc<dyn Planner>,
    timeout: Duration,
}

impl PlanResolver {
    pub fn new(primary: Arc<dyn Planner>, timeout: Duration) -> Self {
        Self { primary, timeout }
    }

    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    async fn primary_plan(
        &self,
        target: &Target,
        available: &BTreeSet<String>,
    ) -> Result<InvestigationPlan, PlanningError> {
        let plan = tokio::time::timeout(self.timeout, self.primary.generate_plan(target, available))
            .await
            .map_err(|_| PlanningError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;
        plan.validate(available)?;
        Ok(plan)
    }

    pub async fn resolve(
        &self,
        investigation_id: &str,
        target: &Target,
        available: &BTreeSet<String>,
    ) -> Result<ResolvedPlan, PlanningError> {
        match self.primary_plan(target, available).await {
            Ok(plan) => {
                obs::emit_plan_resolved(investigation_id, &plan.strategy, plan.len(), false);
                Ok(ResolvedPlan {
                    plan,
                    used_fallback: false,
                    primary_error: None,
                })
            }
            Err(primary_error) => {
                obs::emit_plan_rejected(investigation_id, self.primary.name(), &primary_error);
                let plan = StaticPlanner::fallback_plan(target, available)?;
                if let Err(e) = plan.validate(available) {
                    obs::emit_plan_rejected(investigation_id, &plan.strategy, &e);
                    return Err(e);
                }
                obs::emit_plan_resolved(investigation_id, &plan.strategy, plan.len(), true);
                Ok(ResolvedPlan {
                    plan,
                    used_fallback: true,
                    primary_error: Some(primary_error),
                })
            }
        }
    }
}

impl std::fmt::Debug for PlanResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanResolver")
            .field("primary", &self.primary.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::Step;
    use async_trait::async_trait;

    struct Fixed(Result<InvestigationPlan, PlanningError>);

    #[async_trait]
    impl Planner for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate_plan(
            &self,
            _: &Target,
            _: &BTreeSet<String>,
        ) -> Result<InvestigationPlan, PlanningError> {
            self.0.clone()
        }
    }

    struct Stalled;

    #[async_trait]
    impl Planner for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn generate_plan(
            &self,
            _: &Target,
            _: &BTreeSet<String>,
        ) -> Result<InvestigationPlan, PlanningError> {
            std::future::pending().await
        }
    }

    fn available() -> BTreeSet<String> {
        ["whois", "web_search", "reputation"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn target() -> Target {
        Target::domain("example.com").unwrap()
    }

    #[tokio::test]
    async fn test_valid_primary_plan_used() {
        let plan = InvestigationPlan::new("fixed", vec![Step::new("a", "whois")]);
        let resolver = PlanResolver::new(Arc::new(Fixed(Ok(plan.clone()))), Duration::from_secs(1));
        let resolved = resolver.resolve("inv", &target(), &available()).await.unwrap();
        assert!(!resolved.used_fallback);
        assert_eq!(resolved.plan, plan);
    }

    #[tokio::test]
    async fn test_unknown_primitive_triggers_fallback() {
        let plan = InvestigationPlan::new("fixed", vec![Step::new("a", "dark_web_scan")]);
        let resolver = PlanResolver::new(Arc::new(Fixed(Ok(plan))), Duration::from_secs(1));
        let resolved = resolver.resolve("inv", &target(), &available()).await.unwrap();
        assert!(resolved.used_fallback);
        assert!(matches!(
            resolved.primary_error,
            Some(PlanningError::UnknownPrimitive { .. })
        ));
        assert_eq!(resolved.plan.strategy, "fallback");
        assert!(resolved.plan.validate(&available()).is_ok());
    }

    #[tokio::test]
    async fn test_zero_step_timeout_triggers_fallback() {
        let plan = InvestigationPlan::new("fixed", vec![Step::new("a", "whois").with_timeout_ms(0)]);
        let resolver = PlanResolver::new(Arc::new(Fixed(Ok(plan))), Duration::from_secs(1));
        let resolved = resolver.resolve("inv", &target(), &available()).await.unwrap();
        assert!(resolved.used_fallback);
        assert!(matches!(
            resolved.primary_error,
            Some(PlanningError::ZeroTimeout { .. })
        ));
        assert!(resolved.plan.steps.iter().all(|s| s.timeout_ms != Some(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_planner_times_out_into_fallback() {
        let resolver = PlanResolver::new(Arc::new(Stalled), Duration::from_millis(500));
        let resolved = resolver.resolve("inv", &target(), &available()).await.unwrap();
        assert!(resolved.used_fallback);
        assert_eq!(
            resolved.primary_error,
            Some(PlanningError::Timeout { timeout_ms: 500 })
        );
    }

    #[tokio::test]
    async fn test_no_primitives_is_fatal() {
        let resolver = PlanResolver::new(
            Arc::new(Fixed(Err(PlanningError::Service("down".into())))),
            Duration::from_secs(1),
        );
        let err = resolver
            .resolve("inv", &target(), &BTreeSet::new())
            .await
            .unwrap_err();
        assert_eq!(err, PlanningError::NoPrimitives);
    }
}
