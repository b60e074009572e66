//! Guard and action combinators over the tick context.
//!
//! Guards are pure predicates; actions mutate the context and report
//! failure. Both compose without touching the orchestrator loop, so
//! collaborators can express "run tests once the implemented code exists"
//! as data rather than control flow.

use anyhow::Result;

use super::TickContext;
use crate::artifact::ArtifactType;

pub type Guard = Box<dyn Fn(&TickContext) -> bool + Send + Sync>;
pub type Action = Box<dyn Fn(&mut TickContext) -> Result<()> + Send + Sync>;

pub fn always() -> Guard {
    Box::new(|_| true)
}

pub fn never() -> Guard {
    Box::new(|_| false)
}

pub fn and(a: Guard, b: Guard) -> Guard {
    Box::new(move |ctx| a(ctx) && b(ctx))
}

pub fn or(a: Guard, b: Guard) -> Guard {
    Box::new(move |ctx| a(ctx) || b(ctx))
}

pub fn not(guard: Guard) -> Guard {
    Box::new(move |ctx| !guard(ctx))
}

/// True when every listed artifact is present in the snapshot.
pub fn has_artifacts(artifacts: Vec<ArtifactType>) -> Guard {
    Box::new(move |ctx| ctx.snapshot.artifacts.contains_all(&artifacts))
}

/// True when the substate is Active.
pub fn is_active() -> Guard {
    Box::new(|ctx| ctx.snapshot.state.substate.is_active())
}

/// True when no blocking query is still waiting on a human.
pub fn blocking_resolved() -> Guard {
    Box::new(|ctx| ctx.registry.pending().is_empty())
}

pub fn noop() -> Action {
    Box::new(|_| Ok(()))
}

/// Add the listed artifacts to the snapshot.
pub fn produce_artifacts(artifacts: Vec<ArtifactType>) -> Action {
    Box::new(move |ctx| {
        for artifact in &artifacts {
            ctx.snapshot.artifacts.insert(*artifact);
        }
        Ok(())
    })
}

/// Run actions in order, stopping at the first failure.
pub fn sequence(actions: Vec<Action>) -> Action {
    Box::new(move |ctx| {
        for action in &actions {
            action(ctx)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{ActionResult, ExternalOperations};
    use crate::phase::ProtocolPhase;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct InertOps;

    #[async_trait]
    impl ExternalOperations for InertOps {
        async fn execute_model_call(&self, _phase: ProtocolPhase) -> ActionResult {
            ActionResult::ok(vec![])
        }
        async fn run_compilation(&self) -> ActionResult {
            ActionResult::ok(vec![])
        }
        async fn run_tests(&self) -> ActionResult {
            ActionResult::ok(vec![])
        }
        async fn archive_phase_artifacts(&self, _phase: ProtocolPhase) -> ActionResult {
            ActionResult::ok(vec![])
        }
        async fn send_blocking_notification(&self, _query: &str) {}
    }

    fn context() -> TickContext {
        TickContext::new(Arc::new(InertOps), None)
    }

    #[test]
    fn test_boolean_combinators() {
        let ctx = context();
        assert!(always()(&ctx));
        assert!(!never()(&ctx));
        assert!(and(always(), always())(&ctx));
        assert!(!and(always(), never())(&ctx));
        assert!(or(never(), always())(&ctx));
        assert!(!or(never(), never())(&ctx));
        assert!(not(never())(&ctx));
    }

    #[test]
    fn test_has_artifacts_guard() {
        let mut ctx = context();
        let guard = has_artifacts(vec![ArtifactType::Spec, ArtifactType::LatticeCode]);
        assert!(!guard(&ctx));

        ctx.snapshot.artifacts.insert(ArtifactType::Spec);
        assert!(!guard(&ctx));

        ctx.snapshot.artifacts.insert(ArtifactType::LatticeCode);
        assert!(guard(&ctx));
    }

    #[test]
    fn test_is_active_guard() {
        let mut ctx = context();
        assert!(is_active()(&ctx));

        ctx.snapshot.state = crate::state::ProtocolState::blocking(
            ProtocolPhase::Lattice,
            "q",
            None,
            None,
            "r",
        );
        assert!(!is_active()(&ctx));
    }

    #[test]
    fn test_blocking_resolved_guard() {
        let mut ctx = context();
        assert!(blocking_resolved()(&ctx));

        let id = ctx
            .registry
            .open(ProtocolPhase::Lattice, "q", None, None)
            .id
            .clone();
        assert!(!blocking_resolved()(&ctx));

        ctx.registry.resolve(&id, "answer", None).unwrap();
        assert!(blocking_resolved()(&ctx));
    }

    #[test]
    fn test_produce_artifacts_and_sequence() {
        let mut ctx = context();
        let action = sequence(vec![
            produce_artifacts(vec![ArtifactType::Spec]),
            noop(),
            produce_artifacts(vec![ArtifactType::LatticeCode, ArtifactType::Spec]),
        ]);
        action(&mut ctx).unwrap();

        assert!(ctx.snapshot.artifacts.contains(ArtifactType::Spec));
        assert!(ctx.snapshot.artifacts.contains(ArtifactType::LatticeCode));
        assert_eq!(ctx.snapshot.artifacts.len(), 2);
    }

    #[test]
    fn test_sequence_stops_on_failure() {
        let mut ctx = context();
        let failing: Action = Box::new(|_| anyhow::bail!("action failed"));
        let action = sequence(vec![
            produce_artifacts(vec![ArtifactType::Spec]),
            failing,
            produce_artifacts(vec![ArtifactType::LatticeCode]),
        ]);

        assert!(action(&mut ctx).is_err());
        assert!(ctx.snapshot.artifacts.contains(ArtifactType::Spec));
        assert!(!ctx.snapshot.artifacts.contains(ArtifactType::LatticeCode));
    }
}
