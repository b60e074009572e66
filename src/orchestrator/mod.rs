//! Tick orchestration.
//!
//! The tick is the atomic unit of progress: evaluate the substate, take at
//! most one transition, persist the snapshot, emit notifications. A crash at
//! any point leaves either the pre-tick or the post-tick checkpoint on disk.
//!
//! ## Persistence ownership
//!
//! The orchestrator is the only component that writes the state file. The
//! ledger has its own file (see [`crate::ledger::file`]); blocking records
//! ride inside the snapshot. Notifications and external operations are
//! observation and collaboration layers; they never drive control flow, and
//! their failures are absorbed here.

pub mod guards;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::blocking::BlockingRegistry;
use crate::checkpoint::{self, LoadOptions};
use crate::errors::CheckpointError;
use crate::external::{ExternalOperations, NotificationService, NotifyEvent};
use crate::state::{ProtocolState, StateSnapshot, Substate};
use crate::transition::{
    failure_required_artifacts, forward_target, required_artifacts, transition, valid_targets,
};

pub use guards::{Action, Guard};

/// Failure code persisted when a blocking query outlives its timeout.
pub const TIMEOUT_CODE: &str = "TIMEOUT";

/// A human response waiting to be applied to the current blocking episode.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingResolution {
    /// Registry record to resolve, when known.
    pub query_id: Option<String>,
    pub response: String,
    pub rationale: Option<String>,
}

/// Mutable state and collaborator handles for one protocol instance.
pub struct TickContext {
    pub snapshot: StateSnapshot,
    pub registry: BlockingRegistry,
    pub pending_resolutions: Vec<PendingResolution>,
    pub external: Arc<dyn ExternalOperations>,
    pub notifier: Option<Arc<dyn NotificationService>>,
}

impl TickContext {
    pub fn new(
        external: Arc<dyn ExternalOperations>,
        notifier: Option<Arc<dyn NotificationService>>,
    ) -> Self {
        Self {
            snapshot: StateSnapshot::fresh(),
            registry: BlockingRegistry::new(),
            pending_resolutions: Vec::new(),
            external,
            notifier,
        }
    }

    pub fn with_snapshot(mut self, snapshot: StateSnapshot) -> Self {
        self.registry = BlockingRegistry::from_records(snapshot.blocking_queries.clone());
        self.snapshot = snapshot;
        self
    }

    /// Queue a human response for the next tick.
    pub fn submit_resolution(
        &mut self,
        query_id: Option<String>,
        response: impl Into<String>,
        rationale: Option<String>,
    ) {
        self.pending_resolutions.push(PendingResolution {
            query_id,
            response: response.into(),
            rationale,
        });
    }

    pub fn add_artifacts(&mut self, artifacts: &[crate::artifact::ArtifactType]) {
        for artifact in artifacts {
            self.snapshot.artifacts.insert(*artifact);
        }
    }
}

/// What one tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// The protocol reached (or already was at) the terminal phase.
    Complete,
    /// The protocol is in a Failed substate.
    Failed,
    /// Halted awaiting human input.
    Blocked,
    /// A transition or resolution was applied.
    Progressed,
    /// Legal targets exist but no precondition held; try again later.
    Idle,
    /// The current phase has no legal targets at all.
    NoValidTransition,
}

#[derive(Debug, Clone, Copy)]
pub struct TickResult {
    pub status: TickStatus,
    pub should_continue: bool,
    pub state_changed: bool,
}

impl TickResult {
    fn stop(status: TickStatus) -> Self {
        Self {
            status,
            should_continue: false,
            state_changed: false,
        }
    }

    fn advanced(status: TickStatus, should_continue: bool) -> Self {
        Self {
            status,
            should_continue,
            state_changed: true,
        }
    }

    fn idle() -> Self {
        Self {
            status: TickStatus::Idle,
            should_continue: true,
            state_changed: false,
        }
    }
}

/// Why a run loop stopped. Names are the boundary contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Complete,
    Failed,
    Blocked,
    NoValidTransition,
    ExternalError,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Complete => "COMPLETE",
            StopReason::Failed => "FAILED",
            StopReason::Blocked => "BLOCKED",
            StopReason::NoValidTransition => "NO_VALID_TRANSITION",
            StopReason::ExternalError => "EXTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub ticks: u32,
    pub stop_reason: StopReason,
}

/// Drives one protocol instance: one tick at a time, one checkpoint per
/// mutation.
pub struct Orchestrator {
    project_root: PathBuf,
    state_file: PathBuf,
}

impl Orchestrator {
    pub fn new(project_root: impl Into<PathBuf>, state_file: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            state_file: state_file.into(),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Build a context from the state file, resuming when possible.
    pub fn startup(
        &self,
        external: Arc<dyn ExternalOperations>,
        notifier: Option<Arc<dyn NotificationService>>,
        options: &LoadOptions,
    ) -> TickContext {
        let startup = checkpoint::get_startup_state(&self.state_file, options);
        if startup.recovery_performed {
            warn!("recovered from an unusable state file; protocol restarts at ignition");
        }
        TickContext::new(external, notifier).with_snapshot(startup.snapshot)
    }

    /// Execute one tick. Persistence failures surface as errors; everything
    /// the tick decided before the failure is still in memory only, so the
    /// on-disk snapshot remains the pre-tick one.
    pub async fn tick(&self, ctx: &mut TickContext) -> Result<TickResult, CheckpointError> {
        if ctx.snapshot.state.is_complete() {
            self.notify(
                ctx,
                NotifyEvent::Complete,
                json!({ "artifacts": &ctx.snapshot.artifacts }),
            )
            .await;
            return Ok(TickResult::stop(TickStatus::Complete));
        }

        if let Substate::Failed { error, code, .. } = &ctx.snapshot.state.substate {
            let payload = json!({
                "phase": ctx.snapshot.state.phase,
                "error": error,
                "code": code,
            });
            self.notify(ctx, NotifyEvent::Error, payload).await;
            return Ok(TickResult::stop(TickStatus::Failed));
        }

        if let Substate::Blocking {
            timeout_ms,
            blocked_at,
            query,
            ..
        } = &ctx.snapshot.state.substate
        {
            let expired = timeout_ms.is_some_and(|t| {
                let elapsed = Utc::now().signed_duration_since(*blocked_at);
                elapsed.num_milliseconds() >= 0 && elapsed.num_milliseconds() as u64 > t
            });
            if expired {
                let query = query.clone();
                ctx.snapshot.state = ProtocolState::failed(
                    ctx.snapshot.state.phase,
                    format!("Blocking query timed out: {query}"),
                    Some(TIMEOUT_CODE.to_string()),
                    true,
                    None,
                );
                self.persist(ctx)?;
                self.notify(
                    ctx,
                    NotifyEvent::Error,
                    json!({ "phase": ctx.snapshot.state.phase, "code": TIMEOUT_CODE }),
                )
                .await;
                return Ok(TickResult {
                    status: TickStatus::Failed,
                    should_continue: false,
                    state_changed: true,
                });
            }

            if !ctx.pending_resolutions.is_empty() {
                let resolution = ctx.pending_resolutions.remove(0);
                self.apply_resolution(ctx, resolution);
                self.persist(ctx)?;
                return Ok(TickResult::advanced(TickStatus::Progressed, true));
            }

            return Ok(TickResult::stop(TickStatus::Blocked));
        }

        // Active: scan legal targets in declaration order
        let from = ctx.snapshot.state.phase;
        let targets = valid_targets(from);
        if targets.is_empty() {
            return Ok(TickResult::stop(TickStatus::NoValidTransition));
        }

        for target in targets {
            let required = if forward_target(from) == Some(target) {
                required_artifacts(target)
            } else {
                failure_required_artifacts(from, target).unwrap_or(&[])
            };
            if !ctx.snapshot.artifacts.contains_all(required) {
                continue;
            }

            match transition(
                &ctx.snapshot.state,
                target,
                &ctx.snapshot.artifacts,
                &self.project_root,
            ) {
                Ok(outcome) => {
                    if !outcome.context_shed {
                        warn!(from = %from, to = %target, "context shedding failed at phase boundary");
                    }
                    ctx.snapshot.state = outcome.state;
                    self.persist(ctx)?;
                    self.notify(
                        ctx,
                        NotifyEvent::PhaseChange,
                        json!({ "from": from, "to": target }),
                    )
                    .await;
                    if target.is_terminal() {
                        self.notify(
                            ctx,
                            NotifyEvent::Complete,
                            json!({ "artifacts": &ctx.snapshot.artifacts }),
                        )
                        .await;
                        return Ok(TickResult::advanced(TickStatus::Complete, false));
                    }
                    return Ok(TickResult::advanced(TickStatus::Progressed, true));
                }
                Err(e) => {
                    // The artifact precondition held, so this is a state-level
                    // rejection; try the next declared target
                    debug!(from = %from, to = %target, error = %e, "transition rejected");
                }
            }
        }

        Ok(TickResult::idle())
    }

    /// Tick until the protocol stops or `max_ticks` is exhausted. Exhaustion
    /// is reported as a synthetic `EXTERNAL_ERROR`.
    pub async fn run(&self, ctx: &mut TickContext, max_ticks: u32) -> RunOutcome {
        let mut ticks = 0;
        while ticks < max_ticks {
            let result = match self.tick(ctx).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "tick aborted on persistence failure");
                    return RunOutcome {
                        ticks,
                        stop_reason: StopReason::ExternalError,
                    };
                }
            };
            ticks += 1;
            if !result.should_continue {
                let stop_reason = match result.status {
                    TickStatus::Complete => StopReason::Complete,
                    TickStatus::Failed => StopReason::Failed,
                    TickStatus::Blocked => StopReason::Blocked,
                    TickStatus::NoValidTransition => StopReason::NoValidTransition,
                    TickStatus::Progressed | TickStatus::Idle => StopReason::ExternalError,
                };
                return RunOutcome { ticks, stop_reason };
            }
            // An idle tick means no precondition holds; without external
            // progress between ticks the loop would spin to exhaustion
            if result.status == TickStatus::Idle {
                debug!(phase = %ctx.snapshot.state.phase, "no-op tick");
            }
        }
        RunOutcome {
            ticks,
            stop_reason: StopReason::ExternalError,
        }
    }

    /// Put the protocol into a Blocking substate, record the query, persist,
    /// and notify the human (both channels best-effort).
    pub async fn enter_blocking(
        &self,
        ctx: &mut TickContext,
        query: impl Into<String>,
        options: Option<Vec<String>>,
        timeout_ms: Option<u64>,
        reason: impl Into<String>,
    ) -> Result<String, CheckpointError> {
        let query = query.into();
        let record_id = ctx
            .registry
            .open(ctx.snapshot.state.phase, query.clone(), options.clone(), timeout_ms)
            .id
            .clone();
        ctx.snapshot.state = ProtocolState::blocking(
            ctx.snapshot.state.phase,
            query.clone(),
            options,
            timeout_ms,
            reason,
        );
        self.persist(ctx)?;

        ctx.external.send_blocking_notification(&query).await;
        self.notify(
            ctx,
            NotifyEvent::Block,
            json!({ "queryId": record_id, "query": query }),
        )
        .await;
        Ok(record_id)
    }

    /// Record a Failed substate and persist it.
    pub fn enter_failed(
        &self,
        ctx: &mut TickContext,
        error: impl Into<String>,
        code: Option<String>,
        recoverable: bool,
    ) -> Result<(), CheckpointError> {
        ctx.snapshot.state = ProtocolState::failed(
            ctx.snapshot.state.phase,
            error,
            code,
            recoverable,
            None,
        );
        self.persist(ctx)
    }

    fn apply_resolution(&self, ctx: &mut TickContext, resolution: PendingResolution) {
        let query_id = resolution.query_id.or_else(|| {
            ctx.registry
                .pending()
                .last()
                .map(|record| record.id.clone())
        });
        if let Some(query_id) = query_id {
            if let Err(e) =
                ctx.registry
                    .resolve(&query_id, resolution.response, resolution.rationale)
            {
                warn!(query_id = %query_id, error = %e, "blocking resolution did not match a record");
            }
        }
        let phase = ctx.snapshot.state.phase;
        ctx.snapshot.state = ProtocolState::active(phase);
        info!(phase = %phase, "blocking query resolved; phase re-activated");
    }

    /// Sync blocking records into the snapshot and write the checkpoint.
    fn persist(&self, ctx: &mut TickContext) -> Result<(), CheckpointError> {
        ctx.snapshot.blocking_queries = ctx.registry.records().to_vec();
        checkpoint::save_state(&self.state_file, &ctx.snapshot)
    }

    async fn notify(&self, ctx: &TickContext, event: NotifyEvent, payload: serde_json::Value) {
        if let Some(notifier) = &ctx.notifier
            && let Err(e) = notifier.notify(event, payload).await
        {
            warn!(event = %event, error = %e, "notification failed; protocol state unaffected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactType;
    use crate::external::ActionResult;
    use crate::phase::ProtocolPhase;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct InertOps {
        blocking_queries_sent: Mutex<Vec<String>>,
    }

    impl InertOps {
        fn new() -> Self {
            Self {
                blocking_queries_sent: Mutex::new(Vec::new()),
            }
        }
    }

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
        async fn send_blocking_notification(&self, query: &str) {
            self.blocking_queries_sent
                .lock()
                .unwrap()
                .push(query.to_string());
        }
    }

    struct RecordingNotifier {
        events: Mutex<Vec<NotifyEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationService for RecordingNotifier {
        async fn notify(&self, event: NotifyEvent, _payload: serde_json::Value) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event);
            if self.fail {
                anyhow::bail!("transport down");
            }
            Ok(())
        }
    }

    fn setup(dir: &TempDir) -> (Orchestrator, TickContext) {
        let orchestrator = Orchestrator::new(dir.path(), dir.path().join("state.json"));
        let ctx = TickContext::new(Arc::new(InertOps::new()), None);
        (orchestrator, ctx)
    }

    #[tokio::test]
    async fn test_tick_without_artifacts_is_noop() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut ctx) = setup(&dir);

        let result = orchestrator.tick(&mut ctx).await.unwrap();
        assert_eq!(result.status, TickStatus::Idle);
        assert!(result.should_continue);
        assert!(!result.state_changed);
        assert_eq!(ctx.snapshot.state.phase, ProtocolPhase::Ignition);
    }

    #[tokio::test]
    async fn test_tick_advances_when_precondition_holds() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut ctx) = setup(&dir);
        ctx.add_artifacts(&[ArtifactType::Spec]);

        let result = orchestrator.tick(&mut ctx).await.unwrap();
        assert_eq!(result.status, TickStatus::Progressed);
        assert!(result.state_changed);
        assert_eq!(ctx.snapshot.state.phase, ProtocolPhase::Lattice);

        // The checkpoint on disk reflects the post-tick state
        let startup =
            checkpoint::get_startup_state(orchestrator.state_file(), &LoadOptions::default());
        assert!(startup.resumed);
        assert_eq!(startup.snapshot.state.phase, ProtocolPhase::Lattice);
    }

    #[tokio::test]
    async fn test_run_drives_to_completion() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut ctx) = setup(&dir);
        ctx.add_artifacts(&[
            ArtifactType::Spec,
            ArtifactType::LatticeCode,
            ArtifactType::Witnesses,
            ArtifactType::Contracts,
            ArtifactType::ValidatedStructure,
            ArtifactType::ImplementedCode,
            ArtifactType::VerifiedCode,
            ArtifactType::FinalArtifact,
        ]);

        let outcome = orchestrator.run(&mut ctx, 20).await;
        assert_eq!(outcome.stop_reason, StopReason::Complete);
        assert!(ctx.snapshot.state.is_complete());
        assert_eq!(outcome.ticks, 6);
    }

    #[tokio::test]
    async fn test_run_exhaustion_is_external_error() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut ctx) = setup(&dir);
        // No artifacts: every tick is a no-op

        let outcome = orchestrator.run(&mut ctx, 3).await;
        assert_eq!(outcome.stop_reason, StopReason::ExternalError);
        assert_eq!(outcome.ticks, 3);
    }

    #[tokio::test]
    async fn test_blocked_tick_stops() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut ctx) = setup(&dir);
        orchestrator
            .enter_blocking(&mut ctx, "which option?", None, None, "test")
            .await
            .unwrap();

        let result = orchestrator.tick(&mut ctx).await.unwrap();
        assert_eq!(result.status, TickStatus::Blocked);
        assert!(!result.should_continue);
    }

    #[tokio::test]
    async fn test_pending_resolution_reactivates() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut ctx) = setup(&dir);
        let query_id = orchestrator
            .enter_blocking(&mut ctx, "which option?", None, None, "test")
            .await
            .unwrap();

        ctx.submit_resolution(Some(query_id.clone()), "Option A", None);
        let result = orchestrator.tick(&mut ctx).await.unwrap();
        assert_eq!(result.status, TickStatus::Progressed);
        assert!(ctx.snapshot.state.substate.is_active());

        let record = ctx.registry.get(&query_id).unwrap();
        assert!(record.resolved);
        assert_eq!(
            record.resolution.as_ref().unwrap().response,
            "Option A"
        );
    }

    #[tokio::test]
    async fn test_blocking_timeout_fails_recoverably() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut ctx) = setup(&dir);

        // Backdate the blocking substate past its timeout
        ctx.snapshot.state = ProtocolState {
            phase: ProtocolPhase::Lattice,
            substate: Substate::Blocking {
                query: "stale question".into(),
                options: None,
                timeout_ms: Some(1_000),
                blocked_at: Utc::now() - chrono::Duration::milliseconds(5_000),
                reason: "test".into(),
            },
        };

        let result = orchestrator.tick(&mut ctx).await.unwrap();
        assert_eq!(result.status, TickStatus::Failed);
        match &ctx.snapshot.state.substate {
            Substate::Failed {
                code, recoverable, ..
            } => {
                assert_eq!(code.as_deref(), Some(TIMEOUT_CODE));
                assert!(recoverable);
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        // The failure was checkpointed
        let startup =
            checkpoint::get_startup_state(orchestrator.state_file(), &LoadOptions::default());
        assert!(startup.resumed);
        assert!(startup.snapshot.state.substate.is_failed());
    }

    #[tokio::test]
    async fn test_failed_state_stops_run() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut ctx) = setup(&dir);
        orchestrator
            .enter_failed(&mut ctx, "collaborator gave up", None, false)
            .unwrap();

        let outcome = orchestrator.run(&mut ctx, 10).await;
        assert_eq!(outcome.stop_reason, StopReason::Failed);
        assert_eq!(outcome.ticks, 1);
    }

    #[tokio::test]
    async fn test_notification_failure_never_blocks_protocol() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(dir.path(), dir.path().join("state.json"));
        let notifier = Arc::new(RecordingNotifier {
            events: Mutex::new(Vec::new()),
            fail: true,
        });
        let mut ctx = TickContext::new(Arc::new(InertOps::new()), Some(notifier.clone()));
        ctx.add_artifacts(&[ArtifactType::Spec]);

        let result = orchestrator.tick(&mut ctx).await.unwrap();
        assert_eq!(result.status, TickStatus::Progressed);
        assert_eq!(ctx.snapshot.state.phase, ProtocolPhase::Lattice);
        assert_eq!(
            notifier.events.lock().unwrap().as_slice(),
            &[NotifyEvent::PhaseChange]
        );
    }

    #[tokio::test]
    async fn test_enter_blocking_sends_both_notifications() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(dir.path(), dir.path().join("state.json"));
        let ops = Arc::new(InertOps::new());
        let notifier = Arc::new(RecordingNotifier {
            events: Mutex::new(Vec::new()),
            fail: false,
        });
        let mut ctx = TickContext::new(ops.clone(), Some(notifier.clone()));

        orchestrator
            .enter_blocking(&mut ctx, "need a decision", None, Some(60_000), "contradiction")
            .await
            .unwrap();

        assert_eq!(
            ops.blocking_queries_sent.lock().unwrap().as_slice(),
            &["need a decision".to_string()]
        );
        assert_eq!(
            notifier.events.lock().unwrap().as_slice(),
            &[NotifyEvent::Block]
        );
        // Records ride inside the persisted snapshot
        let startup =
            checkpoint::get_startup_state(orchestrator.state_file(), &LoadOptions::default());
        assert_eq!(startup.snapshot.blocking_queries.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_transition_taken_when_report_present() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut ctx) = setup(&dir);
        // At Mesoscopic with a cluster failure report but no verifiedCode:
        // the forward edge cannot fire, the failure edge can
        ctx.snapshot.state = ProtocolState::active(ProtocolPhase::Mesoscopic);
        ctx.add_artifacts(&[
            ArtifactType::Spec,
            ArtifactType::LatticeCode,
            ArtifactType::Witnesses,
            ArtifactType::Contracts,
            ArtifactType::ValidatedStructure,
            ArtifactType::ImplementedCode,
            ArtifactType::ClusterFailureReport,
        ]);

        let result = orchestrator.tick(&mut ctx).await.unwrap();
        assert_eq!(result.status, TickStatus::Progressed);
        assert_eq!(ctx.snapshot.state.phase, ProtocolPhase::Injection);
    }

    #[tokio::test]
    async fn test_complete_tick_notifies_and_stops() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(dir.path(), dir.path().join("state.json"));
        let notifier = Arc::new(RecordingNotifier {
            events: Mutex::new(Vec::new()),
            fail: false,
        });
        let mut ctx = TickContext::new(Arc::new(InertOps::new()), Some(notifier.clone()));
        ctx.snapshot.state = ProtocolState::complete();

        let result = orchestrator.tick(&mut ctx).await.unwrap();
        assert_eq!(result.status, TickStatus::Complete);
        assert!(!result.should_continue);
        assert_eq!(
            notifier.events.lock().unwrap().as_slice(),
            &[NotifyEvent::Complete]
        );
    }
}
