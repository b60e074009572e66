//! Phase state machine: legal transitions and their artifact preconditions.
//!
//! The forward and failure tables here are authoritative. Forward edges walk
//! the phase order one step at a time; the three failure edges roll back to
//! the phase that produced the defective artifact. Every edge carries the
//! artifact set that must exist before the edge may be taken.
//!
//! A successful transition sheds context: the conversational state at the
//! boundary is archived under `<projectRoot>/.criticality/archives/` and the
//! new phase starts clean. Shedding failures are absorbed and reported via
//! `context_shed = false`; they never fail the transition itself.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use crate::artifact::{ArtifactSet, ArtifactType};
use crate::errors::TransitionError;
use crate::phase::ProtocolPhase;
use crate::state::{ProtocolState, Substate};

/// Directory under the project root that owns kernel state.
pub const ARCHIVE_ROOT: &str = ".criticality";

/// The forward transition target, if any. `Complete` has none.
pub fn forward_target(phase: ProtocolPhase) -> Option<ProtocolPhase> {
    let idx = phase.index();
    if idx + 1 < ProtocolPhase::ORDER.len() {
        Some(ProtocolPhase::ORDER[idx + 1])
    } else {
        None
    }
}

/// The failure (rollback) transition target, if any.
pub fn failure_target(phase: ProtocolPhase) -> Option<ProtocolPhase> {
    match phase {
        ProtocolPhase::CompositionAudit => Some(ProtocolPhase::Ignition),
        ProtocolPhase::Injection => Some(ProtocolPhase::Lattice),
        ProtocolPhase::Mesoscopic => Some(ProtocolPhase::Injection),
        _ => None,
    }
}

/// Artifacts required to enter `target` through its forward edge.
pub fn required_artifacts(target: ProtocolPhase) -> &'static [ArtifactType] {
    match target {
        ProtocolPhase::Ignition => &[],
        ProtocolPhase::Lattice => &[ArtifactType::Spec],
        ProtocolPhase::CompositionAudit => &[
            ArtifactType::LatticeCode,
            ArtifactType::Witnesses,
            ArtifactType::Contracts,
        ],
        ProtocolPhase::Injection => &[ArtifactType::ValidatedStructure],
        ProtocolPhase::Mesoscopic => &[ArtifactType::ImplementedCode],
        ProtocolPhase::MassDefect => &[ArtifactType::VerifiedCode],
        ProtocolPhase::Complete => &[ArtifactType::FinalArtifact],
    }
}

/// Artifacts required to take the failure edge `from -> to`.
/// Returns `None` when no such failure edge exists.
pub fn failure_required_artifacts(
    from: ProtocolPhase,
    to: ProtocolPhase,
) -> Option<&'static [ArtifactType]> {
    match (from, to) {
        (ProtocolPhase::CompositionAudit, ProtocolPhase::Ignition) => {
            Some(&[ArtifactType::ContradictionReport])
        }
        (ProtocolPhase::Injection, ProtocolPhase::Lattice) => {
            Some(&[ArtifactType::StructuralDefectReport])
        }
        (ProtocolPhase::Mesoscopic, ProtocolPhase::Injection) => {
            Some(&[ArtifactType::ClusterFailureReport])
        }
        _ => None,
    }
}

/// All legal targets from `phase`: the forward edge first, then the failure
/// edge. Declaration order matters: the orchestrator scans it.
pub fn valid_targets(phase: ProtocolPhase) -> Vec<ProtocolPhase> {
    let mut targets = Vec::with_capacity(2);
    if let Some(f) = forward_target(phase) {
        targets.push(f);
    }
    if let Some(f) = failure_target(phase) {
        targets.push(f);
    }
    targets
}

/// Union of forward entry requirements for every phase up to and including
/// `phase`. Used by checkpoint integrity to judge whether a persisted
/// artifact set is plausible for the recorded phase.
pub fn cumulative_required_artifacts(phase: ProtocolPhase) -> Vec<ArtifactType> {
    let mut cumulative = ArtifactSet::new();
    for p in ProtocolPhase::ORDER.iter().take(phase.index() + 1) {
        for artifact in required_artifacts(*p) {
            cumulative.insert(*artifact);
        }
    }
    cumulative.as_slice().to_vec()
}

/// Result of a successful transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// The new Active state at the target phase.
    pub state: ProtocolState,
    /// Whether the context archive was created at the boundary.
    pub context_shed: bool,
    /// The archive directory, when shedding succeeded.
    pub archive_dir: Option<PathBuf>,
}

/// Attempt the transition `state -> target`, gated on `available` artifacts.
///
/// Preconditions are checked in a fixed order: terminal state, non-Active
/// substate, edge legality (with skip and failure-direction wording kept
/// distinct), then artifact presence. The phase never changes on failure.
pub fn transition(
    state: &ProtocolState,
    target: ProtocolPhase,
    available: &ArtifactSet,
    project_root: &Path,
) -> Result<TransitionOutcome, TransitionError> {
    if state.is_complete() {
        return Err(TransitionError::AlreadyComplete);
    }

    match &state.substate {
        Substate::Active => {}
        Substate::Blocking { .. } => {
            return Err(TransitionError::BlockedState { phase: state.phase });
        }
        Substate::Failed { .. } => {
            return Err(TransitionError::FailedState { phase: state.phase });
        }
    }

    let from = state.phase;
    let required: &[ArtifactType] = if forward_target(from) == Some(target) {
        required_artifacts(target)
    } else if failure_target(from) == Some(target) {
        failure_required_artifacts(from, target).expect("failure edge has a report artifact")
    } else {
        let from_idx = from.index();
        let to_idx = target.index();
        return Err(if to_idx > from_idx + 1 {
            TransitionError::CannotSkip {
                from,
                to: target,
                valid_forward: forward_target(from),
            }
        } else if to_idx < from_idx {
            TransitionError::InvalidFailureTransition {
                from,
                to: target,
                valid_failure: failure_target(from).into_iter().collect(),
            }
        } else {
            TransitionError::InvalidTransition {
                from,
                to: target,
                valid: valid_targets(from),
            }
        });
    };

    let missing = available.missing_from(required);
    if !missing.is_empty() {
        return Err(TransitionError::MissingArtifacts { target, missing });
    }

    let (context_shed, archive_dir) = shed_context(project_root, from, target);
    info!(from = %from, to = %target, context_shed, "phase transition");

    Ok(TransitionOutcome {
        state: ProtocolState::active(target),
        context_shed,
        archive_dir,
    })
}

/// Create the timestamped archive directory for the phase boundary.
/// Failure is absorbed: the transition proceeds with `context_shed = false`.
fn shed_context(
    project_root: &Path,
    from: ProtocolPhase,
    to: ProtocolPhase,
) -> (bool, Option<PathBuf>) {
    let stamp = Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    let dir = project_root
        .join(ARCHIVE_ROOT)
        .join("archives")
        .join(format!("{from}-to-{to}-{stamp}"));

    match fs::create_dir_all(&dir) {
        Ok(()) => (true, Some(dir)),
        Err(e) => {
            warn!(from = %from, to = %to, error = %e, "context shedding failed");
            (false, None)
        }
    }
}
