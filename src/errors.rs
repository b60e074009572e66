//! Typed error hierarchy for the criticality kernel.
//!
//! Four top-level enums cover the four subsystems:
//! - `TransitionError` — state machine guard rejections
//! - `LedgerError` — decision ledger validation and mutation failures
//! - `RegressionError` — contradiction handling failures
//! - `CheckpointError` — persistence and resume failures
//!
//! The short codes returned by `code()` are the boundary contract; callers
//! match on those strings, not on the Rust types.

use thiserror::Error;

use crate::artifact::ArtifactType;
use crate::phase::ProtocolPhase;

fn artifact_list(artifacts: &[ArtifactType]) -> String {
    artifacts
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn phase_list(phases: &[ProtocolPhase]) -> String {
    if phases.is_empty() {
        return "none".to_string();
    }
    phases
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn phase_or_none(phase: &Option<ProtocolPhase>) -> &'static str {
    phase.map(|p| p.as_str()).unwrap_or("none")
}

/// Guard rejections from the phase state machine.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("ALREADY_COMPLETE: the protocol is complete and has no outgoing transitions")]
    AlreadyComplete,

    #[error(
        "BLOCKED_STATE: phase {phase} is blocked awaiting human input; resolve the blocking query before transitioning"
    )]
    BlockedState { phase: ProtocolPhase },

    #[error(
        "FAILED_STATE: phase {phase} is in a failed state; recover or restart before transitioning"
    )]
    FailedState { phase: ProtocolPhase },

    #[error("STATE_NOT_ACTIVE: expected an Active substate but found {kind}")]
    StateNotActive { kind: String },

    #[error(
        "INVALID_TRANSITION: Cannot skip phases from {from} to {to}; the only forward transition from {from} is to {}",
        phase_or_none(.valid_forward)
    )]
    CannotSkip {
        from: ProtocolPhase,
        to: ProtocolPhase,
        valid_forward: Option<ProtocolPhase>,
    },

    #[error(
        "INVALID_TRANSITION: {to} is not a valid failure transition from {from}; valid failure targets: {}",
        phase_list(.valid_failure)
    )]
    InvalidFailureTransition {
        from: ProtocolPhase,
        to: ProtocolPhase,
        valid_failure: Vec<ProtocolPhase>,
    },

    #[error(
        "INVALID_TRANSITION: {to} is not a valid transition target from {from}; valid targets: {}",
        phase_list(.valid)
    )]
    InvalidTransition {
        from: ProtocolPhase,
        to: ProtocolPhase,
        valid: Vec<ProtocolPhase>,
    },

    #[error(
        "MISSING_ARTIFACTS: cannot enter {target} without: {}",
        artifact_list(.missing)
    )]
    MissingArtifacts {
        target: ProtocolPhase,
        missing: Vec<ArtifactType>,
    },
}

impl TransitionError {
    /// The boundary contract name for this error.
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::AlreadyComplete => "ALREADY_COMPLETE",
            TransitionError::BlockedState { .. } => "BLOCKED_STATE",
            TransitionError::FailedState { .. } => "FAILED_STATE",
            TransitionError::StateNotActive { .. } => "STATE_NOT_ACTIVE",
            TransitionError::CannotSkip { .. }
            | TransitionError::InvalidFailureTransition { .. }
            | TransitionError::InvalidTransition { .. } => "INVALID_TRANSITION",
            TransitionError::MissingArtifacts { .. } => "MISSING_ARTIFACTS",
        }
    }
}

/// Validation and mutation failures from the decision ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("LedgerValidationError: {message}")]
    Validation { message: String },

    #[error("DuplicateDecisionIdError: decision id {id} already exists")]
    DuplicateId { id: String },

    #[error(
        "CanonicalOverrideError: decision {id} has canonical confidence; pass the explicit override flag to {operation} it"
    )]
    CanonicalOverride { id: String, operation: String },

    #[error("DecisionNotFoundError: decision {id} does not exist")]
    NotFound { id: String },

    #[error("InvalidSupersedeError: decision {id} {reason}")]
    InvalidSupersede { id: String, reason: String },

    #[error("CircularDependencyError: dependency cycle detected: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    #[error("DependencyNotFoundError: decision {id} depends on unknown decision {dependency}")]
    DependencyNotFound { id: String, dependency: String },

    #[error(
        "InvalidFilterKeyError: unknown filter key '{key}'; valid keys: category, phase, status, confidence"
    )]
    InvalidFilterKey { key: String },
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "LedgerValidationError",
            LedgerError::DuplicateId { .. } => "DuplicateDecisionIdError",
            LedgerError::CanonicalOverride { .. } => "CanonicalOverrideError",
            LedgerError::NotFound { .. } => "DecisionNotFoundError",
            LedgerError::InvalidSupersede { .. } => "InvalidSupersedeError",
            LedgerError::CircularDependency { .. } => "CircularDependencyError",
            LedgerError::DependencyNotFound { .. } => "DependencyNotFoundError",
            LedgerError::InvalidFilterKey { .. } => "InvalidFilterKeyError",
        }
    }
}

/// Failures from contradiction analysis and phase regression.
#[derive(Debug, Error)]
pub enum RegressionError {
    #[error("NO_CONTRADICTIONS: handlePhaseRegression called with an empty contradiction list")]
    NoContradictions,

    #[error("INVALID_CONTRADICTION: contradiction {id} is malformed: {message}")]
    InvalidContradiction { id: String, message: String },

    #[error(
        "ALL_RESOLUTIONS_REJECTED: every suggested resolution for contradiction {contradiction_id} was rejected"
    )]
    AllResolutionsRejected { contradiction_id: String },

    #[error("LEDGER_ERROR: {0}")]
    Ledger(#[from] LedgerError),
}

impl RegressionError {
    pub fn code(&self) -> &'static str {
        match self {
            RegressionError::NoContradictions => "NO_CONTRADICTIONS",
            RegressionError::InvalidContradiction { .. } => "INVALID_CONTRADICTION",
            RegressionError::AllResolutionsRejected { .. } => "ALL_RESOLUTIONS_REJECTED",
            RegressionError::Ledger(_) => "LEDGER_ERROR",
        }
    }
}

/// Persistence and resume failures from the checkpoint subsystem.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("parse_error: {message}")]
    Parse { message: String },

    #[error("schema_error: {message}")]
    Schema { message: String },

    #[error("file_error: {message}")]
    File {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("validation_error: {message}")]
    Validation { message: String },

    #[error("corruption_error: {message}")]
    Corruption { message: String },
}

impl CheckpointError {
    pub fn code(&self) -> &'static str {
        match self {
            CheckpointError::Parse { .. } => "parse_error",
            CheckpointError::Schema { .. } => "schema_error",
            CheckpointError::File { .. } => "file_error",
            CheckpointError::Validation { .. } => "validation_error",
            CheckpointError::Corruption { .. } => "corruption_error",
        }
    }

    pub fn file(message: impl Into<String>, source: std::io::Error) -> Self {
        CheckpointError::File {
            message: message.into(),
            source: Some(source),
        }
    }
}
