//! Protocol state and the persisted snapshot.
//!
//! The substate is an exhaustive sum type: exactly one of Active, Blocking
//! or Failed is live at any moment, and `phase == Complete` marks the
//! terminal state. Timestamps inside Blocking and Failed are set at
//! construction and never touched afterwards; the only way to leave either
//! substate is to build a replacement state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactSet;
use crate::blocking::BlockingRecord;
use crate::phase::ProtocolPhase;

/// Intra-phase runtime state distinguishing what the orchestrator may do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Substate {
    /// The phase is executing normally; transitions may be initiated.
    Active,
    /// Halted awaiting human input.
    Blocking {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Vec<String>>,
        #[serde(rename = "timeoutMs", default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        #[serde(rename = "blockedAt")]
        blocked_at: DateTime<Utc>,
        #[serde(default)]
        reason: String,
    },
    /// An error surfaced; `recoverable` controls whether the protocol may resume.
    Failed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        recoverable: bool,
        #[serde(rename = "failedAt")]
        failed_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
}

impl Substate {
    pub fn is_active(&self) -> bool {
        matches!(self, Substate::Active)
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Substate::Blocking { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Substate::Failed { .. })
    }

    /// The discriminant name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Substate::Active => "Active",
            Substate::Blocking { .. } => "Blocking",
            Substate::Failed { .. } => "Failed",
        }
    }
}

/// The live protocol state: current phase plus its substate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolState {
    pub phase: ProtocolPhase,
    pub substate: Substate,
}

impl ProtocolState {
    /// Active state at the given phase.
    pub fn active(phase: ProtocolPhase) -> Self {
        Self {
            phase,
            substate: Substate::Active,
        }
    }

    /// Blocking state at the given phase, stamped now.
    pub fn blocking(
        phase: ProtocolPhase,
        query: impl Into<String>,
        options: Option<Vec<String>>,
        timeout_ms: Option<u64>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            substate: Substate::Blocking {
                query: query.into(),
                options,
                timeout_ms,
                blocked_at: Utc::now(),
                reason: reason.into(),
            },
        }
    }

    /// Failed state at the given phase, stamped now.
    pub fn failed(
        phase: ProtocolPhase,
        error: impl Into<String>,
        code: Option<String>,
        recoverable: bool,
        context: Option<String>,
    ) -> Self {
        Self {
            phase,
            substate: Substate::Failed {
                error: error.into(),
                code,
                recoverable,
                failed_at: Utc::now(),
                context,
            },
        }
    }

    /// Terminal completed state.
    pub fn complete() -> Self {
        Self {
            phase: ProtocolPhase::Complete,
            substate: Substate::Active,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Whether a transition may be initiated from this state.
    pub fn can_transition(&self) -> bool {
        !self.is_complete() && self.substate.is_active()
    }
}

/// Everything the kernel persists between ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: ProtocolState,
    pub artifacts: ArtifactSet,
    #[serde(rename = "blockingQueries", default)]
    pub blocking_queries: Vec<BlockingRecord>,
}

impl StateSnapshot {
    /// Fresh snapshot at Active(Ignition) with no artifacts.
    pub fn fresh() -> Self {
        Self {
            state: ProtocolState::active(ProtocolPhase::Ignition),
            artifacts: ArtifactSet::new(),
            blocking_queries: Vec::new(),
        }
    }

    pub fn with_state(state: ProtocolState) -> Self {
        Self {
            state,
            artifacts: ArtifactSet::new(),
            blocking_queries: Vec::new(),
        }
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self::fresh()
    }
}
