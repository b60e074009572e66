//! Phase enums for the synthesis protocol.
//!
//! Three distinct phase axes exist and must not be conflated:
//! - [`ProtocolPhase`] — the seven forward-ordered protocol stages the
//!   orchestrator drives; `Complete` is terminal.
//! - [`InterviewPhase`] — the specification-interview stages that phase
//!   regression targets when a contradiction surfaces.
//! - [`DecisionPhase`] — the phase axis recorded on ledger rows, used for
//!   filtering and prompt assembly.

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// One of the seven named protocol stages, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProtocolPhase {
    Ignition,
    Lattice,
    CompositionAudit,
    Injection,
    Mesoscopic,
    MassDefect,
    Complete,
}

impl ProtocolPhase {
    /// Forward progression order. Indices drive skip rejection.
    pub const ORDER: [ProtocolPhase; 7] = [
        ProtocolPhase::Ignition,
        ProtocolPhase::Lattice,
        ProtocolPhase::CompositionAudit,
        ProtocolPhase::Injection,
        ProtocolPhase::Mesoscopic,
        ProtocolPhase::MassDefect,
        ProtocolPhase::Complete,
    ];

    /// Position in forward order.
    pub fn index(&self) -> usize {
        Self::ORDER
            .iter()
            .position(|p| p == self)
            .expect("phase present in ORDER")
    }

    /// Whether this is the terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolPhase::Complete)
    }

    /// The wire name used in snapshots and checkpoint files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolPhase::Ignition => "ignition",
            ProtocolPhase::Lattice => "lattice",
            ProtocolPhase::CompositionAudit => "compositionAudit",
            ProtocolPhase::Injection => "injection",
            ProtocolPhase::Mesoscopic => "mesoscopic",
            ProtocolPhase::MassDefect => "massDefect",
            ProtocolPhase::Complete => "complete",
        }
    }

    /// Parse a wire name. Returns `None` outside the closed set so the
    /// checkpoint loader can report `INVALID_PHASE` with the raw value.
    pub fn parse(s: &str) -> Option<ProtocolPhase> {
        Self::ORDER.iter().copied().find(|p| p.as_str() == s)
    }
}

impl std::fmt::Display for ProtocolPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProtocolPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match ProtocolPhase::parse(s) {
            Some(p) => Ok(p),
            None => bail!(
                "Invalid protocol phase '{}'. Valid values: ignition, lattice, compositionAudit, injection, mesoscopic, massDefect, complete",
                s
            ),
        }
    }
}

/// Interview stages targeted by phase regression.
///
/// Distinct from [`ProtocolPhase`]: a contradiction surfaced during the
/// protocol sends the *interview* back to one of these stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewPhase {
    Discovery,
    Architecture,
    Constraints,
    DesignPreferences,
    Synthesis,
    Approval,
}

impl InterviewPhase {
    /// Interview order, earliest first. Regression picks the earliest
    /// affected phase when more than one is implicated.
    pub const ORDER: [InterviewPhase; 6] = [
        InterviewPhase::Discovery,
        InterviewPhase::Architecture,
        InterviewPhase::Constraints,
        InterviewPhase::DesignPreferences,
        InterviewPhase::Synthesis,
        InterviewPhase::Approval,
    ];

    pub fn index(&self) -> usize {
        Self::ORDER
            .iter()
            .position(|p| p == self)
            .expect("phase present in ORDER")
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewPhase::Discovery => "Discovery",
            InterviewPhase::Architecture => "Architecture",
            InterviewPhase::Constraints => "Constraints",
            InterviewPhase::DesignPreferences => "DesignPreferences",
            InterviewPhase::Synthesis => "Synthesis",
            InterviewPhase::Approval => "Approval",
        }
    }
}

impl std::fmt::Display for InterviewPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase axis recorded on ledger rows.
///
/// `Design` precedes the protocol proper; the rest mirror the protocol
/// stages. The order drives the "this phase or earlier" prompt filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPhase {
    Design,
    Ignition,
    Lattice,
    CompositionAudit,
    Injection,
    Mesoscopic,
    MassDefect,
}

impl DecisionPhase {
    pub const ORDER: [DecisionPhase; 7] = [
        DecisionPhase::Design,
        DecisionPhase::Ignition,
        DecisionPhase::Lattice,
        DecisionPhase::CompositionAudit,
        DecisionPhase::Injection,
        DecisionPhase::Mesoscopic,
        DecisionPhase::MassDefect,
    ];

    pub fn index(&self) -> usize {
        Self::ORDER
            .iter()
            .position(|p| p == self)
            .expect("phase present in ORDER")
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionPhase::Design => "design",
            DecisionPhase::Ignition => "ignition",
            DecisionPhase::Lattice => "lattice",
            DecisionPhase::CompositionAudit => "composition_audit",
            DecisionPhase::Injection => "injection",
            DecisionPhase::Mesoscopic => "mesoscopic",
            DecisionPhase::MassDefect => "mass_defect",
        }
    }

    pub fn parse(s: &str) -> Option<DecisionPhase> {
        Self::ORDER.iter().copied().find(|p| p.as_str() == s)
    }
}

impl std::fmt::Display for DecisionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DecisionPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match DecisionPhase::parse(s) {
            Some(p) => Ok(p),
            None => bail!(
                "Invalid decision phase '{}'. Valid values: design, ignition, lattice, composition_audit, injection, mesoscopic, mass_defect",
                s
            ),
        }
    }
}
