//! Contradiction reports consumed from the external auditor.
//!
//! The kernel never detects contradictions itself; it classifies reports
//! produced elsewhere. These types mirror the auditor's JSON shape.

use serde::{Deserialize, Serialize};

/// What kind of conflict the auditor found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionType {
    Temporal,
    Resource,
    Invariant,
    PreconditionGap,
    PostconditionConflict,
}

impl ContradictionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContradictionType::Temporal => "temporal",
            ContradictionType::Resource => "resource",
            ContradictionType::Invariant => "invariant",
            ContradictionType::PreconditionGap => "precondition_gap",
            ContradictionType::PostconditionConflict => "postcondition_conflict",
        }
    }
}

impl std::fmt::Display for ContradictionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

/// The kind of specification element a contradiction touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Constraint,
    Contract,
    Witness,
    Claim,
}

/// One element implicated in a contradiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvolvedElement {
    pub element_type: ElementType,
    pub id: String,
    pub name: String,
    pub text: String,
}

/// A single contradiction as reported by the auditor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contradiction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContradictionType,
    pub severity: Severity,
    pub description: String,
    pub involved: Vec<InvolvedElement>,
    pub analysis: String,
    pub minimal_scenario: String,
    #[serde(default)]
    pub suggested_resolutions: Vec<String>,
}

impl Contradiction {
    /// Ids of involved elements that are constraints.
    pub fn involved_constraint_ids(&self) -> Vec<String> {
        self.involved
            .iter()
            .filter(|e| e.element_type == ElementType::Constraint)
            .map(|e| e.id.clone())
            .collect()
    }
}
