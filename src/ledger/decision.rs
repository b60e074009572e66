//! Decision rows and their closed enum axes.
//!
//! A decision is immutable after creation except for the revisable
//! attributes (`status`, `confidence`, `superseded_by`, `failure_context`),
//! and those change only through named ledger operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::DecisionPhase;

/// Subject area of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionCategory {
    Architectural,
    PhaseStructure,
    Injection,
    Ledger,
    TypeWitnesses,
    Contracts,
    Models,
    Blocking,
    Testing,
    Orchestrator,
    LanguageSupport,
    DataModel,
    Interface,
    Constraint,
    Security,
}

impl DecisionCategory {
    pub const ALL: [DecisionCategory; 15] = [
        DecisionCategory::Architectural,
        DecisionCategory::PhaseStructure,
        DecisionCategory::Injection,
        DecisionCategory::Ledger,
        DecisionCategory::TypeWitnesses,
        DecisionCategory::Contracts,
        DecisionCategory::Models,
        DecisionCategory::Blocking,
        DecisionCategory::Testing,
        DecisionCategory::Orchestrator,
        DecisionCategory::LanguageSupport,
        DecisionCategory::DataModel,
        DecisionCategory::Interface,
        DecisionCategory::Constraint,
        DecisionCategory::Security,
    ];

    /// The id prefix and wire name for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionCategory::Architectural => "architectural",
            DecisionCategory::PhaseStructure => "phase_structure",
            DecisionCategory::Injection => "injection",
            DecisionCategory::Ledger => "ledger",
            DecisionCategory::TypeWitnesses => "type_witnesses",
            DecisionCategory::Contracts => "contracts",
            DecisionCategory::Models => "models",
            DecisionCategory::Blocking => "blocking",
            DecisionCategory::Testing => "testing",
            DecisionCategory::Orchestrator => "orchestrator",
            DecisionCategory::LanguageSupport => "language_support",
            DecisionCategory::DataModel => "data_model",
            DecisionCategory::Interface => "interface",
            DecisionCategory::Constraint => "constraint",
            DecisionCategory::Security => "security",
        }
    }

    pub fn parse(s: &str) -> Option<DecisionCategory> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for DecisionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    UserExplicit,
    DesignPrinciple,
    OriginalDesign,
    Discussion,
    DesignChoice,
    DesignReview,
    InjectionFailure,
    AuditorContradiction,
    CompositionAudit,
    MesoscopicFailure,
    HumanResolution,
}

impl DecisionSource {
    pub const ALL: [DecisionSource; 11] = [
        DecisionSource::UserExplicit,
        DecisionSource::DesignPrinciple,
        DecisionSource::OriginalDesign,
        DecisionSource::Discussion,
        DecisionSource::DesignChoice,
        DecisionSource::DesignReview,
        DecisionSource::InjectionFailure,
        DecisionSource::AuditorContradiction,
        DecisionSource::CompositionAudit,
        DecisionSource::MesoscopicFailure,
        DecisionSource::HumanResolution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::UserExplicit => "user_explicit",
            DecisionSource::DesignPrinciple => "design_principle",
            DecisionSource::OriginalDesign => "original_design",
            DecisionSource::Discussion => "discussion",
            DecisionSource::DesignChoice => "design_choice",
            DecisionSource::DesignReview => "design_review",
            DecisionSource::InjectionFailure => "injection_failure",
            DecisionSource::AuditorContradiction => "auditor_contradiction",
            DecisionSource::CompositionAudit => "composition_audit",
            DecisionSource::MesoscopicFailure => "mesoscopic_failure",
            DecisionSource::HumanResolution => "human_resolution",
        }
    }
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authority level of a decision.
///
/// `Blocking` halts the protocol and is never formatted into prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Canonical,
    Delegated,
    Inferred,
    Provisional,
    Suspended,
    Blocking,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Canonical => "canonical",
            Confidence::Delegated => "delegated",
            Confidence::Inferred => "inferred",
            Confidence::Provisional => "provisional",
            Confidence::Suspended => "suspended",
            Confidence::Blocking => "blocking",
        }
    }

    pub fn parse(s: &str) -> Option<Confidence> {
        [
            Confidence::Canonical,
            Confidence::Delegated,
            Confidence::Inferred,
            Confidence::Provisional,
            Confidence::Suspended,
            Confidence::Blocking,
        ]
        .iter()
        .copied()
        .find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective visibility of a row. A row is in exactly one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Active,
    Superseded,
    Invalidated,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Active => "active",
            DecisionStatus::Superseded => "superseded",
            DecisionStatus::Invalidated => "invalidated",
        }
    }

    pub fn parse(s: &str) -> Option<DecisionStatus> {
        [
            DecisionStatus::Active,
            DecisionStatus::Superseded,
            DecisionStatus::Invalidated,
        ]
        .iter()
        .copied()
        .find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row in the decision ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// `<category>_<NNN>`, zero-padded to three digits
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: DecisionCategory,
    pub constraint: String,
    pub source: DecisionSource,
    pub confidence: Confidence,
    pub status: DecisionStatus,
    pub phase: DecisionPhase,
    /// Human audit only; never injected into any prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Ids this row depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Ids replaced by this row
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<String>,
    /// Set exactly when `status == superseded`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradiction_resolved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_query_id: Option<String>,
}

impl Decision {
    pub fn is_active(&self) -> bool {
        self.status == DecisionStatus::Active
    }
}

/// The caller-supplied shape for a new row. Id, timestamp, status and
/// `superseded_by` are owned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub category: DecisionCategory,
    pub constraint: String,
    pub source: DecisionSource,
    pub confidence: Confidence,
    pub phase: DecisionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradiction_resolved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_query_id: Option<String>,
}

impl DecisionInput {
    pub fn new(
        category: DecisionCategory,
        constraint: impl Into<String>,
        source: DecisionSource,
        confidence: Confidence,
        phase: DecisionPhase,
    ) -> Self {
        Self {
            category,
            constraint: constraint.into(),
            source,
            confidence,
            phase,
            rationale: None,
            dependencies: Vec::new(),
            supersedes: Vec::new(),
            failure_context: None,
            contradiction_resolved: None,
            human_query_id: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn with_failure_context(mut self, context: impl Into<String>) -> Self {
        self.failure_context = Some(context.into());
        self
    }

    pub fn with_contradiction_resolved(mut self, id: impl Into<String>) -> Self {
        self.contradiction_resolved = Some(id.into());
        self
    }

    pub fn with_human_query_id(mut self, id: impl Into<String>) -> Self {
        self.human_query_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_count_and_wire_names() {
        assert_eq!(DecisionCategory::ALL.len(), 15);
        assert_eq!(DecisionCategory::TypeWitnesses.as_str(), "type_witnesses");
        assert_eq!(
            DecisionCategory::parse("language_support"),
            Some(DecisionCategory::LanguageSupport)
        );
        assert_eq!(DecisionCategory::parse("typeWitnesses"), None);
    }

    #[test]
    fn test_source_count() {
        assert_eq!(DecisionSource::ALL.len(), 11);
        assert_eq!(
            DecisionSource::AuditorContradiction.as_str(),
            "auditor_contradiction"
        );
    }

    #[test]
    fn test_confidence_parse() {
        assert_eq!(Confidence::parse("canonical"), Some(Confidence::Canonical));
        assert_eq!(Confidence::parse("blocking"), Some(Confidence::Blocking));
        assert_eq!(Confidence::parse("certain"), None);
    }

    #[test]
    fn test_decision_serde_omits_empty_optionals() {
        let decision = Decision {
            id: "models_001".into(),
            timestamp: Utc::now(),
            category: DecisionCategory::Models,
            constraint: "Use the fast tier for lattice generation".into(),
            source: DecisionSource::DesignChoice,
            confidence: Confidence::Inferred,
            status: DecisionStatus::Active,
            phase: DecisionPhase::Design,
            rationale: None,
            dependencies: Vec::new(),
            supersedes: Vec::new(),
            superseded_by: None,
            failure_context: None,
            contradiction_resolved: None,
            human_query_id: None,
        };

        let json = serde_json::to_value(&decision).unwrap();
        assert!(json.get("rationale").is_none());
        assert!(json.get("dependencies").is_none());
        assert!(json.get("superseded_by").is_none());
        assert_eq!(json["status"], "active");
        assert_eq!(json["category"], "models");
    }

    #[test]
    fn test_decision_round_trip_with_optionals() {
        let decision = Decision {
            id: "contracts_012".into(),
            timestamp: Utc::now(),
            category: DecisionCategory::Contracts,
            constraint: "Contracts carry explicit preconditions".into(),
            source: DecisionSource::DesignReview,
            confidence: Confidence::Delegated,
            status: DecisionStatus::Superseded,
            phase: DecisionPhase::Lattice,
            rationale: Some("review follow-up".into()),
            dependencies: vec!["architectural_001".into()],
            supersedes: Vec::new(),
            superseded_by: Some("contracts_013".into()),
            failure_context: None,
            contradiction_resolved: None,
            human_query_id: None,
        };

        let json = serde_json::to_string(&decision).unwrap();
        let parsed: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, decision);
    }

    #[test]
    fn test_input_builder() {
        let input = DecisionInput::new(
            DecisionCategory::Security,
            "No secrets in archive directories",
            DecisionSource::UserExplicit,
            Confidence::Canonical,
            DecisionPhase::Design,
        )
        .with_dependencies(vec!["architectural_001".into()])
        .with_rationale("raised during threat review");

        assert_eq!(input.dependencies.len(), 1);
        assert!(input.rationale.is_some());
        assert!(input.supersedes.is_empty());
    }
}
