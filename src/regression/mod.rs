//! Contradiction-driven phase regression.
//!
//! Analysis partitions the constraint universe into affected and preserved
//! sets, classifies the batch as simple (regress to one earlier interview
//! phase) or complex (halt for human guidance), and constructs resolution
//! options. The handler composes that analysis with the ledger: one
//! blocking-confidence row per invocation, best-effort downgrades of
//! implicated delegated decisions, and either a regression question or a
//! Blocking state.
//!
//! The kernel classifies, it never infers: every mapping here is a fixed
//! table.

pub mod contradiction;

use std::collections::HashMap;

use tracing::warn;

use crate::errors::RegressionError;
use crate::ledger::{
    AppendOptions, Confidence, DecisionCategory, DecisionInput, DecisionLedger, DecisionSource,
};
use crate::phase::{DecisionPhase, InterviewPhase, ProtocolPhase};
use crate::state::ProtocolState;

pub use contradiction::{
    Contradiction, ContradictionType, ElementType, InvolvedElement, Severity,
};

/// Which interview phase owns elements of this type.
pub fn element_phase(element_type: ElementType) -> InterviewPhase {
    match element_type {
        ElementType::Constraint => InterviewPhase::Constraints,
        ElementType::Contract => InterviewPhase::Architecture,
        ElementType::Witness => InterviewPhase::Architecture,
        ElementType::Claim => InterviewPhase::Discovery,
    }
}

/// Which interview phase a contradiction of this type implicates.
pub fn contradiction_phase(kind: ContradictionType) -> InterviewPhase {
    match kind {
        ContradictionType::Temporal => InterviewPhase::Constraints,
        ContradictionType::Resource => InterviewPhase::Constraints,
        ContradictionType::Invariant => InterviewPhase::Architecture,
        ContradictionType::PreconditionGap => InterviewPhase::Architecture,
        ContradictionType::PostconditionConflict => InterviewPhase::Constraints,
    }
}

/// One concrete way out of a contradiction, offered to the human.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestedResolution {
    /// `resolution_<contradiction-id>_<index>`
    pub id: String,
    pub description: String,
    /// Majority phase of the contradiction's involved elements.
    pub affected_phase: InterviewPhase,
    pub requires_spec_change: bool,
    pub affected_constraint_ids: Vec<String>,
}

/// Simple contradictions regress; complex ones block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegressionClassification {
    Simple { target_phase: InterviewPhase },
    Complex,
}

/// The full analysis of a contradiction batch.
#[derive(Debug, Clone)]
pub struct RegressionAnalysis {
    pub affected_constraint_ids: Vec<String>,
    pub affected_phases: Vec<InterviewPhase>,
    pub preserved_constraint_ids: Vec<String>,
    /// Delegated decisions implicated by the affected constraints.
    pub downgrade_candidates: Vec<String>,
    pub classification: RegressionClassification,
    pub suggested_resolutions: Vec<SuggestedResolution>,
}

/// Inputs the handler needs beyond the contradictions themselves.
pub struct RegressionOptions<'a> {
    /// The full constraint universe; the analysis partitions it.
    pub all_constraint_ids: Vec<String>,
    /// Delegated decision ids eligible for downgrade.
    pub delegated_decision_ids: Vec<String>,
    /// Sink for absorbed downgrade failures. Defaults to `tracing::warn!`.
    pub logger: Option<&'a dyn Fn(&str)>,
}

impl<'a> RegressionOptions<'a> {
    pub fn new(all_constraint_ids: Vec<String>, delegated_decision_ids: Vec<String>) -> Self {
        Self {
            all_constraint_ids,
            delegated_decision_ids,
            logger: None,
        }
    }

    fn log(&self, message: &str) {
        match self.logger {
            Some(logger) => logger(message),
            None => warn!("{message}"),
        }
    }
}

/// Shared payload of both handler outcomes.
#[derive(Debug, Clone)]
pub struct RegressionReport {
    pub analysis: RegressionAnalysis,
    /// Delegated decisions actually downgraded (failures are omitted).
    pub downgraded_decision_ids: Vec<String>,
    /// The blocking-confidence ledger row recorded for this batch.
    pub blocking_decision_id: String,
}

/// What the handler decided.
#[derive(Debug, Clone)]
pub enum RegressionOutcome {
    /// Return the interview to `target_phase` with a phase-specific question.
    Regression {
        target_phase: InterviewPhase,
        regression_question: String,
        report: RegressionReport,
    },
    /// Too entangled for a targeted revert; halt for human guidance.
    Blocked {
        state: ProtocolState,
        options: Vec<String>,
        report: RegressionReport,
    },
}

impl RegressionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            RegressionOutcome::Regression { .. } => "regression",
            RegressionOutcome::Blocked { .. } => "blocked",
        }
    }

    pub fn report(&self) -> &RegressionReport {
        match self {
            RegressionOutcome::Regression { report, .. } => report,
            RegressionOutcome::Blocked { report, .. } => report,
        }
    }
}

/// Result of [`handle_all_resolutions_rejected`].
#[derive(Debug, Clone)]
pub struct RejectionOutcome {
    pub blocking_decision_id: String,
    pub state: ProtocolState,
}

/// Pure analysis of a contradiction batch against the constraint universe.
pub fn analyze_contradictions(
    contradictions: &[Contradiction],
    options: &RegressionOptions<'_>,
) -> RegressionAnalysis {
    let mut affected_constraint_ids: Vec<String> = Vec::new();
    for c in contradictions {
        for id in c.involved_constraint_ids() {
            if !affected_constraint_ids.contains(&id) {
                affected_constraint_ids.push(id);
            }
        }
    }

    let mut affected_phases: Vec<InterviewPhase> = Vec::new();
    for c in contradictions {
        let mut push = |phase: InterviewPhase| {
            if !affected_phases.contains(&phase) {
                affected_phases.push(phase);
            }
        };
        for element in &c.involved {
            push(element_phase(element.element_type));
        }
        push(contradiction_phase(c.kind));
    }
    affected_phases.sort_by_key(|p| p.index());

    let preserved_constraint_ids: Vec<String> = options
        .all_constraint_ids
        .iter()
        .filter(|id| !affected_constraint_ids.contains(id))
        .cloned()
        .collect();

    let downgrade_candidates: Vec<String> = options
        .delegated_decision_ids
        .iter()
        .filter(|id| affected_constraint_ids.contains(id))
        .cloned()
        .collect();

    let classification = classify(contradictions, &affected_phases);

    let suggested_resolutions = contradictions
        .iter()
        .flat_map(|c| {
            let affected_ids = c.involved_constraint_ids();
            let phase = majority_phase(c);
            c.suggested_resolutions
                .iter()
                .enumerate()
                .map(move |(i, description)| SuggestedResolution {
                    id: format!("resolution_{}_{}", c.id, i),
                    description: description.clone(),
                    affected_phase: phase,
                    requires_spec_change: true,
                    affected_constraint_ids: affected_ids.clone(),
                })
        })
        .collect();

    RegressionAnalysis {
        affected_constraint_ids,
        affected_phases,
        preserved_constraint_ids,
        downgrade_candidates,
        classification,
        suggested_resolutions,
    }
}

/// Complex iff more than one contradiction, more than two affected phases,
/// or any involved element shared between two contradictions.
fn classify(
    contradictions: &[Contradiction],
    affected_phases: &[InterviewPhase],
) -> RegressionClassification {
    if contradictions.len() > 1
        || affected_phases.len() > 2
        || has_shared_involved_id(contradictions)
    {
        return RegressionClassification::Complex;
    }
    // Simple: exactly one contradiction; regress to the earliest affected phase
    let target_phase = affected_phases
        .first()
        .copied()
        .unwrap_or(InterviewPhase::Discovery);
    RegressionClassification::Simple { target_phase }
}

fn has_shared_involved_id(contradictions: &[Contradiction]) -> bool {
    // An element id counts as shared only across two distinct contradictions
    let mut owner: HashMap<&str, &str> = HashMap::new();
    for c in contradictions {
        for element in &c.involved {
            match owner.get(element.id.as_str()) {
                Some(first) if *first != c.id.as_str() => return true,
                Some(_) => {}
                None => {
                    owner.insert(element.id.as_str(), c.id.as_str());
                }
            }
        }
    }
    false
}

/// The most common interview phase among a contradiction's involved
/// elements; ties break toward the earlier phase. Falls back to the
/// type mapping when nothing is involved.
fn majority_phase(contradiction: &Contradiction) -> InterviewPhase {
    if contradiction.involved.is_empty() {
        return contradiction_phase(contradiction.kind);
    }
    let mut counts: Vec<(InterviewPhase, usize)> = Vec::new();
    for element in &contradiction.involved {
        let phase = element_phase(element.element_type);
        match counts.iter_mut().find(|(p, _)| *p == phase) {
            Some((_, n)) => *n += 1,
            None => counts.push((phase, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.index().cmp(&b.0.index())));
    counts[0].0
}

/// Turn a contradiction batch into a targeted regression or a Blocking
/// state, recording the decision trail in the ledger along the way.
pub fn handle_phase_regression(
    contradictions: &[Contradiction],
    ledger: &mut DecisionLedger,
    options: &RegressionOptions<'_>,
) -> Result<RegressionOutcome, RegressionError> {
    if contradictions.is_empty() {
        return Err(RegressionError::NoContradictions);
    }

    let analysis = analyze_contradictions(contradictions, options);

    let blocking_decision_id = match analysis.classification {
        RegressionClassification::Complex => {
            record_blocking_row(ledger, &complex_summary(contradictions))?
        }
        RegressionClassification::Simple { .. } => {
            let c = &contradictions[0];
            record_blocking_row(
                ledger,
                &format!("Contradiction {} ({}): {}", c.id, c.kind, c.description),
            )?
        }
    };

    // Downgrades are best-effort: a missing or wrong-confidence id is logged
    // and omitted, never fatal.
    let reason = contradictions
        .iter()
        .map(|c| c.description.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    let mut downgraded_decision_ids = Vec::new();
    for id in &analysis.downgrade_candidates {
        match ledger.downgrade_delegated(id, &reason) {
            Ok(_) => downgraded_decision_ids.push(id.clone()),
            Err(e) => options.log(&format!("skipping downgrade of {id}: {e}")),
        }
    }

    let report = RegressionReport {
        analysis,
        downgraded_decision_ids,
        blocking_decision_id,
    };

    match report.analysis.classification {
        RegressionClassification::Simple { target_phase } => Ok(RegressionOutcome::Regression {
            target_phase,
            regression_question: regression_question(target_phase, &contradictions[0]),
            report,
        }),
        RegressionClassification::Complex => {
            let mut resolution_options: Vec<String> = report
                .analysis
                .suggested_resolutions
                .iter()
                .map(|r| r.description.clone())
                .collect();
            resolution_options.push("Provide custom resolution".to_string());

            let query = blocking_query(contradictions, &report.analysis);
            let state = ProtocolState::blocking(
                ProtocolPhase::CompositionAudit,
                query,
                Some(resolution_options.clone()),
                None,
                "interacting contradictions require human guidance",
            );
            Ok(RegressionOutcome::Blocked {
                state,
                options: resolution_options,
                report,
            })
        }
    }
}

/// Record the human's rejection of every suggested resolution and halt.
pub fn handle_all_resolutions_rejected(
    contradiction: &Contradiction,
    ledger: &mut DecisionLedger,
) -> Result<RejectionOutcome, RegressionError> {
    let decision = ledger.append(
        DecisionInput::new(
            DecisionCategory::Blocking,
            format!(
                "All {} suggested resolutions for contradiction {} were rejected",
                contradiction.suggested_resolutions.len(),
                contradiction.id
            ),
            DecisionSource::HumanResolution,
            Confidence::Blocking,
            DecisionPhase::CompositionAudit,
        )
        .with_contradiction_resolved(contradiction.id.clone()),
        &AppendOptions::default(),
    )?;

    let query = format!(
        "rejected: every suggested resolution for contradiction {} was declined. {} Provide custom resolution guidance.",
        contradiction.id, contradiction.description
    );
    let state = ProtocolState::blocking(
        ProtocolPhase::CompositionAudit,
        query,
        None,
        None,
        "all suggested resolutions rejected",
    );

    Ok(RejectionOutcome {
        blocking_decision_id: decision.id,
        state,
    })
}

fn record_blocking_row(
    ledger: &mut DecisionLedger,
    constraint: &str,
) -> Result<String, RegressionError> {
    let decision = ledger.append(
        DecisionInput::new(
            DecisionCategory::Blocking,
            constraint,
            DecisionSource::AuditorContradiction,
            Confidence::Blocking,
            DecisionPhase::CompositionAudit,
        ),
        &AppendOptions::default(),
    )?;
    Ok(decision.id)
}

fn complex_summary(contradictions: &[Contradiction]) -> String {
    let items = contradictions
        .iter()
        .map(|c| format!("{} ({}): {}", c.id, c.kind, c.description))
        .collect::<Vec<_>>()
        .join("; ");
    format!(
        "{} interacting contradictions require human resolution: {}",
        contradictions.len(),
        items
    )
}

fn blocking_query(contradictions: &[Contradiction], analysis: &RegressionAnalysis) -> String {
    let mut query = String::from("INTERACTING CONTRADICTIONS require guidance before the protocol can continue.\n\n");
    for c in contradictions {
        query.push_str(&format!("- {} ({}): {}\n", c.id, c.kind, c.description));
    }
    let phases = analysis
        .affected_phases
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    query.push_str(&format!(
        "\nAffected interview phases: {phases}. {} constraints affected, {} preserved.\nHow should these be resolved?",
        analysis.affected_constraint_ids.len(),
        analysis.preserved_constraint_ids.len()
    ));
    query
}

fn regression_question(phase: InterviewPhase, contradiction: &Contradiction) -> String {
    let context = format!(
        "Contradiction {} ({}): {}",
        contradiction.id, contradiction.kind, contradiction.description
    );
    match phase {
        InterviewPhase::Discovery => format!(
            "{context} This undermines a core claim about what the system does. What behavior must the system actually provide?"
        ),
        InterviewPhase::Architecture => format!(
            "{context} The structural elements involved cannot all hold. Which architectural approach should take precedence?"
        ),
        InterviewPhase::Constraints => format!(
            "{context} The constraints involved cannot all be satisfied. Which constraint should be relaxed, and which takes precedence?"
        ),
        InterviewPhase::DesignPreferences => format!(
            "{context} The stated preferences conflict. Which preference should win?"
        ),
        InterviewPhase::Synthesis => format!(
            "{context} The synthesized specification is internally inconsistent. How should the specification change?"
        ),
        InterviewPhase::Approval => format!(
            "{context} The approved specification no longer holds. Re-approve with which amendment?"
        ),
    }
}
