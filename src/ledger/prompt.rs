//! Prompt assembly from ledger rows.
//!
//! Only active rows are eligible. Rows with blocking confidence halt the
//! protocol and are never formatted; `rationale` is a human audit field and
//! is stripped unconditionally. The optional phase filter admits rows
//! recorded at that phase or earlier in the fixed decision-phase order.

use super::{Confidence, Decision, DecisionLedger};
use crate::phase::DecisionPhase;

/// Render the active ledger into the three prompt buckets.
pub fn format_for_prompt(ledger: &DecisionLedger, phase: Option<DecisionPhase>) -> String {
    let eligible: Vec<&Decision> = ledger
        .get_active_decisions()
        .into_iter()
        .filter(|d| d.confidence != Confidence::Blocking)
        .filter(|d| phase.is_none_or(|p| d.phase.index() <= p.index()))
        .collect();

    let canonical: Vec<&&Decision> = eligible
        .iter()
        .filter(|d| d.confidence == Confidence::Canonical)
        .collect();
    let inferred: Vec<&&Decision> = eligible
        .iter()
        .filter(|d| {
            matches!(
                d.confidence,
                Confidence::Delegated | Confidence::Inferred | Confidence::Provisional
            )
        })
        .collect();
    let suspended: Vec<&&Decision> = eligible
        .iter()
        .filter(|d| d.confidence == Confidence::Suspended)
        .collect();

    let mut out = String::new();
    push_bucket(&mut out, "CANONICAL (user-confirmed)", &canonical);
    push_bucket(&mut out, "INFERRED", &inferred);
    push_bucket(&mut out, "SUSPENDED", &suspended);
    out.trim_end().to_string()
}

fn push_bucket(out: &mut String, heading: &str, rows: &[&&Decision]) {
    if rows.is_empty() {
        return;
    }
    out.push_str(heading);
    out.push_str(":\n");
    for d in rows {
        out.push_str(&format!("- [{}] {}\n", d.id, d.constraint));
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{
        AppendOptions, DecisionCategory, DecisionInput, DecisionSource, InvalidateOptions,
    };

    fn add(
        ledger: &mut DecisionLedger,
        constraint: &str,
        confidence: Confidence,
        phase: DecisionPhase,
    ) -> String {
        ledger
            .append(
                DecisionInput::new(
                    DecisionCategory::Constraint,
                    constraint,
                    DecisionSource::Discussion,
                    confidence,
                    phase,
                )
                .with_rationale("internal audit note"),
                &AppendOptions::default(),
            )
            .unwrap()
            .id
    }

    #[test]
    fn test_buckets_by_confidence() {
        let mut ledger = DecisionLedger::new();
        add(&mut ledger, "canonical rule", Confidence::Canonical, DecisionPhase::Design);
        add(&mut ledger, "delegated rule", Confidence::Delegated, DecisionPhase::Design);
        add(&mut ledger, "inferred rule", Confidence::Inferred, DecisionPhase::Design);
        add(&mut ledger, "provisional rule", Confidence::Provisional, DecisionPhase::Design);
        add(&mut ledger, "suspended rule", Confidence::Suspended, DecisionPhase::Design);

        let prompt = format_for_prompt(&ledger, None);

        let canonical_pos = prompt.find("CANONICAL (user-confirmed):").unwrap();
        let inferred_pos = prompt.find("INFERRED:").unwrap();
        let suspended_pos = prompt.find("SUSPENDED:").unwrap();
        assert!(canonical_pos < inferred_pos && inferred_pos < suspended_pos);

        // Delegated and provisional rows land in the INFERRED bucket
        let inferred_section = &prompt[inferred_pos..suspended_pos];
        assert!(inferred_section.contains("delegated rule"));
        assert!(inferred_section.contains("inferred rule"));
        assert!(inferred_section.contains("provisional rule"));
    }

    #[test]
    fn test_blocking_rows_never_formatted() {
        let mut ledger = DecisionLedger::new();
        add(&mut ledger, "normal rule", Confidence::Inferred, DecisionPhase::Design);
        add(&mut ledger, "halt the protocol", Confidence::Blocking, DecisionPhase::Design);

        let prompt = format_for_prompt(&ledger, None);
        assert!(prompt.contains("normal rule"));
        assert!(!prompt.contains("halt the protocol"));
    }

    #[test]
    fn test_rationale_is_stripped() {
        let mut ledger = DecisionLedger::new();
        add(&mut ledger, "rule text", Confidence::Canonical, DecisionPhase::Design);

        let prompt = format_for_prompt(&ledger, None);
        assert!(!prompt.contains("internal audit note"));
    }

    #[test]
    fn test_inactive_rows_excluded() {
        let mut ledger = DecisionLedger::new();
        let id = add(&mut ledger, "retired rule", Confidence::Inferred, DecisionPhase::Design);
        ledger.invalidate(&id, &InvalidateOptions::default()).unwrap();

        let prompt = format_for_prompt(&ledger, None);
        assert!(!prompt.contains("retired rule"));
    }

    #[test]
    fn test_phase_filter_admits_earlier_phases_only() {
        let mut ledger = DecisionLedger::new();
        add(&mut ledger, "design-era rule", Confidence::Inferred, DecisionPhase::Design);
        add(&mut ledger, "lattice-era rule", Confidence::Inferred, DecisionPhase::Lattice);
        add(&mut ledger, "late rule", Confidence::Inferred, DecisionPhase::Mesoscopic);

        let prompt = format_for_prompt(&ledger, Some(DecisionPhase::Lattice));
        assert!(prompt.contains("design-era rule"));
        assert!(prompt.contains("lattice-era rule"));
        assert!(!prompt.contains("late rule"));
    }

    #[test]
    fn test_empty_ledger_formats_empty() {
        let ledger = DecisionLedger::new();
        assert_eq!(format_for_prompt(&ledger, None), "");
    }
}
