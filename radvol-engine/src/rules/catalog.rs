//! The production rule catalog
//!
//! Order matters and is fixed here: value backfill runs before splitting
//! so compound exams split an already-backfilled value; registry
//! correction runs before roster reassignment so the roster rule sees the
//! registry's specialty; the universal category back-fill is last and
//! reapplies the registry category regardless of which earlier rule
//! touched the row.

use crate::models::{MotiveCode, ReferenceData};

use super::names::normalize_physician_name;
use super::{Rule, RowState, RuleOutcome};

/// Specialty values that mean "not actually resolved upstream"
pub const GENERIC_SPECIALTY_MARKERS: &[&str] = &["GERAL", "INDEFINIDA"];

/// Fallback specialty when the physician is not on any roster
pub const DEFAULT_SPECIALTY: &str = "RADIOLOGIA GERAL";

/// The fixed production order
pub fn standard_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(ValueBackfill),
        Box::new(ExamSplit),
        Box::new(RegistryCorrection),
        Box::new(RosterReassignment),
        Box::new(TemporalValidity),
        Box::new(CategoryBackfill),
    ]
}

/// De-para value backfill: zero/absent values take the reference value.
///
/// A mapping that exists but maps to zero is a reportable anomaly, not a
/// silent resolution.
pub struct ValueBackfill;

impl Rule for ValueBackfill {
    fn id(&self) -> &'static str {
        "valor_de_para"
    }

    fn applies_to(&self, state: &RowState) -> bool {
        state.row.value == 0.0
    }

    fn apply(&self, state: &mut RowState, refdata: &ReferenceData) -> RuleOutcome {
        match refdata.depara.get(&state.row.exam_name) {
            Some(reference) if *reference > 0.0 => {
                state.row.value = *reference;
                RuleOutcome::Mutated
            }
            Some(_) => RuleOutcome::Anomaly(format!(
                "mapping present but unusable for exam '{}'",
                state.row.exam_name
            )),
            None => RuleOutcome::Miss,
        }
    }
}

/// Exam splitting: a configured compound exam expands into derived
/// allocations, each with its own target category, inheriting the
/// parent's other dimensions.
pub struct ExamSplit;

impl Rule for ExamSplit {
    fn id(&self) -> &'static str {
        "quebra_exame"
    }

    fn applies_to(&self, state: &RowState) -> bool {
        // Never resplit a derived allocation; table membership is
        // confirmed in apply, which sees the reference data.
        state.derivation.is_empty()
    }

    fn apply(&self, state: &mut RowState, refdata: &ReferenceData) -> RuleOutcome {
        let Some(break_rules) = refdata.break_rules.get(&state.row.exam_name) else {
            return RuleOutcome::Miss;
        };

        if state.row.value == 0.0 {
            if refdata
                .depara
                .get(&state.row.exam_name)
                .is_some_and(|v| *v > 0.0)
            {
                // Backfill should have resolved this value already;
                // flag for operator review instead of splitting zeros.
                return RuleOutcome::Anomaly(format!(
                    "applicable rule not applied for exam '{}'",
                    state.row.exam_name
                ));
            }
        }

        let children = break_rules
            .iter()
            .map(|rule| {
                let mut child = state.clone();
                child.derivation = rule.derived_suffix.clone();
                child.row.category = Some(rule.target_category.clone());
                child.row.value = state.row.value * rule.value_share;
                child
            })
            .collect();

        state.expand_into(children);
        RuleOutcome::Mutated
    }
}

/// Registry-driven specialty/category correction: the canonical exam
/// registry overwrites both fields, but only when they differ.
pub struct RegistryCorrection;

impl Rule for RegistryCorrection {
    fn id(&self) -> &'static str {
        "registro_exame"
    }

    fn applies_to(&self, _: &RowState) -> bool {
        true
    }

    fn apply(&self, state: &mut RowState, refdata: &ReferenceData) -> RuleOutcome {
        let Some(entry) = refdata.registry.get(&state.row.exam_name) else {
            return RuleOutcome::Miss;
        };

        let mut changed = false;
        if state.row.specialty.as_deref() != Some(entry.specialty.as_str()) {
            state.row.specialty = Some(entry.specialty.clone());
            changed = true;
        }
        if state.row.category.as_deref() != Some(entry.category.as_str()) {
            state.row.category = Some(entry.category.clone());
            changed = true;
        }

        if changed {
            RuleOutcome::Mutated
        } else {
            RuleOutcome::Unchanged
        }
    }
}

/// Physician-roster specialty reassignment: rows carrying a generic
/// specialty marker resolve the true specialty through the performing
/// physician's roster entry, falling back to a documented default.
pub struct RosterReassignment;

impl Rule for RosterReassignment {
    fn id(&self) -> &'static str {
        "especialidade_plantonista"
    }

    fn applies_to(&self, state: &RowState) -> bool {
        match &state.row.specialty {
            Some(specialty) => {
                let folded = crate::ingest::normalize_token(specialty).to_uppercase();
                GENERIC_SPECIALTY_MARKERS.contains(&folded.as_str())
            }
            None => false,
        }
    }

    fn apply(&self, state: &mut RowState, refdata: &ReferenceData) -> RuleOutcome {
        let roster_specialty = state
            .row
            .physician
            .as_deref()
            .map(normalize_physician_name)
            .filter(|key| !key.is_empty())
            .and_then(|key| refdata.roster.get(&key).cloned());

        state.row.specialty = Some(roster_specialty.unwrap_or_else(|| DEFAULT_SPECIALTY.to_string()));
        RuleOutcome::Mutated
    }
}

/// Temporal-validity exclusion: the only rule allowed to move a row out
/// of the pipeline into the exclusion ledger.
pub struct TemporalValidity;

impl Rule for TemporalValidity {
    fn id(&self) -> &'static str {
        "validade_temporal"
    }

    fn applies_to(&self, _: &RowState) -> bool {
        true
    }

    fn apply(&self, state: &mut RowState, refdata: &ReferenceData) -> RuleOutcome {
        let Some(window) = refdata.billing_window else {
            return RuleOutcome::Unchanged;
        };

        if let Some(reported) = state.row.reported_date {
            if reported > window.report_cutoff {
                return RuleOutcome::Excluded(
                    MotiveCode::TemporalExclusion,
                    format!(
                        "report date {} after billing cutoff {}",
                        reported, window.report_cutoff
                    ),
                );
            }
        }

        if let Some(realized) = state.row.realized_date {
            if realized < window.period_start {
                return RuleOutcome::Excluded(
                    MotiveCode::TemporalExclusion,
                    format!(
                        "realization date {} before billing period start {}",
                        realized, window.period_start
                    ),
                );
            }
        }

        RuleOutcome::Unchanged
    }
}

/// Universal category back-fill: final cross-cutting pass reapplying the
/// registry category wherever the current category differs.
pub struct CategoryBackfill;

impl Rule for CategoryBackfill {
    fn id(&self) -> &'static str {
        "categoria_universal"
    }

    fn applies_to(&self, _: &RowState) -> bool {
        true
    }

    fn apply(&self, state: &mut RowState, refdata: &ReferenceData) -> RuleOutcome {
        let Some(entry) = refdata.registry.get(&state.row.exam_name) else {
            return RuleOutcome::Unchanged;
        };

        if state.row.category.as_deref() != Some(entry.category.as_str()) {
            state.row.category = Some(entry.category.clone());
            RuleOutcome::Mutated
        } else {
            RuleOutcome::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BillingWindow, ExamBreakRule, ExamRegistryEntry, NormalizedRow, ReferenceData,
    };
    use crate::rules::{RowResolution, RuleEngine, RulePassStats};
    use chrono::NaiveDate;

    fn row(exam: &str) -> NormalizedRow {
        NormalizedRow {
            client: "HOSP".into(),
            patient: "ANA".into(),
            exam_name: exam.into(),
            modality: Some("CR".into()),
            specialty: None,
            category: None,
            priority: Some("ROTINA".into()),
            physician: None,
            quantity: 1,
            value: 0.0,
            realized_date: None,
            realized_time: None,
            reported_date: None,
            reported_time: None,
            parse_notes: Vec::new(),
        }
    }

    fn refdata() -> ReferenceData {
        let mut data = ReferenceData::default();
        data.depara.insert("CRANIO".into(), 18.0);
        data.depara.insert("MAPEAMENTO ZERADO".into(), 0.0);
        data.break_rules.insert(
            "ANGIO RM".into(),
            vec![
                ExamBreakRule {
                    source_exam: "ANGIO RM".into(),
                    derived_suffix: "base".into(),
                    target_category: "RM".into(),
                    value_share: 0.6,
                },
                ExamBreakRule {
                    source_exam: "ANGIO RM".into(),
                    derived_suffix: "contraste".into(),
                    target_category: "RM CONTRASTE".into(),
                    value_share: 0.4,
                },
            ],
        );
        data.registry.insert(
            "CRANIO".into(),
            ExamRegistryEntry {
                exam_name: "CRANIO".into(),
                specialty: "TOMOGRAFIA".into(),
                category: "TC".into(),
            },
        );
        data.roster.insert("joao souza".into(), "NEURO".into());
        data.billing_window = Some(BillingWindow {
            period_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            report_cutoff: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        });
        data
    }

    fn run(row: NormalizedRow, data: &ReferenceData) -> (RowResolution, RulePassStats) {
        let engine = RuleEngine::standard();
        let mut stats = RulePassStats::default();
        let resolution = engine.process_row(row, data, &mut stats);
        (resolution, stats)
    }

    #[test]
    fn zero_value_backfills_from_depara() {
        let (resolution, _) = run(row("CRANIO"), &refdata());
        match resolution {
            RowResolution::Committed(rows) => assert_eq!(rows[0].0.value, 18.0),
            _ => panic!("expected commit"),
        }
    }

    #[test]
    fn zero_reference_value_is_an_anomaly_not_a_fix() {
        let (resolution, stats) = run(row("MAPEAMENTO ZERADO"), &refdata());
        match resolution {
            RowResolution::Committed(rows) => assert_eq!(rows[0].0.value, 0.0),
            _ => panic!("expected commit"),
        }
        assert_eq!(stats.counters_for("valor_de_para").anomalies, 1);
        assert!(stats.anomalies[0].contains("unusable"));
    }

    #[test]
    fn depara_miss_increments_counter_and_continues() {
        let (resolution, stats) = run(row("EXAME DESCONHECIDO"), &refdata());
        assert!(matches!(resolution, RowResolution::Committed(_)));
        assert_eq!(stats.counters_for("valor_de_para").misses, 1);
    }

    #[test]
    fn compound_exam_splits_into_derived_allocations() {
        let mut compound = row("ANGIO RM");
        compound.value = 100.0;

        let (resolution, _) = run(compound, &refdata());
        let rows = match resolution {
            RowResolution::Committed(rows) => rows,
            _ => panic!("expected commit"),
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].1, "base");
        assert_eq!(rows[0].0.value, 60.0);
        assert_eq!(rows[0].0.category.as_deref(), Some("RM"));
        assert_eq!(rows[1].1, "contraste");
        assert_eq!(rows[1].0.value, 40.0);
        // Other dimensions inherited from the parent
        assert_eq!(rows[1].0.patient, "ANA");
        assert_eq!(rows[1].0.modality.as_deref(), Some("CR"));
    }

    #[test]
    fn splittable_zero_value_with_reference_flags_not_applied() {
        let mut data = refdata();
        data.depara.insert("ANGIO RM".into(), 250.0);
        // Backfill would normally fix the value first; force the gap by
        // running the split rule alone.
        let engine = RuleEngine::new(vec![Box::new(ExamSplit)]);
        let mut stats = RulePassStats::default();
        let resolution = engine.process_row(row("ANGIO RM"), &data, &mut stats);

        match resolution {
            RowResolution::Committed(rows) => assert_eq!(rows.len(), 1),
            _ => panic!("expected commit"),
        }
        assert_eq!(stats.counters_for("quebra_exame").anomalies, 1);
        assert!(stats.anomalies[0].contains("not applied"));
    }

    #[test]
    fn registry_overwrites_only_when_different() {
        let engine = RuleEngine::new(vec![Box::new(RegistryCorrection)]);
        let data = refdata();

        let mut already_correct = row("CRANIO");
        already_correct.specialty = Some("TOMOGRAFIA".into());
        already_correct.category = Some("TC".into());

        let mut stats = RulePassStats::default();
        engine.process_row(already_correct, &data, &mut stats);
        assert_eq!(stats.counters_for("registro_exame").mutated, 0);

        let mut stats = RulePassStats::default();
        engine.process_row(row("CRANIO"), &data, &mut stats);
        assert_eq!(stats.counters_for("registro_exame").mutated, 1);
    }

    #[test]
    fn roster_hit_reassigns_generic_specialty() {
        let mut generic = row("EXAME DESCONHECIDO");
        generic.specialty = Some("GERAL".into());
        generic.physician = Some("DR. JOÃO SOUZA".into());

        let (resolution, _) = run(generic, &refdata());
        match resolution {
            RowResolution::Committed(rows) => {
                assert_eq!(rows[0].0.specialty.as_deref(), Some("NEURO"));
            }
            _ => panic!("expected commit"),
        }
    }

    #[test]
    fn roster_miss_assigns_default_specialty() {
        let mut generic = row("EXAME DESCONHECIDO");
        generic.specialty = Some("GERAL".into());
        generic.physician = Some("DRA. DESCONHECIDA".into());

        let (resolution, _) = run(generic, &refdata());
        match resolution {
            RowResolution::Committed(rows) => {
                assert_eq!(rows[0].0.specialty.as_deref(), Some(DEFAULT_SPECIALTY));
            }
            _ => panic!("expected commit"),
        }
    }

    #[test]
    fn late_report_is_excluded_with_temporal_motive() {
        let mut late = row("CRANIO");
        late.reported_date = NaiveDate::from_ymd_opt(2024, 2, 10);

        let (resolution, _) = run(late, &refdata());
        match resolution {
            RowResolution::Excluded { motive, detail } => {
                assert_eq!(motive, MotiveCode::TemporalExclusion);
                assert!(detail.contains("after billing cutoff"));
            }
            _ => panic!("late report must be excluded"),
        }
    }

    #[test]
    fn prior_period_realization_is_excluded() {
        let mut stale = row("CRANIO");
        stale.realized_date = NaiveDate::from_ymd_opt(2023, 12, 28);
        stale.reported_date = NaiveDate::from_ymd_opt(2024, 1, 3);

        let (resolution, _) = run(stale, &refdata());
        assert!(matches!(resolution, RowResolution::Excluded { .. }));
    }

    #[test]
    fn category_backfill_is_final_word() {
        // Give the row a category the registry disagrees with
        let mut wrong = row("CRANIO");
        wrong.category = Some("RAIO-X".into());

        let (resolution, _) = run(wrong, &refdata());
        match resolution {
            RowResolution::Committed(rows) => {
                assert_eq!(rows[0].0.category.as_deref(), Some("TC"));
            }
            _ => panic!("expected commit"),
        }
    }

    #[test]
    fn replaying_a_row_reproduces_identical_allocations() {
        // Reprocessing always replays the original staged rows, so the
        // idempotence that matters is parent-level determinism: the same
        // input row yields the same derived allocations, which then land
        // on the same fact identities.
        let engine = RuleEngine::standard();
        let data = refdata();

        let mut compound = row("ANGIO RM");
        compound.value = 100.0;
        compound.specialty = Some("GERAL".into());
        compound.physician = Some("DR. JOÃO SOUZA".into());

        let mut stats = RulePassStats::default();
        let first = engine.process_row(compound.clone(), &data, &mut stats);
        let mut stats = RulePassStats::default();
        let second = engine.process_row(compound, &data, &mut stats);

        let (first, second) = match (first, second) {
            (RowResolution::Committed(a), RowResolution::Committed(b)) => (a, b),
            _ => panic!("expected commits"),
        };
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].0.specialty.as_deref(), Some("NEURO"));
    }

    #[test]
    fn second_pass_over_settled_row_mutates_nothing() {
        let engine = RuleEngine::standard();
        let data = refdata();

        let mut stats = RulePassStats::default();
        let settled = match engine.process_row(row("CRANIO"), &data, &mut stats) {
            RowResolution::Committed(mut rows) => rows.remove(0).0,
            _ => panic!("expected commit"),
        };

        let mut stats = RulePassStats::default();
        engine.process_row(settled, &data, &mut stats);
        assert_eq!(stats.counters_for("valor_de_para").mutated, 0);
        assert_eq!(stats.counters_for("registro_exame").mutated, 0);
        assert_eq!(stats.counters_for("categoria_universal").mutated, 0);
    }
}
