//! Business-rule engine
//!
//! A declarative ordered list of named rules run by one generic executor.
//! Rules execute in a fixed, documented total order per row; later rules
//! observe mutations made by earlier rules. Rule-level failures are
//! non-fatal: the row keeps its pre-rule state and a per-rule counter
//! increments. Only the temporal-validity rule may exclude a row.

pub mod catalog;
pub mod names;

use std::collections::BTreeMap;

use crate::models::{MotiveCode, NormalizedRow, ReferenceData};

/// One in-flight row moving through the ordered rule list
#[derive(Debug, Clone)]
pub struct RowState {
    pub row: NormalizedRow,
    /// Empty for plain rows; the break-rule suffix for split allocations.
    /// Part of the fact identity, so splits stay idempotent.
    pub derivation: String,
    expansions: Vec<RowState>,
}

impl RowState {
    pub fn new(row: NormalizedRow) -> Self {
        Self {
            row,
            derivation: String::new(),
            expansions: Vec::new(),
        }
    }

    /// Replace this row with derived allocations after the current rule
    pub fn expand_into(&mut self, children: Vec<RowState>) {
        self.expansions = children;
    }

    fn take_expansions(&mut self) -> Vec<RowState> {
        std::mem::take(&mut self.expansions)
    }
}

/// Outcome of applying one rule to one row
#[derive(Debug, Clone)]
pub enum RuleOutcome {
    /// Rule ran, nothing to change
    Unchanged,
    /// Rule mutated the row (or expanded it into allocations)
    Mutated,
    /// Reference lookup missed; row untouched, counter incremented
    Miss,
    /// Reportable condition for operator review; row untouched
    Anomaly(String),
    /// Rule hit an internal invariant break; row restored to pre-rule state
    Failed(String),
    /// Row leaves the pipeline into the exclusion ledger
    Excluded(MotiveCode, String),
}

/// A named, ordered business rule
pub trait Rule: Send + Sync {
    fn id(&self) -> &'static str;
    fn applies_to(&self, state: &RowState) -> bool;
    fn apply(&self, state: &mut RowState, refdata: &ReferenceData) -> RuleOutcome;
}

/// Per-rule counters for one batch run
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RuleCounters {
    pub applied: u64,
    pub mutated: u64,
    pub misses: u64,
    pub anomalies: u64,
    pub failures: u64,
}

/// Aggregated statistics for a rule pass over a batch
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RulePassStats {
    counters: BTreeMap<&'static str, RuleCounters>,
    /// Human-readable anomaly lines, surfaced in batch detail
    pub anomalies: Vec<String>,
}

impl RulePassStats {
    fn record(&mut self, rule_id: &'static str, outcome: &RuleOutcome) {
        let counters = self.counters.entry(rule_id).or_default();
        counters.applied += 1;
        match outcome {
            RuleOutcome::Mutated => counters.mutated += 1,
            RuleOutcome::Miss => counters.misses += 1,
            RuleOutcome::Anomaly(detail) => {
                counters.anomalies += 1;
                self.anomalies.push(format!("{}: {}", rule_id, detail));
            }
            RuleOutcome::Failed(_) => counters.failures += 1,
            RuleOutcome::Unchanged | RuleOutcome::Excluded(..) => {}
        }
    }

    pub fn counters_for(&self, rule_id: &str) -> RuleCounters {
        self.counters.get(rule_id).copied().unwrap_or_default()
    }

    pub fn merge(&mut self, other: RulePassStats) {
        for (rule_id, counters) in other.counters {
            let slot = self.counters.entry(rule_id).or_default();
            slot.applied += counters.applied;
            slot.mutated += counters.mutated;
            slot.misses += counters.misses;
            slot.anomalies += counters.anomalies;
            slot.failures += counters.failures;
        }
        self.anomalies.extend(other.anomalies);
    }
}

/// Final resolution of one staged row
#[derive(Debug, Clone)]
pub enum RowResolution {
    /// Row (and any split allocations) ready to commit as facts
    Committed(Vec<(NormalizedRow, String)>),
    /// Row moves to the exclusion ledger
    Excluded { motive: MotiveCode, detail: String },
}

/// Generic executor over the ordered rule list
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// The fixed production rule order:
    /// value backfill → exam splitting → registry correction →
    /// roster reassignment → temporal exclusion → category back-fill
    pub fn standard() -> Self {
        Self::new(catalog::standard_rules())
    }

    /// Run every rule, in order, over one row.
    ///
    /// Exam splitting may expand the row into several in-flight
    /// allocations; later rules apply to each. An exclusion from any
    /// allocation excludes the whole original row (allocations share the
    /// parent's timestamps).
    pub fn process_row(
        &self,
        row: NormalizedRow,
        refdata: &ReferenceData,
        stats: &mut RulePassStats,
    ) -> RowResolution {
        let mut in_flight = vec![RowState::new(row)];

        for rule in &self.rules {
            let mut next = Vec::with_capacity(in_flight.len());
            for mut state in in_flight {
                if !rule.applies_to(&state) {
                    next.push(state);
                    continue;
                }

                let before = state.clone();
                let outcome = rule.apply(&mut state, refdata);
                stats.record(rule.id(), &outcome);

                match outcome {
                    RuleOutcome::Excluded(motive, detail) => {
                        return RowResolution::Excluded { motive, detail };
                    }
                    RuleOutcome::Failed(reason) => {
                        tracing::warn!(
                            rule = rule.id(),
                            error = %reason,
                            "Rule failed; row left unmodified"
                        );
                        state = before;
                        next.push(state);
                    }
                    _ => {
                        let expansions = state.take_expansions();
                        if expansions.is_empty() {
                            next.push(state);
                        } else {
                            next.extend(expansions);
                        }
                    }
                }
            }
            in_flight = next;
        }

        RowResolution::Committed(
            in_flight
                .into_iter()
                .map(|state| (state.row, state.derivation))
                .collect(),
        )
    }
}
