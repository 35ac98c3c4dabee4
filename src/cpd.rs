//! Tabular conditional probability distributions attached to hierarchy nodes.
//!
//! Every node is a binary variable with states `present` (index 0) and `absent`
//! (index 1). A node's table is laid out with one row per state of the node and one
//! column per joint state of its evidence variables, so each column sums to one.

use crate::record::FileRecord;
use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
};

/// Cardinality of every hierarchy variable.
pub const BINARY_CARD: usize = 2;

/// Number of distinct probability levels derived from a version number.
pub const VERSION_LEVELS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Present,
    Absent,
}

impl PresenceState {
    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(PresenceState::Present),
            1 => Some(PresenceState::Absent),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            PresenceState::Present => 0,
            PresenceState::Absent => 1,
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceState::Present => write!(f, "present"),
            PresenceState::Absent => write!(f, "absent"),
        }
    }
}

/// `0.5 + 0.1 * (version mod 5)`, computed in tenths so the five levels are the exact
/// nearest doubles to 0.5..=0.9.
pub fn presence_probability(version: u32) -> f64 {
    let tenths = 5 + version % VERSION_LEVELS;
    tenths as f64 / 10.0
}

fn absence_probability(version: u32) -> f64 {
    let tenths = 5 - version % VERSION_LEVELS;
    tenths as f64 / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularCpd {
    pub variable: String,
    pub variable_card: usize,
    /// `values[state][evidence_column]`
    pub values: Vec<Vec<f64>>,
    pub evidence: Vec<String>,
    pub evidence_card: Vec<usize>,
}

impl TabularCpd {
    pub fn new(
        variable: impl Into<String>,
        variable_card: usize,
        values: Vec<Vec<f64>>,
        evidence: Vec<String>,
        evidence_card: Vec<usize>,
    ) -> Self {
        TabularCpd {
            variable: variable.into(),
            variable_card,
            values,
            evidence,
            evidence_card,
        }
    }

    /// CPT for one fetched row: a flat prior for roots, otherwise a table conditioned on
    /// the parent folder where the node agrees with its parent with probability `p`.
    pub fn from_record(record: &FileRecord) -> Self {
        let p = presence_probability(record.version);
        let q = absence_probability(record.version);
        match record.parent() {
            Some(parent) => TabularCpd::new(
                record.file_path.clone(),
                BINARY_CARD,
                vec![vec![p, q], vec![q, p]],
                vec![parent.to_string()],
                vec![BINARY_CARD],
            ),
            None => TabularCpd::new(
                record.file_path.clone(),
                BINARY_CARD,
                vec![vec![p], vec![q]],
                Vec::new(),
                Vec::new(),
            ),
        }
    }

    /// Number of evidence columns the table must have.
    pub fn column_count(&self) -> usize {
        self.evidence_card.iter().product()
    }

    pub fn is_prior(&self) -> bool {
        self.evidence.is_empty()
    }

    /// Scope in factor order: the variable first, then its evidence.
    pub fn scope(&self) -> Vec<(String, usize)> {
        std::iter::once((self.variable.clone(), self.variable_card))
            .chain(
                self.evidence
                    .iter()
                    .cloned()
                    .zip(self.evidence_card.iter().copied()),
            )
            .collect()
    }

    /// Row-major flattening matching [`TabularCpd::scope`], first variable slowest.
    pub fn flat_values(&self) -> Vec<f64> {
        self.values.iter().flatten().copied().collect()
    }
}

impl fmt::Display for TabularCpd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_prior() {
            write!(f, "P({})", self.variable)?;
        } else {
            write!(f, "P({} | {})", self.variable, self.evidence.join(", "))?;
        }
        for (state, row) in self.values.iter().enumerate() {
            let label = PresenceState::from_index(state)
                .map(|s| s.to_string())
                .unwrap_or_else(|| state.to_string());
            write!(f, "\n  {label:>7}:")?;
            for v in row {
                write!(f, " {v:.3}")?;
            }
        }
        Ok(())
    }
}

/// One CPD per distinct `file_path`. When several rows share a path the first row in
/// fetch order wins; later rows are reported and skipped.
pub fn generate_cpds(records: &[FileRecord]) -> BTreeMap<String, TabularCpd> {
    let mut cpds = BTreeMap::new();
    for record in records {
        match cpds.entry(record.file_path.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(TabularCpd::from_record(record));
            }
            Entry::Occupied(entry) => {
                let kept: &TabularCpd = entry.get();
                tracing::debug!(
                    "Skipping duplicate row {} (CPD for '{}' already set with p = {})",
                    record,
                    kept.variable,
                    kept.values[0][0]
                );
            }
        }
    }
    cpds
}
