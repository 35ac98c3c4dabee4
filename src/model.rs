//! Bayesian network over the file hierarchy: a [`HierarchyGraph`] plus one
//! [`TabularCpd`] per node.

use crate::{
    cpd::{generate_cpds, TabularCpd, BINARY_CARD},
    error::LineageError,
    hierarchy::HierarchyGraph,
    record::FileRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Allowed deviation of a CPD column sum from one.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BayesianModel {
    graph: HierarchyGraph,
    cpds: BTreeMap<String, TabularCpd>,
}

impl BayesianModel {
    pub fn new(graph: HierarchyGraph) -> Self {
        BayesianModel {
            graph,
            cpds: BTreeMap::new(),
        }
    }

    /// Graph and CPDs for a fetched row set. The result still has to pass
    /// [`BayesianModel::check_model`].
    pub fn from_records(records: &[FileRecord]) -> Self {
        let mut model = BayesianModel::new(HierarchyGraph::from_records(records));
        model.add_cpds(generate_cpds(records).into_values());
        model
    }

    pub fn graph(&self) -> &HierarchyGraph {
        &self.graph
    }

    /// Attaches CPDs, replacing any CPD previously set for the same variable.
    pub fn add_cpds<I: IntoIterator<Item = TabularCpd>>(&mut self, cpds: I) {
        for cpd in cpds {
            if self.cpds.insert(cpd.variable.clone(), cpd).is_some() {
                tracing::warn!("Replaced existing CPD while attaching to model");
            }
        }
    }

    pub fn get_cpd(&self, variable: &str) -> Option<&TabularCpd> {
        self.cpds.get(variable)
    }

    pub fn cpds(&self) -> impl Iterator<Item = &TabularCpd> + '_ {
        self.cpds.values()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn cardinality(&self, variable: &str) -> Option<usize> {
        self.cpds.get(variable).map(|cpd| cpd.variable_card)
    }

    /// Structural validation. Returns the first problem found, naming the node.
    #[tracing::instrument(skip(self), fields(nodes = self.node_count(), cpds = self.cpds.len()))]
    pub fn check_model(&self) -> Result<(), LineageError> {
        if let Err(node) = self.graph.topological_order() {
            return Err(LineageError::Model(format!(
                "hierarchy contains a cycle through '{node}'"
            )));
        }

        for node in self.graph.nodes() {
            if !self.cpds.contains_key(node) {
                return Err(LineageError::Model(format!(
                    "no CPD associated with '{node}'"
                )));
            }
        }

        for cpd in self.cpds.values() {
            self.check_cpd(cpd)?;
        }
        Ok(())
    }

    fn check_cpd(&self, cpd: &TabularCpd) -> Result<(), LineageError> {
        let node = &cpd.variable;
        if !self.graph.contains(node) {
            return Err(LineageError::Model(format!(
                "CPD defined on variable '{node}' which is not in the model"
            )));
        }
        if cpd.variable_card != BINARY_CARD {
            return Err(LineageError::Model(format!(
                "CPD for '{node}' has cardinality {}, expected {BINARY_CARD}",
                cpd.variable_card
            )));
        }

        let parents = self.graph.parents(node);
        let evidence = cpd.evidence.iter().map(String::as_str).collect::<BTreeSet<_>>();
        if evidence.len() != cpd.evidence.len() || parents != evidence {
            return Err(LineageError::Model(format!(
                "CPD for '{node}' has evidence [{}] but its parents in the graph are [{}]",
                cpd.evidence.join(", "),
                parents.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        if cpd.evidence_card.len() != cpd.evidence.len() {
            return Err(LineageError::Model(format!(
                "CPD for '{node}' lists {} evidence variables but {} evidence cardinalities",
                cpd.evidence.len(),
                cpd.evidence_card.len()
            )));
        }
        for (parent, card) in cpd.evidence.iter().zip(cpd.evidence_card.iter()) {
            if let Some(parent_card) = self.cardinality(parent) {
                if parent_card != *card {
                    return Err(LineageError::Model(format!(
                        "CPD for '{node}' expects '{parent}' to have {card} states, \
                         but its CPD has {parent_card}"
                    )));
                }
            }
        }

        let columns = cpd.column_count();
        if cpd.values.len() != cpd.variable_card
            || cpd.values.iter().any(|row| row.len() != columns)
        {
            return Err(LineageError::Model(format!(
                "CPD for '{node}' must be a {}x{columns} table",
                cpd.variable_card
            )));
        }
        for col in 0..columns {
            let mut sum = 0.0;
            for row in cpd.values.iter() {
                let v = row[col];
                if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                    return Err(LineageError::Model(format!(
                        "CPD for '{node}' has probability {v} outside [0, 1]"
                    )));
                }
                sum += v;
            }
            if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(LineageError::Model(format!(
                    "Sum or integral of conditional probabilities for node '{node}' \
                     is not equal to 1 (column {col} sums to {sum})"
                )));
            }
        }
        Ok(())
    }
}
