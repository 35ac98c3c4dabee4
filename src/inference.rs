//! Exact inference over a validated [`BayesianModel`] by variable elimination.
//!
//! CPDs are converted to [`Factor`]s; evidence reduces factors, every variable outside
//! the query is summed out in a greedy min-weight order, and the remaining factors are
//! multiplied and normalized into the query marginal. The MAP state of the query is the
//! arg-max of that marginal, ties going to the lower state index.

use crate::{
    cpd::{PresenceState, TabularCpd},
    error::LineageError,
    model::BayesianModel,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Dense table over an ordered variable scope, first variable slowest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    variables: Vec<String>,
    cards: Vec<usize>,
    values: Vec<f64>,
}

impl Factor {
    pub fn new(
        variables: Vec<String>,
        cards: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, LineageError> {
        if variables.len() != cards.len() {
            return Err(LineageError::Inference(format!(
                "factor has {} variables but {} cardinalities",
                variables.len(),
                cards.len()
            )));
        }
        let size: usize = cards.iter().product();
        if values.len() != size {
            return Err(LineageError::Inference(format!(
                "factor over [{}] needs {size} values, got {}",
                variables.join(", "),
                values.len()
            )));
        }
        Ok(Factor {
            variables,
            cards,
            values,
        })
    }

    /// The factor `P(variable | evidence)` for a CPD.
    pub fn from_cpd(cpd: &TabularCpd) -> Result<Self, LineageError> {
        let (variables, cards): (Vec<String>, Vec<usize>) = cpd.scope().into_iter().unzip();
        Factor::new(variables, cards, cpd.flat_values())
    }

    /// Constant factor with an empty scope.
    pub fn unit() -> Self {
        Factor {
            variables: Vec::new(),
            cards: Vec::new(),
            values: vec![1.0],
        }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn contains(&self, variable: &str) -> bool {
        self.position(variable).is_some()
    }

    fn position(&self, variable: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == variable)
    }

    fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.cards.len()];
        for i in (0..self.cards.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.cards[i + 1];
        }
        strides
    }

    fn assignment(&self, mut flat: usize) -> Vec<usize> {
        let mut assignment = vec![0; self.cards.len()];
        for i in (0..self.cards.len()).rev() {
            assignment[i] = flat % self.cards[i];
            flat /= self.cards[i];
        }
        assignment
    }

    pub fn product(&self, other: &Factor) -> Result<Factor, LineageError> {
        let mut variables = self.variables.clone();
        let mut cards = self.cards.clone();
        for (var, card) in other.variables.iter().zip(other.cards.iter()) {
            match self.position(var) {
                Some(idx) if self.cards[idx] != *card => {
                    return Err(LineageError::Inference(format!(
                        "cardinality mismatch for '{var}': {} vs {card}",
                        self.cards[idx]
                    )));
                }
                Some(_) => {}
                None => {
                    variables.push(var.clone());
                    cards.push(*card);
                }
            }
        }

        let mut result = Factor {
            variables,
            cards,
            values: Vec::new(),
        };
        let self_map = result.projection(self);
        let other_map = result.projection(other);
        let self_strides = self.strides();
        let other_strides = other.strides();
        let size: usize = result.cards.iter().product();
        let mut values = Vec::with_capacity(size);
        for flat in 0..size {
            let assignment = result.assignment(flat);
            let a = offset(&assignment, &self_map, &self_strides);
            let b = offset(&assignment, &other_map, &other_strides);
            values.push(self.values[a] * other.values[b]);
        }
        result.values = values;
        Ok(result)
    }

    /// For each variable of `part`, its position in `self`.
    fn projection(&self, part: &Factor) -> Vec<usize> {
        part.variables
            .iter()
            .filter_map(|v| self.position(v))
            .collect()
    }

    /// Sums `variable` out of the factor.
    pub fn marginalize(&self, variable: &str) -> Result<Factor, LineageError> {
        let idx = self.position(variable).ok_or_else(|| {
            LineageError::Inference(format!(
                "variable '{variable}' is not in factor scope [{}]",
                self.variables.join(", ")
            ))
        })?;
        let mut variables = self.variables.clone();
        let mut cards = self.cards.clone();
        variables.remove(idx);
        cards.remove(idx);
        let size: usize = cards.iter().product();
        let mut values = vec![0.0; size];
        let mut result = Factor {
            variables,
            cards,
            values: Vec::new(),
        };
        let strides = result.strides();
        for (flat, v) in self.values.iter().enumerate() {
            let mut assignment = self.assignment(flat);
            assignment.remove(idx);
            let target: usize = assignment.iter().zip(strides.iter()).map(|(a, s)| a * s).sum();
            values[target] += *v;
        }
        result.values = values;
        Ok(result)
    }

    /// Fixes `variable` to `state`, dropping it from the scope.
    pub fn reduce(&self, variable: &str, state: usize) -> Result<Factor, LineageError> {
        let Some(idx) = self.position(variable) else {
            return Ok(self.clone());
        };
        if state >= self.cards[idx] {
            return Err(LineageError::Inference(format!(
                "state {state} out of range for '{variable}' (cardinality {})",
                self.cards[idx]
            )));
        }
        let mut variables = self.variables.clone();
        let mut cards = self.cards.clone();
        variables.remove(idx);
        cards.remove(idx);
        let values = self
            .values
            .iter()
            .enumerate()
            .filter(|(flat, _)| self.assignment(*flat)[idx] == state)
            .map(|(_, v)| *v)
            .collect();
        Factor::new(variables, cards, values)
    }

    pub fn normalize(&self) -> Result<Factor, LineageError> {
        let total: f64 = self.values.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(LineageError::Inference(format!(
                "cannot normalize factor over [{}] with total mass {total}",
                self.variables.join(", ")
            )));
        }
        let mut normalized = self.clone();
        for v in normalized.values.iter_mut() {
            *v /= total;
        }
        Ok(normalized)
    }
}

fn offset(assignment: &[usize], map: &[usize], strides: &[usize]) -> usize {
    map.iter()
        .zip(strides.iter())
        .map(|(pos, stride)| assignment[*pos] * stride)
        .sum()
}

/// Posterior of a single variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marginal {
    pub variable: String,
    pub probabilities: Vec<f64>,
}

impl Marginal {
    pub fn probability(&self, state: PresenceState) -> f64 {
        self.probabilities.get(state.index()).copied().unwrap_or(0.0)
    }

    /// Arg-max state; the first maximum wins.
    pub fn most_probable(&self) -> Option<PresenceState> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, p) in self.probabilities.iter().enumerate() {
            if best.map_or(true, |(_, bp)| *p > bp) {
                best = Some((idx, *p));
            }
        }
        best.and_then(|(idx, _)| PresenceState::from_index(idx))
    }
}

pub struct VariableElimination<'a> {
    model: &'a BayesianModel,
}

impl<'a> VariableElimination<'a> {
    pub fn new(model: &'a BayesianModel) -> Self {
        VariableElimination { model }
    }

    /// Posterior marginal of `variable` given `evidence` (variable -> state index).
    #[tracing::instrument(skip(self, evidence), fields(evidence = evidence.len()))]
    pub fn query(
        &self,
        variable: &str,
        evidence: &BTreeMap<String, usize>,
    ) -> Result<Marginal, LineageError> {
        if self.model.get_cpd(variable).is_none() {
            return Err(LineageError::Inference(format!(
                "query variable '{variable}' is not in the model"
            )));
        }
        if evidence.contains_key(variable) {
            return Err(LineageError::Inference(format!(
                "'{variable}' cannot be both the query variable and evidence"
            )));
        }
        for name in evidence.keys() {
            if self.model.get_cpd(name).is_none() {
                return Err(LineageError::Inference(format!(
                    "evidence variable '{name}' is not in the model"
                )));
            }
        }

        let mut factors = Vec::new();
        for cpd in self.model.cpds() {
            let mut factor = Factor::from_cpd(cpd)?;
            for (name, state) in evidence.iter() {
                factor = factor.reduce(name, *state)?;
            }
            factors.push(factor);
        }

        let mut pending = self
            .model
            .cpds()
            .map(|cpd| cpd.variable.clone())
            .filter(|v| v != variable && !evidence.contains_key(v))
            .collect::<BTreeSet<String>>();

        while let Some(next) = elimination_candidate(&pending, &factors) {
            pending.remove(&next);
            let (touching, rest): (Vec<Factor>, Vec<Factor>) =
                factors.into_iter().partition(|f| f.contains(&next));
            factors = rest;
            let mut combined = Factor::unit();
            for factor in touching.iter() {
                combined = combined.product(factor)?;
            }
            tracing::trace!(
                "Eliminated '{}' from {} factors (scope {})",
                next,
                touching.len(),
                combined.variables.len()
            );
            factors.push(combined.marginalize(&next)?);
        }

        let mut joint = Factor::unit();
        for factor in factors.iter() {
            joint = joint.product(factor)?;
        }
        let marginal = joint.normalize()?;
        if marginal.variables != [variable.to_string()] {
            return Err(LineageError::Inference(format!(
                "elimination left scope [{}] instead of '{variable}'",
                marginal.variables.join(", ")
            )));
        }
        Ok(Marginal {
            variable: variable.to_string(),
            probabilities: marginal.values,
        })
    }

    /// Most probable state of `variable` given `evidence`.
    pub fn map_query(
        &self,
        variable: &str,
        evidence: &BTreeMap<String, usize>,
    ) -> Result<PresenceState, LineageError> {
        let marginal = self.query(variable, evidence)?;
        marginal.most_probable().ok_or_else(|| {
            LineageError::Inference(format!("no states to choose from for '{variable}'"))
        })
    }
}

/// Greedy min-weight heuristic: the variable whose elimination builds the smallest
/// intermediate table. Name order breaks ties.
fn elimination_candidate(pending: &BTreeSet<String>, factors: &[Factor]) -> Option<String> {
    pending
        .iter()
        .map(|var| {
            let mut scope: BTreeMap<&str, usize> = BTreeMap::new();
            for factor in factors.iter().filter(|f| f.contains(var)) {
                for (v, c) in factor.variables.iter().zip(factor.cards.iter()) {
                    scope.insert(v.as_str(), *c);
                }
            }
            let weight: usize = scope.values().product();
            (weight, var)
        })
        .min()
        .map(|(_, var)| var.clone())
}
