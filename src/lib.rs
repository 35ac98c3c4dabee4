//! # lineage-pgm
//!
//! Builds a Bayesian network over a recursive file/folder version hierarchy stored in a
//! relational table, runs exact inference on it, and renders the hierarchy.
//!
//! ## Overview
//!
//! A run is four stages executed in order, each one a thin function over the previous
//! stage's output:
//!
//! 1. **Fetch** ([`db`]): one recursive query over `file_versions` collects the starting
//!    path and everything nested beneath it as [`record::FileRecord`]s.
//! 2. **Build** ([`hierarchy`], [`cpd`], [`model`]): rows become a DAG of paths with one
//!    binary CPD per node, `P(present) = 0.5 + 0.1 * (version mod 5)`, conditioned on the
//!    parent folder when there is one. The model is validated before use.
//! 3. **Infer** ([`inference`]): variable elimination computes the requested path's
//!    marginal and its most probable state.
//! 4. **Render** ([`viz`]): the same rows are redrawn as a force-directed figure.
//!
//! ## Quick Start
//!
//! ```rust
//! use lineage_pgm::{
//!     inference::VariableElimination, model::BayesianModel, record::FileRecord,
//! };
//! use std::collections::BTreeMap;
//!
//! let rows = vec![
//!     FileRecord::new("uploads", 0, None),
//!     FileRecord::new("uploads/report.pdf", 2, Some("uploads")),
//! ];
//! let model = BayesianModel::from_records(&rows);
//! model.check_model()?;
//!
//! let state = VariableElimination::new(&model).map_query("uploads/report.pdf", &BTreeMap::new())?;
//! println!("uploads/report.pdf is most likely {state}");
//! # Ok::<(), lineage_pgm::LineageError>(())
//! ```
//!
//! ## Features
//!
//! - **service** (default): SQLite storage via `sqlx` ([`db`], [`commands`])
//! - **bin** (default): the `lineage` command-line tool

#[cfg(feature = "service")]
pub mod commands;
pub mod config;
pub mod cpd;
#[cfg(feature = "service")]
pub mod db;
pub mod error;
pub mod hierarchy;
pub mod inference;
pub mod model;
pub mod record;
pub mod viz;

pub use error::*;
