//! Command layer between the CLI and the pipeline stages.
//!
//! `run` is strictly linear: fetch, build, validate, infer, render. Each stage either
//! hands its output to the next or ends the command with a [`LineageError`]; nothing
//! downstream of a failed stage executes. The database connection is closed on every
//! exit path.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    io::Write,
    path::PathBuf,
};

use crate::{
    config::LineageConfig,
    cpd::PresenceState,
    db::{db_init, DbConnection},
    error::LineageError,
    inference::{Marginal, VariableElimination},
    model::BayesianModel,
    record::FileRecord,
    viz::visualize_structure,
};

pub const MODEL_VALID_MESSAGE: &str = "Model is valid!";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub file_path: String,
    /// Parsed from the command line and reported, but no stage reads it.
    pub version: i64,
    /// Also write the posterior of `file_path` after the result line.
    #[serde(default)]
    pub show_marginal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Create the database and the `file_versions` table.
    Init,
    /// Store one file or folder version.
    Record { record: FileRecord, kind: String },
    /// Fetch the hierarchy under a path, build and query its Bayesian network.
    Run(RunRequest),
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Op::Init => write!(f, "Init"),
            Op::Record { record, kind } => write!(f, "Record({kind}: {record})"),
            Op::Run(req) => write!(f, "Run({}, version {})", req.file_path, req.version),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub file_path: String,
    pub requested_version: i64,
    pub row_count: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub map_state: PresenceState,
    pub marginal: Marginal,
    pub figure: Option<PathBuf>,
}

impl RunReport {
    pub fn inference_line(&self) -> String {
        format!(
            "PGM inference result for {}: {{{}: {}}}",
            self.file_path, self.file_path, self.map_state
        )
    }

    pub fn marginal_line(&self) -> String {
        format!(
            "P({} = present) = {:.4}, P({} = absent) = {:.4}",
            self.file_path,
            self.marginal.probability(PresenceState::Present),
            self.file_path,
            self.marginal.probability(PresenceState::Absent)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpResult {
    Initialized(String),
    Recorded(FileRecord),
    Report(RunReport),
}

impl Display for OpResult {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OpResult::Initialized(url) => write!(f, "Initialized {url}"),
            OpResult::Recorded(record) => write!(f, "Recorded {record}"),
            OpResult::Report(report) => write!(f, "{}", report.inference_line()),
        }
    }
}

/// Builds and validates the model for `records`, writes the validation banner to
/// `out`, then runs the MAP query and writes its result line. The figure is not
/// rendered here, so the result is already on `out` if rendering later fails.
pub fn infer_from_records<W: Write>(
    records: &[FileRecord],
    request: &RunRequest,
    out: &mut W,
) -> Result<RunReport, LineageError> {
    if records.is_empty() {
        return Err(LineageError::NoMetadata(request.file_path.clone()));
    }

    let model = BayesianModel::from_records(records);
    model.check_model()?;
    writeln!(out, "{MODEL_VALID_MESSAGE}")?;

    let inference = VariableElimination::new(&model);
    let evidence = BTreeMap::new();
    let marginal = inference.query(&request.file_path, &evidence)?;
    let map_state = marginal.most_probable().ok_or_else(|| {
        LineageError::Inference(format!("no states to choose from for '{}'", request.file_path))
    })?;

    let report = RunReport {
        file_path: request.file_path.clone(),
        requested_version: request.version,
        row_count: records.len(),
        node_count: model.node_count(),
        edge_count: model.edge_count(),
        map_state,
        marginal,
        figure: None,
    };
    writeln!(out, "{}", report.inference_line())?;
    if request.show_marginal {
        writeln!(out, "{}", report.marginal_line())?;
    }
    Ok(report)
}

async fn run(
    conn: &DbConnection,
    request: &RunRequest,
    config: &LineageConfig,
    out: &mut impl Write,
) -> Result<RunReport, LineageError> {
    tracing::debug!(
        "Requested version {} of '{}' (not used by any stage)",
        request.version,
        request.file_path
    );
    let records = conn.fetch_file_structure(&request.file_path).await?;
    let mut report = infer_from_records(&records, request, out)?;
    if config.viz.enabled {
        report.figure = Some(visualize_structure(&records, &config.viz)?);
    }
    Ok(report)
}

/// Executes `op` against the database named in `config`. `out` receives progress text
/// that must appear before later stages run.
pub async fn execute<W: Write>(
    op: &Op,
    config: &LineageConfig,
    out: &mut W,
) -> Result<OpResult, LineageError> {
    tracing::info!("Executing {}", op);
    match op {
        Op::Init => {
            let conn = db_init(&config.database_url).await?;
            conn.close().await;
            Ok(OpResult::Initialized(config.database_url.clone()))
        }
        Op::Record { record, kind } => {
            let conn = db_init(&config.database_url).await?;
            let result = conn.record_version(record, kind).await;
            conn.close().await;
            result.map(|_| OpResult::Recorded(record.clone()))
        }
        Op::Run(request) => {
            let conn = DbConnection::connect(&config.database_url).await?;
            let result = run(&conn, request, config, out).await;
            conn.close().await;
            result.map(OpResult::Report)
        }
    }
}
