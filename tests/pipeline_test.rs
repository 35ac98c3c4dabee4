//! End-to-end tests for the fetch, build, infer and render stages against a real
//! SQLite file.

mod common;

use common::{db_url, init_logging, seed_db, upload_tree};
use lineage_pgm::{
    commands::{execute, infer_from_records, Op, OpResult, RunRequest},
    config::LineageConfig,
    cpd::PresenceState,
    db::DbConnection,
    hierarchy::HierarchyGraph,
    model::BayesianModel,
    record::FileRecord,
    viz::{VizFormat, VizGraph, VizOptions},
    LineageError,
};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn config(url: String, temp_dir: &TempDir) -> LineageConfig {
    LineageConfig {
        database_url: url,
        viz: VizOptions {
            output: temp_dir.path().join("figure.svg"),
            ..Default::default()
        },
    }
}

fn run_op(path: &str) -> Op {
    Op::Run(RunRequest {
        file_path: path.to_string(),
        version: 1,
        show_marginal: false,
    })
}

#[tokio::test]
async fn test_fetch_walks_descendants_only() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let url = seed_db(&temp_dir, &upload_tree()).await;

    let conn = DbConnection::connect(&url).await.unwrap();
    let rows = conn.fetch_file_structure("uploads").await.unwrap();
    conn.close().await;

    let paths = rows
        .iter()
        .map(|r| r.file_path.as_str())
        .collect::<BTreeSet<_>>();
    assert_eq!(
        paths,
        BTreeSet::from([
            "uploads",
            "uploads/a.txt",
            "uploads/b.txt",
            "uploads/img",
            "uploads/img/c.png"
        ])
    );
    assert_eq!(rows[0], FileRecord::new("uploads", 1, None));
}

#[tokio::test]
async fn test_fetch_from_nested_folder_keeps_unfetched_parent() {
    let temp_dir = TempDir::new().unwrap();
    let url = seed_db(&temp_dir, &upload_tree()).await;

    let conn = DbConnection::connect(&url).await.unwrap();
    let rows = conn.fetch_file_structure("uploads/img").await.unwrap();
    conn.close().await;

    assert_eq!(rows.len(), 2);
    let graph = HierarchyGraph::from_records(&rows);
    // The starting row's parent is a node even though its own row was not fetched.
    assert!(graph.contains("uploads"));
    assert_eq!(graph.node_count(), 3);
}

#[tokio::test]
async fn test_fetch_unknown_path_is_empty() {
    let temp_dir = TempDir::new().unwrap();
    let url = seed_db(&temp_dir, &upload_tree()).await;

    let conn = DbConnection::connect(&url).await.unwrap();
    let rows = conn.fetch_file_structure("nowhere").await.unwrap();
    conn.close().await;
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_cyclic_parents_terminate() {
    let temp_dir = TempDir::new().unwrap();
    let url = seed_db(
        &temp_dir,
        &[
            FileRecord::new("loop/a", 0, Some("loop/b")),
            FileRecord::new("loop/b", 0, Some("loop/a")),
        ],
    )
    .await;

    let conn = DbConnection::connect(&url).await.unwrap();
    let rows = conn.fetch_file_structure("loop/a").await.unwrap();
    conn.close().await;
    assert_eq!(rows.len(), 2);

    let model = BayesianModel::from_records(&rows);
    assert!(matches!(model.check_model(), Err(LineageError::Model(_))));
}

#[test_log::test(tokio::test)]
async fn test_run_reports_map_state_and_renders() {
    let temp_dir = TempDir::new().unwrap();
    let url = seed_db(&temp_dir, &upload_tree()).await;
    let config = config(url, &temp_dir);

    let mut out = Vec::new();
    let result = execute(&run_op("uploads"), &config, &mut out).await.unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Model is valid!\nPGM inference result for uploads: {uploads: present}\n"
    );

    let OpResult::Report(report) = result else {
        panic!("expected a run report");
    };
    assert_eq!(report.row_count, 5);
    assert_eq!(report.node_count, 5);
    assert_eq!(report.edge_count, 4);
    // uploads is version 1, so P(present) = 0.6.
    assert!((report.marginal.probability(PresenceState::Present) - 0.6).abs() < 1e-9);
    assert_eq!(report.map_state, PresenceState::Present);
    assert_eq!(
        report.inference_line(),
        "PGM inference result for uploads: {uploads: present}"
    );

    let figure = report.figure.expect("figure path");
    let svg = std::fs::read_to_string(figure).unwrap();
    assert_eq!(svg.matches("<circle").count(), report.node_count);
    assert_eq!(svg.matches("<line").count(), report.edge_count);
}

#[tokio::test]
async fn test_render_failure_keeps_printed_result() {
    let temp_dir = TempDir::new().unwrap();
    let url = seed_db(&temp_dir, &upload_tree()).await;
    let mut config = config(url, &temp_dir);
    let blocker = temp_dir.path().join("not_a_dir");
    std::fs::write(&blocker, "").unwrap();
    config.viz.output = blocker.join("figure.svg");

    let mut out = Vec::new();
    let err = execute(&run_op("uploads"), &config, &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, LineageError::Render(_)), "{err:?}");
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Model is valid!\nPGM inference result for uploads: {uploads: present}\n"
    );
}

#[tokio::test]
async fn test_run_on_missing_path_reports_no_metadata() {
    let temp_dir = TempDir::new().unwrap();
    let url = seed_db(&temp_dir, &upload_tree()).await;
    let config = config(url, &temp_dir);

    let mut out = Vec::new();
    let err = execute(&run_op("ghost.txt"), &config, &mut out)
        .await
        .unwrap_err();
    assert_eq!(err, LineageError::NoMetadata("ghost.txt".to_string()));
    assert_eq!(err.to_string(), "No metadata found for file: ghost.txt");
    assert!(out.is_empty());
    assert!(!temp_dir.path().join("figure.svg").exists());
}

#[tokio::test]
async fn test_run_on_invalid_hierarchy_skips_inference_and_render() {
    let temp_dir = TempDir::new().unwrap();
    let url = seed_db(&temp_dir, &upload_tree()).await;
    let config = config(url, &temp_dir);

    // uploads/img has a parent whose row is outside the fetched closure.
    let mut out = Vec::new();
    let err = execute(&run_op("uploads/img"), &config, &mut out)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LineageError::Model("no CPD associated with 'uploads'".to_string())
    );
    assert!(out.is_empty());
    assert!(!temp_dir.path().join("figure.svg").exists());
}

#[tokio::test]
async fn test_run_without_database_is_connection_error() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(db_url(&temp_dir), &temp_dir);

    let mut out = Vec::new();
    let err = execute(&run_op("uploads"), &config, &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, LineageError::Connection(_)), "{err:?}");
}

#[tokio::test]
async fn test_run_without_table_is_query_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("file_tracking.db");
    let pool = sqlx::SqlitePool::connect_with(
        sqlx::sqlite::SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true),
    )
    .await
    .unwrap();
    sqlx::query("CREATE TABLE unrelated (id INTEGER);")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;
    let config = config(db_url(&temp_dir), &temp_dir);

    let mut out = Vec::new();
    let err = execute(&run_op("uploads"), &config, &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, LineageError::Query(_)), "{err:?}");
    assert!(err.to_string().contains("file_versions"), "{err}");
    assert_eq!(err.exit_code(), 1);
    assert!(out.is_empty());
    assert!(!temp_dir.path().join("figure.svg").exists());
}

#[tokio::test]
async fn test_record_rejects_duplicate_version() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(db_url(&temp_dir), &temp_dir);

    let op = Op::Record {
        record: FileRecord::new("uploads/a.txt", 1, Some("uploads")),
        kind: "file".to_string(),
    };
    let mut out = Vec::new();
    let result = execute(&op, &config, &mut out).await.unwrap();
    assert!(matches!(result, OpResult::Recorded(_)));
    assert!(matches!(
        execute(&op, &config, &mut out).await,
        Err(LineageError::Query(_))
    ));
}

#[tokio::test]
async fn test_dot_render_respects_config() {
    let temp_dir = TempDir::new().unwrap();
    let url = seed_db(&temp_dir, &upload_tree()).await;
    let mut config = config(url, &temp_dir);
    config.viz.format = VizFormat::Dot;
    config.viz.output = temp_dir.path().join("figure.dot");

    let mut out = Vec::new();
    let OpResult::Report(report) = execute(&run_op("archive"), &config, &mut out).await.unwrap()
    else {
        panic!("expected a run report");
    };
    let dot = std::fs::read_to_string(report.figure.unwrap()).unwrap();
    assert!(dot.contains("\"archive\" -> \"archive/old.txt\";"));
}

#[test]
fn test_viz_and_model_graphs_agree() {
    let rows = upload_tree();
    let model = BayesianModel::from_records(&rows);
    let viz = VizGraph::from_records(&rows);
    assert_eq!(model.node_count(), viz.node_count());
    assert_eq!(model.edge_count(), viz.edge_count());
}

#[test]
fn test_node_set_is_paths_and_parents() {
    let rows = upload_tree();
    let graph = HierarchyGraph::from_records(&rows);
    let expected = rows
        .iter()
        .flat_map(|r| std::iter::once(r.file_path.as_str()).chain(r.parent()))
        .collect::<BTreeSet<_>>();
    assert_eq!(graph.nodes().collect::<BTreeSet<_>>(), expected);
}

#[test]
fn test_two_node_worked_example() {
    let rows = vec![FileRecord::new("a", 0, None), FileRecord::new("b", 2, Some("a"))];
    let model = BayesianModel::from_records(&rows);
    model.check_model().unwrap();
    assert_eq!(model.get_cpd("a").unwrap().values, vec![vec![0.5], vec![0.5]]);
    let b = model.get_cpd("b").unwrap();
    assert_eq!(b.evidence, vec!["a".to_string()]);
    assert_eq!(b.values, vec![vec![0.7, 0.3], vec![0.3, 0.7]]);

    let mut out = Vec::new();
    let request = RunRequest {
        file_path: "b".to_string(),
        version: 0,
        show_marginal: false,
    };
    let report = infer_from_records(&rows, &request, &mut out).unwrap();
    assert_eq!(report.map_state, PresenceState::Present);
}
