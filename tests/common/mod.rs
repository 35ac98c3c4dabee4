//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use lineage_pgm::{db::db_init, record::FileRecord};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// SQLite URL for a database file inside `temp_dir`.
#[allow(dead_code)]
pub fn db_url(temp_dir: &TempDir) -> String {
    format!("sqlite:{}", temp_dir.path().join("file_tracking.db").display())
}

/// Creates the schema and inserts `rows` in order. Returns the database URL.
#[allow(dead_code)]
pub async fn seed_db(temp_dir: &TempDir, rows: &[FileRecord]) -> String {
    let url = db_url(temp_dir);
    let conn = db_init(&url).await.unwrap();
    for row in rows {
        let kind = if row.file_path.contains('.') { "file" } else { "folder" };
        conn.record_version(row, kind).await.unwrap();
    }
    conn.close().await;
    url
}

/// `uploads/` with two files and a nested folder holding a third, plus an unrelated
/// `archive/` tree that must never be reached from `uploads`.
#[allow(dead_code)]
pub fn upload_tree() -> Vec<FileRecord> {
    vec![
        FileRecord::new("uploads", 1, None),
        FileRecord::new("uploads/a.txt", 2, Some("uploads")),
        FileRecord::new("uploads/b.txt", 3, Some("uploads")),
        FileRecord::new("uploads/img", 1, Some("uploads")),
        FileRecord::new("uploads/img/c.png", 4, Some("uploads/img")),
        FileRecord::new("archive", 1, None),
        FileRecord::new("archive/old.txt", 2, Some("archive")),
    ]
}
