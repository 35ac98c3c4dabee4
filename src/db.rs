use crate::{error::LineageError, record::FileRecord};
use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{MigrateDatabase, Migration as SqlxMigration, MigrationSource, MigrationType, Migrator},
    sqlite::{Sqlite, SqliteConnectOptions},
    ConnectOptions, Pool, Row,
};
use std::str::FromStr;

/// Starting row(s) for `file_path = ?`, then every row whose `parent_folder` names a path
/// already in the result. `UNION` keeps a cyclic chain from recursing forever.
const FILE_STRUCTURE_QUERY: &str = "\
    WITH RECURSIVE folder_structure(file_path, version, parent_folder) AS ( \
        SELECT file_path, version, parent_folder \
        FROM file_versions \
        WHERE file_path = ? \
        UNION \
        SELECT fv.file_path, fv.version, fv.parent_folder \
        FROM file_versions fv \
        INNER JOIN folder_structure fs ON fv.parent_folder = fs.file_path \
    ) \
    SELECT file_path, version, parent_folder FROM folder_structure;";

#[derive(Debug, Clone)]
pub struct DbConnection(pub Pool<Sqlite>);

impl DbConnection {
    /// Opens an existing database read-only. Missing files are a connection failure, not
    /// an empty result.
    pub async fn connect(url: &str) -> Result<Self, LineageError> {
        tracing::debug!("Connecting to file tracking db: {:?}", url);
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| LineageError::Connection(format!("{e}")))?
            .read_only(true)
            .create_if_missing(false)
            .disable_statement_logging();
        let pool = sqlx::pool::PoolOptions::<Sqlite>::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| LineageError::Connection(format!("{e}")))?;
        Ok(DbConnection(pool))
    }

    /// Recursive ancestry closure starting at `file_path`, in query order.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_file_structure(
        &self,
        file_path: &str,
    ) -> Result<Vec<FileRecord>, LineageError> {
        let records = sqlx::query_as::<_, FileRecord>(FILE_STRUCTURE_QUERY)
            .bind(file_path)
            .fetch_all(&self.0)
            .await
            .map_err(|e| {
                tracing::error!(
                    "[DbConnection.fetch_file_structure] SQL error for '{}'\n\terror: {}",
                    file_path,
                    e
                );
                LineageError::Query(format!("{e}"))
            })?;
        tracing::debug!(
            "[fetch_file_structure] {} rows reachable from '{}'",
            records.len(),
            file_path
        );
        Ok(records)
    }

    /// Inserts one `file_versions` row stamped with the current time.
    pub async fn record_version(
        &self,
        record: &FileRecord,
        content: &str,
    ) -> Result<(), LineageError> {
        let exists = sqlx::query(
            "SELECT COUNT(*) FROM file_versions WHERE file_path = ? AND version = ?",
        )
        .bind(&record.file_path)
        .bind(record.version as i64)
        .fetch_one(&self.0)
        .await?
        .get::<i64, usize>(0);
        if exists > 0 {
            return Err(LineageError::Query(format!(
                "version {} of '{}' is already recorded",
                record.version, record.file_path
            )));
        }

        sqlx::query(
            "INSERT INTO file_versions (file_path, version, last_modified, content, parent_folder) \
             VALUES (?, ?, CURRENT_TIMESTAMP, ?, ?)",
        )
        .bind(&record.file_path)
        .bind(record.version as i64)
        .bind(content)
        .bind(record.parent())
        .execute(&self.0)
        .await?;
        tracing::info!("{} metadata saved for {}", content, record);
        Ok(())
    }

    pub async fn close(&self) {
        self.0.close().await;
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

/// Creates the database if needed and brings `file_versions` up to date. The returned
/// connection is writable.
pub async fn db_init(url: &str) -> Result<DbConnection, LineageError> {
    tracing::debug!("Initializing file tracking db: {:?}", url);
    let connection_err = |e: sqlx::Error| LineageError::Connection(format!("{e}"));
    if !Sqlite::database_exists(url).await.unwrap_or(false) {
        Sqlite::create_database(url).await.map_err(connection_err)?;
    }
    let options = SqliteConnectOptions::from_str(url)
        .map_err(connection_err)?
        .read_only(false)
        .disable_statement_logging()
        .create_if_missing(true);
    let pool = sqlx::pool::PoolOptions::<Sqlite>::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(connection_err)?;

    let migrations = MigrationList(vec![Migration {
        version: 1,
        description: "create_file_versions",
        sql: "\
            CREATE TABLE IF NOT EXISTS file_versions (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                file_path TEXT NOT NULL, \
                version INTEGER NOT NULL CHECK (version >= 0), \
                last_modified TEXT, \
                content TEXT, \
                parent_folder TEXT, \
                UNIQUE(file_path, version)); \
            CREATE INDEX IF NOT EXISTS file_versions_parent ON file_versions(parent_folder);",
        kind: MigrationType::ReversibleUp,
    }]);
    let migrator = Migrator::new(migrations).await.map_err(|e| {
        LineageError::Connection(format!("could not resolve migrations: {e}"))
    })?;
    migrator
        .run(&pool)
        .await
        .map_err(|e| LineageError::Query(format!("migration failed: {e}")))?;

    let count = sqlx::query("SELECT COUNT(*) FROM file_versions;")
        .fetch_one(&pool)
        .await?
        .get::<i64, usize>(0);
    tracing::info!(
        "DB Connection initialized.\n \
         \tRecorded file versions:\t{:?}",
        count
    );
    Ok(DbConnection(pool))
}
