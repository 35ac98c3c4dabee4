//! Rows of the `file_versions` table as consumed by the model builder.

use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "service")]
use sqlx::{sqlite::SqliteRow, FromRow, Row};

/// One `(file_path, version, parent_folder)` tuple returned by the hierarchy fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_path: String,
    pub version: u32,
    pub parent_folder: Option<String>,
}

impl FileRecord {
    pub fn new<P: Into<String>>(file_path: P, version: u32, parent_folder: Option<&str>) -> Self {
        FileRecord {
            file_path: file_path.into(),
            version,
            parent_folder: parent_folder.map(|p| p.to_string()),
        }
    }

    /// Empty parent strings are treated the same as NULL.
    pub fn parent(&self) -> Option<&str> {
        self.parent_folder.as_deref().filter(|p| !p.is_empty())
    }
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent() {
            Some(parent) => write!(f, "{}@v{} (in {})", self.file_path, self.version, parent),
            None => write!(f, "{}@v{}", self.file_path, self.version),
        }
    }
}

impl<P: Into<String>> From<(P, u32, Option<&str>)> for FileRecord {
    fn from((file_path, version, parent): (P, u32, Option<&str>)) -> Self {
        FileRecord::new(file_path, version, parent)
    }
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for FileRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let file_path: &str = row.try_get("file_path")?;
        let version: i64 = row.try_get("version")?;
        let parent_folder: Option<&str> = row.try_get("parent_folder")?;
        let version = u32::try_from(version).map_err(|e| sqlx::Error::ColumnDecode {
            index: "version".to_string(),
            source: Box::new(e),
        })?;
        Ok(FileRecord::new(file_path, version, parent_folder))
    }
}
