//! SQLite database for processed images

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

use crate::attributes::AttributeRecord;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored attributes are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("processed image {0} not found")]
    NotFound(i64),
}

/// A stored image and everything extracted from it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedImageRecord {
    pub id: i64,
    pub original_image: PathBuf,
    pub processed_image: Option<PathBuf>,
    pub extracted_text: String,
    pub product_attributes: AttributeRecord,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

/// Row as stored, before the attribute JSON is decoded
struct RawRecord {
    id: i64,
    original_image: String,
    processed_image: Option<String>,
    extracted_text: String,
    product_attributes: String,
    created_at: i64,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            original_image: row.get(1)?,
            processed_image: row.get(2)?,
            extracted_text: row.get(3)?,
            product_attributes: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<ProcessedImageRecord, StorageError> {
        Ok(ProcessedImageRecord {
            id: self.id,
            original_image: PathBuf::from(self.original_image),
            processed_image: self.processed_image.map(PathBuf::from),
            extracted_text: self.extracted_text,
            product_attributes: serde_json::from_str(&self.product_attributes)?,
            created_at: self.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, original_image, processed_image, extracted_text, \
     product_attributes, created_at FROM processed_images";

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    pub fn init_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS processed_images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_image TEXT NOT NULL,
                processed_image TEXT,
                extracted_text TEXT NOT NULL DEFAULT '',
                product_attributes TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_processed_images_created
                ON processed_images (created_at DESC);",
        )?;
        Ok(())
    }

    /// Insert a new record for an uploaded image, returning its id
    pub fn insert_image(&self, original_image: &Path) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO processed_images (original_image, created_at) VALUES (?1, ?2)",
            params![original_image.to_string_lossy().into_owned(), unix_now()],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Inserted processed image {} for {:?}", id, original_image);
        Ok(id)
    }

    pub fn set_processed_image(&self, id: i64, processed: &Path) -> Result<(), StorageError> {
        self.update(
            id,
            "UPDATE processed_images SET processed_image = ?1 WHERE id = ?2",
            processed.to_string_lossy().into_owned(),
        )
    }

    pub fn set_extracted_text(&self, id: i64, text: &str) -> Result<(), StorageError> {
        self.update(
            id,
            "UPDATE processed_images SET extracted_text = ?1 WHERE id = ?2",
            text.to_string(),
        )
    }

    pub fn set_product_attributes(
        &self,
        id: i64,
        attributes: &AttributeRecord,
    ) -> Result<(), StorageError> {
        let json = serde_json::to_string(attributes)?;
        self.update(
            id,
            "UPDATE processed_images SET product_attributes = ?1 WHERE id = ?2",
            json,
        )
    }

    fn update(&self, id: i64, sql: &str, value: String) -> Result<(), StorageError> {
        let changed = self.conn.execute(sql, params![value, id])?;
        if changed == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    /// Fetch one record
    pub fn get(&self, id: i64) -> Result<Option<ProcessedImageRecord>, StorageError> {
        let raw = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                RawRecord::from_row,
            )
            .optional()?;

        raw.map(RawRecord::decode).transpose()
    }

    /// Most recent records first
    pub fn history(&self, limit: usize) -> Result<Vec<ProcessedImageRecord>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], RawRecord::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.decode()?);
        }
        Ok(records)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
