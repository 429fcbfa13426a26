use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::StorageError;
use crate::frame::FrameRecord;

const CREATE_FRAMES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS frames (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        seq_number INTEGER,
        image_name TEXT,
        rows INTEGER,
        cols INTEGER,
        keypoint_count INTEGER,
        meta_json TEXT,
        image_bytes BLOB
    )
"#;

/// One persisted row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredFrame {
    pub id: i64,
    pub seq_number: i64,
    pub image_name: String,
    pub rows: i64,
    pub cols: i64,
    pub keypoint_count: i64,
    pub meta_json: String,
    pub image_bytes: Vec<u8>,
}

/// Append-only frame table in a SQLite file.
#[derive(Debug, Clone)]
pub struct FrameStore {
    pool: SqlitePool,
}

impl FrameStore {
    /// Opens or creates the database file, then ensures the table exists.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let newly_created = !path.exists();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new().max_connections(4).connect(&url).await?;
        if newly_created {
            info!("Initialized new frame database: {}", path.display());
        } else {
            info!("Opened existing frame database: {}", path.display());
        }

        let store = Self { pool };
        store.create_table().await?;
        Ok(store)
    }

    /// Safe to call repeatedly; existing rows are untouched.
    pub async fn create_table(&self) -> Result<(), StorageError> {
        sqlx::query(CREATE_FRAMES_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Inserts one frame in a single statement and returns its row id.
    pub async fn append(
        &self,
        record: &FrameRecord,
        meta_json: &str,
        image_bytes: &[u8],
    ) -> Result<i64, StorageError> {
        let result = sqlx::query(
            "INSERT INTO frames (seq_number, image_name, rows, cols, keypoint_count, meta_json, image_bytes)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.seq_number)
        .bind(&record.image_name)
        .bind(i64::from(record.rows))
        .bind(i64::from(record.cols))
        .bind(i64::from(record.keypoint_count))
        .bind(meta_json)
        .bind(image_bytes)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn count(&self) -> Result<i64, StorageError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM frames")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn fetch_all(&self) -> Result<Vec<StoredFrame>, StorageError> {
        let rows = sqlx::query_as::<_, StoredFrame>(
            "SELECT id, seq_number, image_name, rows, cols, keypoint_count, meta_json, image_bytes
             FROM frames ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
