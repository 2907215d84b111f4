use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::warn;

use crate::error::Result;
use crate::path::TreePath;
use crate::store::{MasterRecord, MasterStore};

#[derive(Clone, Debug)]
pub struct PostgresMasterStore {
    pool: PgPool,
}

impl PostgresMasterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct MasterRow {
    path: String,
    part_name: Option<String>,
    extension: Option<String>,
    parent_path: Option<String>,
    master_revision: Option<String>,
    content_hash: Option<String>,
    modified_at: Option<DateTime<Utc>>,
    slave_path: String,
    slave_revision: Option<String>,
}

const MASTER_COLUMNS: &str = "path, part_name, extension, parent_path, master_revision, \
     content_hash, modified_at, slave_path, slave_revision";

impl MasterRow {
    fn into_record(self) -> Option<MasterRecord> {
        Some(MasterRecord {
            path: TreePath::new(&self.path).ok()?,
            part_name: self.part_name,
            extension: self.extension,
            parent_path: self.parent_path,
            master_revision: self.master_revision,
            content_hash: self.content_hash,
            modified_at: self.modified_at,
            slave_path: TreePath::new(&self.slave_path).ok()?,
            slave_revision: self.slave_revision,
        })
    }
}

#[async_trait]
impl MasterStore for PostgresMasterStore {
    async fn upsert(&self, record: MasterRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO masters (
                path, part_name, extension, parent_path, master_revision,
                content_hash, modified_at, slave_path, slave_revision, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (path) DO UPDATE SET
                part_name = EXCLUDED.part_name,
                extension = EXCLUDED.extension,
                parent_path = EXCLUDED.parent_path,
                master_revision = EXCLUDED.master_revision,
                content_hash = EXCLUDED.content_hash,
                modified_at = EXCLUDED.modified_at,
                slave_path = EXCLUDED.slave_path,
                slave_revision = EXCLUDED.slave_revision,
                updated_at = NOW()
            "#,
        )
        .bind(record.path.as_str())
        .bind(&record.part_name)
        .bind(&record.extension)
        .bind(&record.parent_path)
        .bind(&record.master_revision)
        .bind(&record.content_hash)
        .bind(record.modified_at)
        .bind(record.slave_path.as_str())
        .bind(&record.slave_revision)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, path: &TreePath) -> Result<Option<MasterRecord>> {
        let row = sqlx::query_as::<_, MasterRow>(&format!(
            "SELECT {MASTER_COLUMNS} FROM masters WHERE path = $1"
        ))
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(MasterRow::into_record))
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        sqlx::query("DELETE FROM masters WHERE path = $1")
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_path_or_slave(&self, path: &TreePath) -> Result<()> {
        sqlx::query("DELETE FROM masters WHERE path = $1 OR slave_path = $1")
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_tree(&self, dir: &TreePath) -> Result<()> {
        sqlx::query(
            "DELETE FROM masters \
             WHERE path = $1 OR path LIKE $1 || '/%' \
                OR slave_path = $1 OR slave_path LIKE $1 || '/%'",
        )
        .bind(dir.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_for_part(
        &self,
        part_name: &str,
        content_hash: Option<&str>,
    ) -> Result<Option<MasterRecord>> {
        let row = sqlx::query_as::<_, MasterRow>(&format!(
            "SELECT {MASTER_COLUMNS} FROM masters \
             WHERE part_name = $1 OR ($2::text IS NOT NULL AND content_hash = $2) \
             ORDER BY slave_revision DESC NULLS LAST \
             LIMIT 1"
        ))
        .bind(part_name)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(MasterRow::into_record))
    }

    async fn all(&self) -> Result<Vec<MasterRecord>> {
        let rows = sqlx::query_as::<_, MasterRow>(&format!(
            "SELECT {MASTER_COLUMNS} FROM masters ORDER BY path"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let path = row.path.clone();
            match row.into_record() {
                Some(record) => records.push(record),
                None => warn!(path, "skipping master row with invalid path"),
            }
        }
        Ok(records)
    }
}
