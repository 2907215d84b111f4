use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::warn;

use crate::error::Result;
use crate::path::TreePath;
use crate::store::{PartRecord, PartStore};

#[derive(Clone, Debug)]
pub struct PostgresPartStore {
    pool: PgPool,
}

impl PostgresPartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct PartRow {
    path: String,
    part_name: Option<String>,
    core_name: Option<String>,
    parent: Option<String>,
    parent_path: Option<String>,
    extension: Option<String>,
    master_path: Option<String>,
    master_revision: Option<String>,
    slave_path: Option<String>,
    slave_revision: Option<String>,
    content_hash: Option<String>,
    content_as_master: bool,
    modified_at: Option<DateTime<Utc>>,
}

const PART_COLUMNS: &str = "path, part_name, core_name, parent, parent_path, extension, \
     master_path, master_revision, slave_path, slave_revision, content_hash, \
     content_as_master, modified_at";

impl PartRow {
    fn into_record(self) -> Option<PartRecord> {
        Some(PartRecord {
            path: TreePath::new(&self.path).ok()?,
            part_name: self.part_name,
            core_name: self.core_name,
            parent: self.parent,
            parent_path: self.parent_path,
            extension: self.extension,
            master_path: match self.master_path {
                Some(raw) => Some(TreePath::new(&raw).ok()?),
                None => None,
            },
            master_revision: self.master_revision,
            slave_path: match self.slave_path {
                Some(raw) => Some(TreePath::new(&raw).ok()?),
                None => None,
            },
            slave_revision: self.slave_revision,
            content_hash: self.content_hash,
            content_as_master: self.content_as_master,
            modified_at: self.modified_at,
        })
    }
}

#[async_trait]
impl PartStore for PostgresPartStore {
    async fn upsert(&self, record: PartRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO parts (
                path, part_name, core_name, parent, parent_path, extension,
                master_path, master_revision, slave_path, slave_revision,
                content_hash, content_as_master, modified_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            ON CONFLICT (path) DO UPDATE SET
                part_name = EXCLUDED.part_name,
                core_name = EXCLUDED.core_name,
                parent = EXCLUDED.parent,
                parent_path = EXCLUDED.parent_path,
                extension = EXCLUDED.extension,
                master_path = EXCLUDED.master_path,
                master_revision = EXCLUDED.master_revision,
                slave_path = EXCLUDED.slave_path,
                slave_revision = EXCLUDED.slave_revision,
                content_hash = EXCLUDED.content_hash,
                content_as_master = EXCLUDED.content_as_master,
                modified_at = EXCLUDED.modified_at,
                updated_at = NOW()
            "#,
        )
        .bind(record.path.as_str())
        .bind(&record.part_name)
        .bind(&record.core_name)
        .bind(&record.parent)
        .bind(&record.parent_path)
        .bind(&record.extension)
        .bind(record.master_path.as_ref().map(TreePath::as_str))
        .bind(&record.master_revision)
        .bind(record.slave_path.as_ref().map(TreePath::as_str))
        .bind(&record.slave_revision)
        .bind(&record.content_hash)
        .bind(record.content_as_master)
        .bind(record.modified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, path: &TreePath) -> Result<Option<PartRecord>> {
        let row = sqlx::query_as::<_, PartRow>(&format!(
            "SELECT {PART_COLUMNS} FROM parts WHERE path = $1"
        ))
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(PartRow::into_record))
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        sqlx::query("DELETE FROM parts WHERE path = $1")
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_tree(&self, dir: &TreePath) -> Result<()> {
        sqlx::query("DELETE FROM parts WHERE path = $1 OR path LIKE $1 || '/%'")
            .bind(dir.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn paths_with_part_name(&self, part_name: &str) -> Result<Vec<TreePath>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT path FROM parts WHERE part_name = $1")
            .bind(part_name)
            .fetch_all(&self.pool)
            .await?;

        let mut paths = Vec::with_capacity(rows.len());
        for (raw,) in rows {
            match TreePath::new(&raw) {
                Ok(path) => paths.push(path),
                Err(_) => warn!(path = raw, "skipping part row with invalid path"),
            }
        }
        Ok(paths)
    }

    async fn all(&self) -> Result<Vec<PartRecord>> {
        let rows = sqlx::query_as::<_, PartRow>(&format!(
            "SELECT {PART_COLUMNS} FROM parts ORDER BY path"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let path = row.path.clone();
            match row.into_record() {
                Some(record) => records.push(record),
                None => warn!(path, "skipping part row with invalid path"),
            }
        }
        Ok(records)
    }
}
