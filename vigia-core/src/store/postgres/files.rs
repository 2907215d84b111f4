use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::warn;

use crate::error::Result;
use crate::event::{EntryKind, EventOrigin};
use crate::path::TreePath;
use crate::store::{FileRecord, FileStore};

use super::lowered;

#[derive(Clone, Debug)]
pub struct PostgresFileStore {
    pool: PgPool,
}

impl PostgresFileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct FileRow {
    path: String,
    name: String,
    file_type: String,
    extension: Option<String>,
    revision: Option<String>,
    part_name: Option<String>,
    core_name: Option<String>,
    product_main_type: Option<String>,
    product_sub_type: Option<String>,
    parent: Option<String>,
    parent_path: Option<String>,
    depth: i32,
    origin: String,
    content_hash: Option<String>,
    size: Option<i64>,
    modified_at: Option<DateTime<Utc>>,
}

const FILE_COLUMNS: &str = "path, name, file_type, extension, revision, part_name, core_name, \
     product_main_type, product_sub_type, parent, parent_path, depth, origin, \
     content_hash, size, modified_at";

impl FileRow {
    fn into_record(self) -> Option<FileRecord> {
        let file_type = match self.file_type.as_str() {
            "file" => EntryKind::File,
            "directory" => EntryKind::Directory,
            _ => return None,
        };
        Some(FileRecord {
            path: TreePath::new(&self.path).ok()?,
            name: self.name,
            file_type,
            extension: self.extension,
            revision: self.revision,
            part_name: self.part_name,
            core_name: self.core_name,
            product_main_type: self.product_main_type,
            product_sub_type: self.product_sub_type,
            parent: self.parent,
            parent_path: self.parent_path,
            depth: self.depth,
            origin: EventOrigin::parse(&self.origin)?,
            content_hash: self.content_hash,
            size: self.size,
            modified_at: self.modified_at,
        })
    }
}

fn collect_rows(rows: Vec<FileRow>) -> Vec<FileRecord> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let path = row.path.clone();
        match row.into_record() {
            Some(record) => records.push(record),
            None => warn!(path, "skipping file row with invalid type or origin"),
        }
    }
    records
}

#[async_trait]
impl FileStore for PostgresFileStore {
    async fn upsert(&self, record: FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                path, name, file_type, extension, revision, part_name, core_name,
                product_main_type, product_sub_type, parent, parent_path, depth,
                origin, content_hash, size, modified_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW())
            ON CONFLICT (path) DO UPDATE SET
                name = EXCLUDED.name,
                file_type = EXCLUDED.file_type,
                extension = EXCLUDED.extension,
                revision = EXCLUDED.revision,
                part_name = EXCLUDED.part_name,
                core_name = EXCLUDED.core_name,
                product_main_type = EXCLUDED.product_main_type,
                product_sub_type = EXCLUDED.product_sub_type,
                parent = EXCLUDED.parent,
                parent_path = EXCLUDED.parent_path,
                depth = EXCLUDED.depth,
                origin = EXCLUDED.origin,
                content_hash = EXCLUDED.content_hash,
                size = EXCLUDED.size,
                modified_at = EXCLUDED.modified_at,
                updated_at = NOW()
            "#,
        )
        .bind(record.path.as_str())
        .bind(&record.name)
        .bind(record.file_type.as_str())
        .bind(&record.extension)
        .bind(&record.revision)
        .bind(&record.part_name)
        .bind(&record.core_name)
        .bind(&record.product_main_type)
        .bind(&record.product_sub_type)
        .bind(&record.parent)
        .bind(&record.parent_path)
        .bind(record.depth)
        .bind(record.origin.as_str())
        .bind(&record.content_hash)
        .bind(record.size)
        .bind(record.modified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, path: &TreePath) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE path = $1"
        ))
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(FileRow::into_record))
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE path = $1")
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_tree(&self, dir: &TreePath) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE path = $1 OR path LIKE $1 || '/%'")
            .bind(dir.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn siblings_with_part_name(
        &self,
        parent_path: Option<&str>,
        part_name: &str,
        extensions: &HashSet<String>,
    ) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM files \
             WHERE parent_path IS NOT DISTINCT FROM $1 \
               AND part_name = $2 \
               AND LOWER(extension) = ANY($3) \
             ORDER BY revision DESC NULLS LAST"
        ))
        .bind(parent_path)
        .bind(part_name)
        .bind(lowered(extensions))
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_rows(rows))
    }

    async fn in_folder_with_extensions(
        &self,
        parent_path: Option<&str>,
        extensions: &HashSet<String>,
    ) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM files \
             WHERE parent_path IS NOT DISTINCT FROM $1 \
               AND LOWER(extension) = ANY($2)"
        ))
        .bind(parent_path)
        .bind(lowered(extensions))
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_rows(rows))
    }

    async fn content_hashes(&self) -> Result<HashMap<TreePath, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT path, content_hash FROM files \
             WHERE content_hash IS NOT NULL AND file_type = 'file'",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hashes = HashMap::with_capacity(rows.len());
        for (path, hash) in rows {
            match TreePath::new(&path) {
                Ok(path) => {
                    hashes.insert(path, hash);
                }
                Err(_) => warn!(path, "skipping file row with invalid path"),
            }
        }
        Ok(hashes)
    }

    async fn all(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM files ORDER BY path"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_rows(rows))
    }
}
