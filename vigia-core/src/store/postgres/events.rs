use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::warn;

use crate::error::Result;
use crate::event::{EventOrigin, FileSystemEvent};
use crate::path::TreePath;
use crate::store::{EventStore, StoredEvent};

#[derive(Clone, Debug)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct StoredEventRow {
    id: i64,
    event_type: String,
    origin: String,
    file_path: String,
    old_path: Option<String>,
    file_hash: Option<String>,
    previous_hash: Option<String>,
    file_modified_at: Option<DateTime<Utc>>,
    file_size: Option<i64>,
    recorded_at: DateTime<Utc>,
}

const EVENT_COLUMNS: &str = "id, event_type, origin, file_path, old_path, file_hash, \
     previous_hash, file_modified_at, file_size, recorded_at";

impl StoredEventRow {
    /// Rebuild the domain event. Rows with an unknown tag or a path that no
    /// longer validates are skipped by callers (with a warning) rather than
    /// failing a whole scan.
    fn into_stored(self) -> Option<StoredEvent> {
        let path = TreePath::new(&self.file_path).ok()?;
        let origin = EventOrigin::parse(&self.origin)?;
        let hash = self.file_hash;
        let modified_at = self.file_modified_at;
        let size = self.file_size.map(|s| s as u64);

        let event = match self.event_type.as_str() {
            "file_created" => FileSystemEvent::FileCreated {
                path,
                origin,
                hash,
                modified_at,
                size,
            },
            "file_modified" => FileSystemEvent::FileModified {
                path,
                origin,
                hash,
                modified_at,
                size,
                previous_hash: self.previous_hash,
            },
            "file_deleted" => FileSystemEvent::FileDeleted { path, origin },
            "file_renamed" => FileSystemEvent::FileRenamed {
                path,
                old_path: TreePath::new(self.old_path.as_deref()?).ok()?,
                origin,
                hash,
                modified_at,
                size,
            },
            "directory_created" => FileSystemEvent::DirectoryCreated { path, origin },
            "directory_deleted" => FileSystemEvent::DirectoryDeleted { path, origin },
            "directory_renamed" => FileSystemEvent::DirectoryRenamed {
                path,
                old_path: TreePath::new(self.old_path.as_deref()?).ok()?,
                origin,
            },
            _ => return None,
        };

        Some(StoredEvent {
            id: self.id,
            recorded_at: self.recorded_at,
            event,
        })
    }
}

fn collect_rows(rows: Vec<StoredEventRow>) -> Vec<StoredEvent> {
    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id;
        match row.into_stored() {
            Some(stored) => events.push(stored),
            None => warn!(id, "skipping stored event with unknown type or invalid path"),
        }
    }
    events
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, event: &FileSystemEvent) -> Result<StoredEvent> {
        let (id, recorded_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO stored_events (
                event_type,
                origin,
                file_path,
                old_path,
                file_hash,
                previous_hash,
                file_modified_at,
                file_size,
                file_type
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, recorded_at
            "#,
        )
        .bind(event.type_name())
        .bind(event.origin().as_str())
        .bind(event.path().as_str())
        .bind(event.old_path().map(TreePath::as_str))
        .bind(event.hash())
        .bind(event.previous_hash())
        .bind(event.modified_at())
        .bind(event.size().map(|s| s as i64))
        .bind(event.entry_kind().as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(StoredEvent {
            id,
            recorded_at,
            event: event.clone(),
        })
    }

    async fn events_since(&self, after_id: i64, limit: i64) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, StoredEventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM stored_events WHERE id > $1 ORDER BY id ASC LIMIT $2"
        ))
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_rows(rows))
    }

    async fn latest(&self, limit: i64) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, StoredEventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM ( \
                SELECT {EVENT_COLUMNS} FROM stored_events ORDER BY id DESC LIMIT $1 \
             ) newest ORDER BY id ASC"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_rows(rows))
    }

    async fn latest_per_path(&self) -> Result<HashMap<TreePath, StoredEvent>> {
        let rows = sqlx::query_as::<_, StoredEventRow>(&format!(
            "SELECT DISTINCT ON (file_path) {EVENT_COLUMNS} \
             FROM stored_events ORDER BY file_path, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut timeline = HashMap::with_capacity(rows.len());
        for stored in collect_rows(rows) {
            timeline.insert(stored.event.path().clone(), stored);
        }
        Ok(timeline)
    }

    async fn max_id(&self) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(id), 0) FROM stored_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }
}
