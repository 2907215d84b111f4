//! Postgres-backed stores.
//!
//! One repository struct per table, all sharing a single pool owned by
//! [`PostgresDatabase`]. Queries use the runtime API with explicit row
//! structs; schema lives in the embedded migrations.

use std::fmt;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::error::Result;

mod events;
mod files;
mod masters;
mod parts;

pub use events::PostgresEventStore;
pub use files::PostgresFileStore;
pub use masters::PostgresMasterStore;
pub use parts::PostgresPartStore;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
    events: PostgresEventStore,
    files: PostgresFileStore,
    masters: PostgresMasterStore,
    parts: PostgresPartStore,
}

impl fmt::Debug for PostgresDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresDatabase")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresDatabase {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or(8);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        info!(max_connections, "database pool initialized");

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        let events = PostgresEventStore::new(pool.clone());
        let files = PostgresFileStore::new(pool.clone());
        let masters = PostgresMasterStore::new(pool.clone());
        let parts = PostgresPartStore::new(pool.clone());
        Self {
            pool,
            events,
            files,
            masters,
            parts,
        }
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn events(&self) -> &PostgresEventStore {
        &self.events
    }

    pub fn files(&self) -> &PostgresFileStore {
        &self.files
    }

    pub fn masters(&self) -> &PostgresMasterStore {
        &self.masters
    }

    pub fn parts(&self) -> &PostgresPartStore {
        &self.parts
    }
}

/// Lowercase a caller-supplied extension set for `= ANY($n)` binding.
fn lowered(extensions: &std::collections::HashSet<String>) -> Vec<String> {
    extensions.iter().map(|ext| ext.to_lowercase()).collect()
}
