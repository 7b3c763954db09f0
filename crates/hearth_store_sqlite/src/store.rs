//! The SQLite-backed [`HomeStore`] implementation.

use crate::pool::SqlitePool;
use crate::schema;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_registry::{Home, HomeStore, Location, OwnerId, PendingOp, StoreError};
use rusqlite::params;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const UPSERT_HOME: &str = "
INSERT INTO homes (owner_id, home_name, world, x, y, z, yaw, pitch, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT (owner_id, home_name) DO UPDATE SET
    home_name  = excluded.home_name,
    world      = excluded.world,
    x          = excluded.x,
    y          = excluded.y,
    z          = excluded.z,
    yaw        = excluded.yaw,
    pitch      = excluded.pitch,
    created_at = excluded.created_at";

const DELETE_HOME: &str = "DELETE FROM homes WHERE owner_id = ?1 AND home_name = ?2";

const SELECT_HOMES: &str = "
SELECT home_name, world, x, y, z, yaw, pitch, created_at
FROM homes WHERE owner_id = ?1";

const RECORD_VISIT: &str = "
INSERT INTO home_visits (owner_id, home_name, visit_count, last_visit)
VALUES (?1, ?2, 1, ?3)
ON CONFLICT (owner_id, home_name) DO UPDATE SET
    visit_count = visit_count + 1,
    last_visit  = excluded.last_visit";

/// Durable home storage backed by a pooled SQLite database.
///
/// Every SQL statement runs inside `spawn_blocking`, keeping the async
/// flusher and loader responsive while SQLite does file I/O.
pub struct SqliteHomeStore {
    pool: Arc<SqlitePool>,
}

impl SqliteHomeStore {
    /// Opens (creating if necessary) the database at `path` and migrates
    /// its schema.
    ///
    /// # Arguments
    ///
    /// * `path` - Database file path; parent directories must exist
    /// * `pool_size` - Number of pooled connections
    /// * `acquire_timeout` - How long a caller waits for a free connection
    ///   before [`StoreError::PoolExhausted`]
    pub async fn open(
        path: impl AsRef<Path>,
        pool_size: usize,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let pool = tokio::task::spawn_blocking(move || {
            SqlitePool::open(&path, pool_size, acquire_timeout)
        })
        .await
        .map_err(join_err)??;
        let pool = Arc::new(pool);

        let mut conn = pool.acquire().await?;
        tokio::task::spawn_blocking(move || schema::migrate(&mut conn))
            .await
            .map_err(join_err)??;

        info!(
            "💾 Home database ready at {} ({} pooled connections)",
            pool.path().display(),
            pool_size
        );
        Ok(Self { pool })
    }
}

fn join_err(_: tokio::task::JoinError) -> StoreError {
    StoreError::Connection("blocking task failed".into())
}

fn row_to_home(row: &rusqlite::Row<'_>) -> rusqlite::Result<Home> {
    let created_ms: i64 = row.get(7)?;
    Ok(Home {
        name: row.get(0)?,
        location: Location {
            world: row.get(1)?,
            x: row.get(2)?,
            y: row.get(3)?,
            z: row.get(4)?,
            yaw: row.get::<_, f64>(5)? as f32,
            pitch: row.get::<_, f64>(6)? as f32,
        },
        created_at: DateTime::<Utc>::from_timestamp_millis(created_ms).unwrap_or_default(),
    })
}

#[async_trait]
impl HomeStore for SqliteHomeStore {
    async fn load_owner_homes(&self, owner: OwnerId) -> Result<Vec<Home>, StoreError> {
        let conn = self.pool.acquire().await?;
        tokio::task::spawn_blocking(move || {
            let mut stmt = conn.prepare_cached(SELECT_HOMES).map_err(crate::map_sql_err)?;
            let homes = stmt
                .query_map(params![owner.to_string()], row_to_home)
                .map_err(crate::map_sql_err)?
                .collect::<rusqlite::Result<Vec<Home>>>()
                .map_err(crate::map_sql_err)?;
            debug!("Loaded {} homes for owner {}", homes.len(), owner);
            Ok(homes)
        })
        .await
        .map_err(join_err)?
    }

    async fn apply_batch(&self, batch: &[PendingOp]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let batch = batch.to_vec();
        let mut conn = self.pool.acquire().await?;
        tokio::task::spawn_blocking(move || {
            let tx = conn.transaction().map_err(crate::map_sql_err)?;
            for op in &batch {
                match op {
                    PendingOp::Upsert { owner, home } => {
                        tx.execute(
                            UPSERT_HOME,
                            params![
                                owner.to_string(),
                                home.name,
                                home.location.world,
                                home.location.x,
                                home.location.y,
                                home.location.z,
                                home.location.yaw as f64,
                                home.location.pitch as f64,
                                home.created_at.timestamp_millis(),
                            ],
                        )
                        .map_err(crate::map_sql_err)?;
                    }
                    PendingOp::Delete { owner, key } => {
                        tx.execute(DELETE_HOME, params![owner.to_string(), key])
                            .map_err(crate::map_sql_err)?;
                    }
                }
            }
            tx.commit().map_err(crate::map_sql_err)?;
            debug!("Committed batch of {} home ops", batch.len());
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn record_teleport(&self, owner: OwnerId, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let conn = self.pool.acquire().await?;
        tokio::task::spawn_blocking(move || {
            conn.execute(
                RECORD_VISIT,
                params![owner.to_string(), key, Utc::now().timestamp_millis()],
            )
            .map_err(crate::map_sql_err)?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }
}
