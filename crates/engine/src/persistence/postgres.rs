//! PostgreSQL implementation of WorkflowStateStore
//!
//! Each instance is one row holding the full state as JSONB, plus a
//! bookmark index table that triggers query by payload hash. Both are
//! written in one transaction.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use super::store::*;
use crate::workflow::{InstanceId, WorkflowState};

/// Embedded schema migrations for the state store
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL implementation of WorkflowStateStore
///
/// # Example
///
/// ```ignore
/// use arbor_engine::PostgresWorkflowStateStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let store = PostgresWorkflowStateStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresWorkflowStateStore {
    pool: PgPool,
}

impl PostgresWorkflowStateStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations; already-applied ones are skipped
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await.map_err(|e| {
            error!("Failed to run migrations: {}", e);
            StoreError::Database(e.to_string())
        })
    }
}

fn database_error(context: &str, e: sqlx::Error) -> StoreError {
    error!("Failed to {}: {}", context, e);
    StoreError::Database(e.to_string())
}

#[async_trait]
impl WorkflowStateStore for PostgresWorkflowStateStore {
    #[instrument(skip(self, state), fields(status = %state.status))]
    async fn save(&self, instance_id: &str, state: &WorkflowState) -> Result<(), StoreError> {
        let data = serde_json::to_value(state)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO arbor_workflow_states
                (id, definition_id, definition_version, correlation_id, status, sub_status, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                definition_id = EXCLUDED.definition_id,
                definition_version = EXCLUDED.definition_version,
                correlation_id = EXCLUDED.correlation_id,
                status = EXCLUDED.status,
                sub_status = EXCLUDED.sub_status,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(instance_id)
        .bind(&state.definition_id)
        .bind(state.definition_version)
        .bind(&state.correlation_id)
        .bind(state.status.to_string())
        .bind(state.sub_status.to_string())
        .bind(&data)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| database_error("save workflow state", e))?;

        sqlx::query("DELETE FROM arbor_workflow_bookmarks WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| database_error("clear bookmarks", e))?;

        for bookmark in &state.bookmarks {
            sqlx::query(
                r#"
                INSERT INTO arbor_workflow_bookmarks
                    (id, instance_id, activity_instance_id, activity_type, payload_hash, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&bookmark.id)
            .bind(instance_id)
            .bind(i64::from(bookmark.activity_instance_id.0))
            .bind(&bookmark.activity_type)
            .bind(&bookmark.payload_hash)
            .bind(bookmark.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| database_error("index bookmark", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| database_error("commit workflow state", e))?;

        debug!(%instance_id, bookmarks = state.bookmarks.len(), "saved workflow state");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self, instance_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        let row = sqlx::query("SELECT data FROM arbor_workflow_states WHERE id = $1")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("load workflow state", e))?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row.get("data");
                Ok(Some(serde_json::from_value(data)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn count_running(&self, filter: &CountRunningFilter) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM arbor_workflow_states
            WHERE status IN ('running', 'suspended')
              AND ($1::TEXT IS NULL OR definition_id = $1)
              AND ($2::INTEGER IS NULL OR definition_version = $2)
              AND ($3::TEXT IS NULL OR correlation_id = $3)
            "#,
        )
        .bind(&filter.definition_id)
        .bind(filter.version)
        .bind(&filter.correlation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database_error("count running workflows", e))?;

        let count: i64 = row.get("count");
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self))]
    async fn find_bookmarks(&self, payload_hash: &str) -> Result<Vec<BookmarkMatch>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT b.id, b.instance_id, b.activity_instance_id, b.payload_hash
            FROM arbor_workflow_bookmarks b
            JOIN arbor_workflow_states s ON s.id = b.instance_id
            WHERE b.payload_hash = $1
              AND s.status IN ('running', 'suspended')
            ORDER BY b.instance_id, b.id
            "#,
        )
        .bind(payload_hash)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("find bookmarks", e))?;

        rows.into_iter()
            .map(|row| {
                let activity_instance_id: i64 = row.get("activity_instance_id");
                let activity_instance_id = u32::try_from(activity_instance_id).map_err(|_| {
                    StoreError::Serialization(format!(
                        "activity instance id out of range: {activity_instance_id}"
                    ))
                })?;
                Ok(BookmarkMatch {
                    instance_id: row.get("instance_id"),
                    bookmark_id: row.get("id"),
                    activity_instance_id: InstanceId(activity_instance_id),
                    payload_hash: row.get("payload_hash"),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn delete(&self, instance_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM arbor_workflow_states WHERE id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(|e| database_error("delete workflow state", e))?;

        Ok(result.rows_affected() > 0)
    }
}
