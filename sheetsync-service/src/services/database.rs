//! Database service for sheetsync-service.

use crate::models::{
    Conflict, RemoteEdit, RemoteRowRef, ResolutionStatus, SyncState, TransactionRecord,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::sync::LocalStore;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "sheetsync-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, job_id, transaction_date, description, amount, category, subcategory, confidence_score, user_confirmed, user_notes, sync_fingerprint, remote_sheet_name, remote_row_index, created_utc, updated_utc";

const CONFLICT_COLUMNS: &str = "conflict_id, transaction_id, user_id, spreadsheet_id, sheet_name, conflict_type, resolution_status, local_value, remote_value, remote_row_index, detected_utc, resolved_utc";

#[async_trait]
impl LocalStore for Database {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_for_sync(
        &self,
        user_id: Uuid,
        job_id: Option<Uuid>,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_for_sync"])
            .start_timer();

        let records = sqlx::query_as::<_, TransactionRecord>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE user_id = $1 AND ($2::uuid IS NULL OR job_id = $2)
            ORDER BY transaction_date, transaction_id
            "#,
        ))
        .bind(user_id)
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list transactions: {}", e))
        })?;

        timer.observe_duration();

        Ok(records)
    }

    #[instrument(skip(self), fields(user_id = %user_id, transaction_id = %transaction_id))]
    async fn get_transaction(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<TransactionRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_transaction"])
            .start_timer();

        let record = sqlx::query_as::<_, TransactionRecord>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE user_id = $1 AND transaction_id = $2
            "#,
        ))
        .bind(user_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get transaction: {}", e))
        })?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self), fields(user_id = %user_id, spreadsheet_id = %spreadsheet_id))]
    async fn list_sync_states(
        &self,
        user_id: Uuid,
        spreadsheet_id: &str,
    ) -> Result<Vec<SyncState>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_sync_states"])
            .start_timer();

        let states = sqlx::query_as::<_, SyncState>(
            r#"
            SELECT transaction_id, user_id, spreadsheet_id, sheet_name, row_index, base_fingerprint, synced_utc
            FROM sync_state
            WHERE user_id = $1 AND spreadsheet_id = $2
            ORDER BY row_index
            "#,
        )
        .bind(user_id)
        .bind(spreadsheet_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list sync states: {}", e))
        })?;

        timer.observe_duration();

        Ok(states)
    }

    #[instrument(skip(self, edits), fields(user_id = %user_id, edit_count = edits.len()))]
    async fn apply_remote_edits(
        &self,
        user_id: Uuid,
        edits: &[RemoteEdit],
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_remote_edits"])
            .start_timer();

        // Atomic per record; a failure mid-list leaves earlier edits
        // committed, matching the engine's crash-consistency contract.
        let mut applied = 0u64;
        for edit in edits {
            let result = sqlx::query(
                r#"
                UPDATE transactions
                SET category = $3,
                    subcategory = $4,
                    user_confirmed = $5,
                    user_notes = $6,
                    updated_utc = now()
                WHERE user_id = $1 AND transaction_id = $2
                "#,
            )
            .bind(user_id)
            .bind(edit.transaction_id)
            .bind(&edit.category)
            .bind(&edit.subcategory)
            .bind(edit.user_confirmed)
            .bind(&edit.user_notes)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to apply remote edit: {}", e))
            })?;

            applied += result.rows_affected();
        }

        timer.observe_duration();

        Ok(applied)
    }

    #[instrument(skip(self, fingerprint), fields(user_id = %user_id, transaction_id = %transaction_id))]
    async fn record_sync_state(
        &self,
        user_id: Uuid,
        spreadsheet_id: &str,
        transaction_id: Uuid,
        fingerprint: &str,
        row_ref: &RemoteRowRef,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_sync_state"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query(
            r#"
            UPDATE transactions
            SET sync_fingerprint = $3,
                remote_sheet_name = $4,
                remote_row_index = $5,
                updated_utc = now()
            WHERE user_id = $1 AND transaction_id = $2
            "#,
        )
        .bind(user_id)
        .bind(transaction_id)
        .bind(fingerprint)
        .bind(&row_ref.sheet_name)
        .bind(row_ref.row_index as i32)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update transaction ref: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO sync_state (transaction_id, user_id, spreadsheet_id, sheet_name, row_index, base_fingerprint, synced_utc)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (transaction_id, spreadsheet_id) DO UPDATE
            SET sheet_name = EXCLUDED.sheet_name,
                row_index = EXCLUDED.row_index,
                base_fingerprint = EXCLUDED.base_fingerprint,
                synced_utc = now()
            "#,
        )
        .bind(transaction_id)
        .bind(user_id)
        .bind(spreadsheet_id)
        .bind(&row_ref.sheet_name)
        .bind(row_ref.row_index as i32)
        .bind(fingerprint)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upsert sync state: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit sync state: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, transaction_id = %transaction_id))]
    async fn delete_sync_state(
        &self,
        user_id: Uuid,
        spreadsheet_id: &str,
        transaction_id: Uuid,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_sync_state"])
            .start_timer();

        sqlx::query(
            r#"
            DELETE FROM sync_state
            WHERE user_id = $1 AND spreadsheet_id = $2 AND transaction_id = $3
            "#,
        )
        .bind(user_id)
        .bind(spreadsheet_id)
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to delete sync state: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, transaction_id = %transaction_id))]
    async fn clear_remote_ref(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["clear_remote_ref"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE transactions
            SET remote_sheet_name = NULL,
                remote_row_index = NULL,
                updated_utc = now()
            WHERE user_id = $1 AND transaction_id = $2
            "#,
        )
        .bind(user_id)
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to clear remote ref: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, conflict), fields(transaction_id = %conflict.transaction_id, conflict_type = %conflict.conflict_type))]
    async fn upsert_conflict(&self, conflict: &Conflict) -> Result<Conflict, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_conflict"])
            .start_timer();

        // A pending or ignored conflict is kept untouched; a previously
        // resolved one is re-opened, since the divergence came back.
        let stored = sqlx::query_as::<_, Conflict>(&format!(
            r#"
            INSERT INTO sync_conflicts ({CONFLICT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (transaction_id, spreadsheet_id, conflict_type) DO UPDATE
            SET resolution_status = CASE
                    WHEN sync_conflicts.resolution_status IN ('resolved_local', 'resolved_remote')
                    THEN 'pending'
                    ELSE sync_conflicts.resolution_status
                END,
                local_value = CASE
                    WHEN sync_conflicts.resolution_status IN ('resolved_local', 'resolved_remote')
                    THEN EXCLUDED.local_value
                    ELSE sync_conflicts.local_value
                END,
                remote_value = CASE
                    WHEN sync_conflicts.resolution_status IN ('resolved_local', 'resolved_remote')
                    THEN EXCLUDED.remote_value
                    ELSE sync_conflicts.remote_value
                END,
                remote_row_index = CASE
                    WHEN sync_conflicts.resolution_status IN ('resolved_local', 'resolved_remote')
                    THEN EXCLUDED.remote_row_index
                    ELSE sync_conflicts.remote_row_index
                END,
                detected_utc = CASE
                    WHEN sync_conflicts.resolution_status IN ('resolved_local', 'resolved_remote')
                    THEN now()
                    ELSE sync_conflicts.detected_utc
                END,
                resolved_utc = CASE
                    WHEN sync_conflicts.resolution_status IN ('resolved_local', 'resolved_remote')
                    THEN NULL
                    ELSE sync_conflicts.resolved_utc
                END
            RETURNING {CONFLICT_COLUMNS}
            "#,
        ))
        .bind(conflict.conflict_id)
        .bind(conflict.transaction_id)
        .bind(conflict.user_id)
        .bind(&conflict.spreadsheet_id)
        .bind(&conflict.sheet_name)
        .bind(&conflict.conflict_type)
        .bind(&conflict.resolution_status)
        .bind(&conflict.local_value)
        .bind(&conflict.remote_value)
        .bind(conflict.remote_row_index)
        .bind(conflict.detected_utc)
        .bind(conflict.resolved_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upsert conflict: {}", e))
        })?;

        timer.observe_duration();

        Ok(stored)
    }

    #[instrument(skip(self), fields(user_id = %user_id, conflict_id = %conflict_id))]
    async fn get_conflict(
        &self,
        user_id: Uuid,
        conflict_id: Uuid,
    ) -> Result<Option<Conflict>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_conflict"])
            .start_timer();

        let conflict = sqlx::query_as::<_, Conflict>(&format!(
            r#"
            SELECT {CONFLICT_COLUMNS}
            FROM sync_conflicts
            WHERE user_id = $1 AND conflict_id = $2
            "#,
        ))
        .bind(user_id)
        .bind(conflict_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get conflict: {}", e)))?;

        timer.observe_duration();

        Ok(conflict)
    }

    #[instrument(skip(self), fields(user_id = %user_id, conflict_id = %conflict_id))]
    async fn set_conflict_resolution(
        &self,
        user_id: Uuid,
        conflict_id: Uuid,
        status: ResolutionStatus,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_conflict_resolution"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE sync_conflicts
            SET resolution_status = $3,
                resolved_utc = now()
            WHERE user_id = $1 AND conflict_id = $2
            "#,
        )
        .bind(user_id)
        .bind(conflict_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update conflict: {}", e))
        })?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Conflict {} not found",
                conflict_id
            )));
        }

        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_conflicts(
        &self,
        user_id: Uuid,
        spreadsheet_id: Option<&str>,
    ) -> Result<Vec<Conflict>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_conflicts"])
            .start_timer();

        let conflicts = sqlx::query_as::<_, Conflict>(&format!(
            r#"
            SELECT {CONFLICT_COLUMNS}
            FROM sync_conflicts
            WHERE user_id = $1 AND ($2::text IS NULL OR spreadsheet_id = $2)
            ORDER BY detected_utc DESC
            "#,
        ))
        .bind(user_id)
        .bind(spreadsheet_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list conflicts: {}", e))
        })?;

        timer.observe_duration();

        Ok(conflicts)
    }
}
