//! Dunning configuration repository

use crate::db::{db_err, parse_column, DatabasePool};
use crate::models::{
    AttemptActions, CreateConfiguration, DunningConfiguration, CONFIGURATION_SCHEMA_VERSION,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recoup_common::types::{ConfigurationId, WorkspaceId};
use recoup_common::{Error, Result};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Configuration repository trait
#[async_trait]
pub trait ConfigurationRepository: Send + Sync {
    /// Insert a configuration. When `input.is_default` is set, every other
    /// default of the workspace is unset in the same serialised step.
    async fn create(&self, input: CreateConfiguration) -> Result<DunningConfiguration>;
    async fn get(&self, id: ConfigurationId) -> Result<Option<DunningConfiguration>>;
    /// Configurations of a workspace, oldest first
    async fn list_by_workspace(&self, workspace_id: WorkspaceId)
        -> Result<Vec<DunningConfiguration>>;
}

#[derive(Debug, FromRow)]
struct ConfigurationRow {
    id: Uuid,
    workspace_id: Uuid,
    name: String,
    max_retry_attempts: i32,
    retry_interval_days: Json<Vec<i32>>,
    attempt_actions: Json<Vec<AttemptActions>>,
    final_action: String,
    final_action_config: serde_json::Value,
    grace_period_hours: i32,
    is_default: bool,
    is_active: bool,
    schema_version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConfigurationRow> for DunningConfiguration {
    type Error = Error;

    fn try_from(row: ConfigurationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            max_retry_attempts: row.max_retry_attempts,
            retry_interval_days: row.retry_interval_days.0,
            attempt_actions: row.attempt_actions.0,
            final_action: parse_column("final_action", &row.final_action)?,
            final_action_config: row.final_action_config,
            grace_period_hours: row.grace_period_hours,
            is_default: row.is_default,
            is_active: row.is_active,
            schema_version: row.schema_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database configuration repository
pub struct DbConfigurationRepository {
    pool: DatabasePool,
}

impl DbConfigurationRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigurationRepository for DbConfigurationRepository {
    async fn create(&self, input: CreateConfiguration) -> Result<DunningConfiguration> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        // Serialise default switches per workspace for the rest of the transaction
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(input.workspace_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        if input.is_default {
            sqlx::query(
                r#"
                UPDATE dunning_configurations
                SET is_default = false, updated_at = $2
                WHERE workspace_id = $1 AND is_default
                "#,
            )
            .bind(input.workspace_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        let row = sqlx::query_as::<_, ConfigurationRow>(
            r#"
            INSERT INTO dunning_configurations (
                id, workspace_id, name, max_retry_attempts, retry_interval_days,
                attempt_actions, final_action, final_action_config, grace_period_hours,
                is_default, is_active, schema_version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.workspace_id)
        .bind(&input.name)
        .bind(input.max_retry_attempts)
        .bind(Json(&input.retry_interval_days))
        .bind(Json(&input.attempt_actions))
        .bind(input.final_action.as_str())
        .bind(&input.final_action_config)
        .bind(input.grace_period_hours)
        .bind(input.is_default)
        .bind(input.is_active)
        .bind(CONFIGURATION_SCHEMA_VERSION)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        row.try_into()
    }

    async fn get(&self, id: ConfigurationId) -> Result<Option<DunningConfiguration>> {
        sqlx::query_as::<_, ConfigurationRow>("SELECT * FROM dunning_configurations WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_by_workspace(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<DunningConfiguration>> {
        sqlx::query_as::<_, ConfigurationRow>(
            "SELECT * FROM dunning_configurations WHERE workspace_id = $1 ORDER BY created_at ASC",
        )
        .bind(workspace_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }
}
