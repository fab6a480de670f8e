//! Dunning attempt repository

use crate::db::{db_err, parse_column, DatabasePool};
use crate::models::{AttemptCompletion, DunningAttempt, NewAttempt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recoup_common::types::{AttemptId, AttemptStatus, CampaignId};
use recoup_common::{Error, Result};
use sqlx::FromRow;
use uuid::Uuid;

/// Attempt repository trait
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Insert a pending attempt. A pending attempt with the same number is
    /// returned as is so a re-claimed campaign resumes the same row; a
    /// completed one yields `Error::Duplicate`.
    async fn create(&self, input: NewAttempt) -> Result<DunningAttempt>;
    async fn get(&self, id: AttemptId) -> Result<Option<DunningAttempt>>;
    /// Write the terminal state; `None` when the attempt was already completed
    async fn complete(
        &self,
        id: AttemptId,
        completion: AttemptCompletion,
    ) -> Result<Option<DunningAttempt>>;
    /// Attempts of a campaign in attempt-number order
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<DunningAttempt>>;
}

#[derive(Debug, FromRow)]
struct AttemptRow {
    id: Uuid,
    campaign_id: Uuid,
    attempt_number: i32,
    attempt_type: String,
    status: String,
    payment_error: Option<String>,
    transaction_reference: Option<String>,
    email_template_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<AttemptRow> for DunningAttempt {
    type Error = Error;

    fn try_from(row: AttemptRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            campaign_id: row.campaign_id,
            attempt_number: row.attempt_number,
            attempt_type: parse_column("attempt_type", &row.attempt_type)?,
            status: parse_column("status", &row.status)?,
            payment_error: row.payment_error,
            transaction_reference: row.transaction_reference,
            email_template_id: row.email_template_id,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

/// Database attempt repository
pub struct DbAttemptRepository {
    pool: DatabasePool,
}

impl DbAttemptRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptRepository for DbAttemptRepository {
    async fn create(&self, input: NewAttempt) -> Result<DunningAttempt> {
        let inserted = sqlx::query_as::<_, AttemptRow>(
            r#"
            INSERT INTO dunning_attempts (
                id, campaign_id, attempt_number, attempt_type, status, email_template_id, created_at
            )
            VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            ON CONFLICT (campaign_id, attempt_number) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.campaign_id)
        .bind(input.attempt_number)
        .bind(input.attempt_type.as_str())
        .bind(input.email_template_id)
        .bind(input.created_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        if let Some(row) = inserted {
            return row.try_into();
        }

        let existing: DunningAttempt = sqlx::query_as::<_, AttemptRow>(
            "SELECT * FROM dunning_attempts WHERE campaign_id = $1 AND attempt_number = $2",
        )
        .bind(input.campaign_id)
        .bind(input.attempt_number)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?
        .try_into()?;

        if existing.status == AttemptStatus::Pending {
            Ok(existing)
        } else {
            Err(Error::Duplicate(format!(
                "Attempt {} of campaign {} already completed",
                input.attempt_number, input.campaign_id
            )))
        }
    }

    async fn get(&self, id: AttemptId) -> Result<Option<DunningAttempt>> {
        sqlx::query_as::<_, AttemptRow>("SELECT * FROM dunning_attempts WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn complete(
        &self,
        id: AttemptId,
        completion: AttemptCompletion,
    ) -> Result<Option<DunningAttempt>> {
        if completion.status == AttemptStatus::Pending {
            return Err(Error::Validation(
                "An attempt cannot be completed as pending".to_string(),
            ));
        }

        sqlx::query_as::<_, AttemptRow>(
            r#"
            UPDATE dunning_attempts SET
                status = $2,
                payment_error = $3,
                transaction_reference = $4,
                completed_at = $5
            WHERE id = $1 AND completed_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(completion.status.as_str())
        .bind(&completion.payment_error)
        .bind(&completion.transaction_reference)
        .bind(completion.completed_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?
        .map(TryInto::try_into)
        .transpose()
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<DunningAttempt>> {
        sqlx::query_as::<_, AttemptRow>(
            "SELECT * FROM dunning_attempts WHERE campaign_id = $1 ORDER BY attempt_number ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }
}
