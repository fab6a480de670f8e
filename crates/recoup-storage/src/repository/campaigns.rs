//! Dunning campaign repository

use crate::db::{db_err, parse_column, DatabasePool};
use crate::models::{
    CampaignCounts, CampaignDetail, CampaignProgress, CampaignTarget, DunningCampaign,
    NewCampaign,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recoup_common::types::{
    CampaignId, CampaignStatus, FinalAction, PaymentId, SubscriptionId, WorkspaceId,
};
use recoup_common::{Error, Result};
use sqlx::{FromRow, Row};
use uuid::Uuid;

/// Campaign repository trait
///
/// Every state-changing method is conditional on the campaign's current
/// status and returns `None` when the condition did not hold, so callers can
/// tell a lost race from a successful write.
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Insert an active campaign unless the target is already taken: an open
    /// (active or paused) campaign for the subscription, or any campaign at
    /// all for the payment. Returns `None` when it is; the check and the
    /// insert are a single atomic step.
    async fn create_if_absent(&self, input: NewCampaign) -> Result<Option<DunningCampaign>>;
    async fn get(&self, id: CampaignId) -> Result<Option<DunningCampaign>>;
    async fn get_detail(&self, id: CampaignId) -> Result<Option<CampaignDetail>>;
    async fn find_open_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<DunningCampaign>>;
    async fn find_open_for_payment(&self, payment_id: PaymentId)
        -> Result<Option<DunningCampaign>>;
    /// Most recently created campaign for the target, in any status
    async fn find_latest_for_target(
        &self,
        target: CampaignTarget,
    ) -> Result<Option<DunningCampaign>>;
    async fn list_by_workspace(
        &self,
        workspace_id: WorkspaceId,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<DunningCampaign>>;
    /// Claim up to `limit` active campaigns due at `now`, oldest due first.
    /// Claimed campaigns have `next_retry_at` pushed to `lease_until` so a
    /// concurrent claimer skips them.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<DunningCampaign>>;
    /// Advance an active campaign; never moves `current_attempt` backwards
    async fn record_progress(
        &self,
        id: CampaignId,
        progress: CampaignProgress,
    ) -> Result<Option<DunningCampaign>>;
    async fn mark_recovered(
        &self,
        id: CampaignId,
        recovered_amount_cents: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<DunningCampaign>>;
    async fn mark_failed(
        &self,
        id: CampaignId,
        final_action: FinalAction,
        at: DateTime<Utc>,
    ) -> Result<Option<DunningCampaign>>;
    async fn pause(&self, id: CampaignId, at: DateTime<Utc>) -> Result<Option<DunningCampaign>>;
    async fn resume(
        &self,
        id: CampaignId,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<DunningCampaign>>;
    async fn count_by_status(&self, workspace_id: WorkspaceId) -> Result<CampaignCounts>;
}

#[derive(Debug, FromRow)]
struct CampaignRow {
    id: Uuid,
    workspace_id: Uuid,
    configuration_id: Uuid,
    subscription_id: Option<Uuid>,
    payment_id: Option<Uuid>,
    customer_id: Uuid,
    status: String,
    current_attempt: i32,
    max_retry_attempts: i32,
    original_amount_cents: i64,
    recovered_amount_cents: i64,
    currency: String,
    next_retry_at: Option<DateTime<Utc>>,
    last_retry_at: Option<DateTime<Utc>>,
    final_action_taken: Option<String>,
    strategy: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CampaignRow> for DunningCampaign {
    type Error = Error;

    fn try_from(row: CampaignRow) -> Result<Self> {
        let target = CampaignTarget::from_columns(row.subscription_id, row.payment_id)
            .ok_or_else(|| {
                Error::Database(format!(
                    "Campaign {} must reference exactly one subscription or payment",
                    row.id
                ))
            })?;

        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            configuration_id: row.configuration_id,
            target,
            customer_id: row.customer_id,
            status: parse_column("status", &row.status)?,
            current_attempt: row.current_attempt,
            max_retry_attempts: row.max_retry_attempts,
            original_amount_cents: row.original_amount_cents,
            recovered_amount_cents: row.recovered_amount_cents,
            currency: row.currency,
            next_retry_at: row.next_retry_at,
            last_retry_at: row.last_retry_at,
            final_action_taken: row
                .final_action_taken
                .as_deref()
                .map(|v| parse_column("final_action_taken", v))
                .transpose()?,
            strategy: row
                .strategy
                .as_deref()
                .map(|v| parse_column("strategy", v))
                .transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DetailRow {
    #[sqlx(flatten)]
    campaign: CampaignRow,
    customer_name: Option<String>,
    customer_email: String,
}

#[derive(Debug, FromRow)]
struct ClaimedRow {
    #[sqlx(flatten)]
    campaign: CampaignRow,
    due_at: DateTime<Utc>,
}

fn convert_one(row: Option<CampaignRow>) -> Result<Option<DunningCampaign>> {
    row.map(TryInto::try_into).transpose()
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create_if_absent(&self, input: NewCampaign) -> Result<Option<DunningCampaign>> {
        let id = Uuid::now_v7();

        // The unique indexes on campaign targets turn a concurrent duplicate
        // into a conflict, which DO NOTHING reports as zero rows.
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            INSERT INTO dunning_campaigns (
                id, workspace_id, configuration_id, subscription_id, payment_id, customer_id,
                status, current_attempt, max_retry_attempts, original_amount_cents,
                recovered_amount_cents, currency, next_retry_at, strategy, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'active', 0, $7, $8, 0, $9, $10, $11, $12, $12)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.workspace_id)
        .bind(input.configuration_id)
        .bind(input.target.subscription_id())
        .bind(input.target.payment_id())
        .bind(input.customer_id)
        .bind(input.max_retry_attempts)
        .bind(input.original_amount_cents)
        .bind(&input.currency)
        .bind(input.next_retry_at)
        .bind(input.strategy.map(|s| s.as_str()))
        .bind(input.created_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert_one(row)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<DunningCampaign>> {
        let row = sqlx::query_as::<_, CampaignRow>("SELECT * FROM dunning_campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        convert_one(row)
    }

    async fn get_detail(&self, id: CampaignId) -> Result<Option<CampaignDetail>> {
        let row = sqlx::query_as::<_, DetailRow>(
            r#"
            SELECT c.*, cu.name AS customer_name, cu.email AS customer_email
            FROM dunning_campaigns c
            JOIN customers cu ON cu.id = c.customer_id
            WHERE c.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        row.map(|r| {
            Ok(CampaignDetail {
                campaign: r.campaign.try_into()?,
                customer_name: r.customer_name,
                customer_email: r.customer_email,
            })
        })
        .transpose()
    }

    async fn find_open_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<DunningCampaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT * FROM dunning_campaigns
            WHERE subscription_id = $1 AND status IN ('active', 'paused')
            LIMIT 1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert_one(row)
    }

    async fn find_open_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> Result<Option<DunningCampaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT * FROM dunning_campaigns
            WHERE payment_id = $1 AND status IN ('active', 'paused')
            LIMIT 1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert_one(row)
    }

    async fn find_latest_for_target(
        &self,
        target: CampaignTarget,
    ) -> Result<Option<DunningCampaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT * FROM dunning_campaigns
            WHERE subscription_id = $1 OR payment_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(target.subscription_id())
        .bind(target.payment_id())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert_one(row)
    }

    async fn list_by_workspace(
        &self,
        workspace_id: WorkspaceId,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<DunningCampaign>> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, CampaignRow>(
                r#"
                SELECT * FROM dunning_campaigns
                WHERE workspace_id = $1 AND status = $2
                ORDER BY created_at DESC
                "#,
            )
            .bind(workspace_id)
            .bind(status.as_str())
            .fetch_all(self.pool.pool())
            .await
        } else {
            sqlx::query_as::<_, CampaignRow>(
                r#"
                SELECT * FROM dunning_campaigns
                WHERE workspace_id = $1
                ORDER BY created_at DESC
                "#,
            )
            .bind(workspace_id)
            .fetch_all(self.pool.pool())
            .await
        }
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<DunningCampaign>> {
        let mut rows = sqlx::query_as::<_, ClaimedRow>(
            r#"
            WITH due AS (
                SELECT id, next_retry_at AS due_at
                FROM dunning_campaigns
                WHERE status = 'active' AND next_retry_at <= $1
                ORDER BY next_retry_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE dunning_campaigns c
            SET next_retry_at = $3, updated_at = $1
            FROM due
            WHERE c.id = due.id
            RETURNING c.*, due.due_at
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(lease_until)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        // UPDATE ... RETURNING does not preserve the CTE's ordering
        rows.sort_by_key(|r| r.due_at);
        rows.into_iter().map(|r| r.campaign.try_into()).collect()
    }

    async fn record_progress(
        &self,
        id: CampaignId,
        progress: CampaignProgress,
    ) -> Result<Option<DunningCampaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            UPDATE dunning_campaigns SET
                current_attempt = $2,
                last_retry_at = $3,
                next_retry_at = $4,
                updated_at = $3
            WHERE id = $1 AND status = 'active' AND current_attempt < $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(progress.current_attempt)
        .bind(progress.last_retry_at)
        .bind(progress.next_retry_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert_one(row)
    }

    async fn mark_recovered(
        &self,
        id: CampaignId,
        recovered_amount_cents: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<DunningCampaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            UPDATE dunning_campaigns SET
                status = 'recovered',
                recovered_amount_cents = $2,
                next_retry_at = NULL,
                last_retry_at = $3,
                completed_at = $3,
                updated_at = $3
            WHERE id = $1 AND status IN ('active', 'paused')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(recovered_amount_cents)
        .bind(at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert_one(row)
    }

    async fn mark_failed(
        &self,
        id: CampaignId,
        final_action: FinalAction,
        at: DateTime<Utc>,
    ) -> Result<Option<DunningCampaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            UPDATE dunning_campaigns SET
                status = 'failed',
                final_action_taken = $2,
                next_retry_at = NULL,
                last_retry_at = $3,
                completed_at = $3,
                updated_at = $3
            WHERE id = $1 AND status IN ('active', 'paused')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(final_action.as_str())
        .bind(at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert_one(row)
    }

    async fn pause(&self, id: CampaignId, at: DateTime<Utc>) -> Result<Option<DunningCampaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            UPDATE dunning_campaigns SET
                status = 'paused',
                next_retry_at = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert_one(row)
    }

    async fn resume(
        &self,
        id: CampaignId,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<DunningCampaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            UPDATE dunning_campaigns SET
                status = 'active',
                next_retry_at = $2,
                updated_at = $2
            WHERE id = $1 AND status = 'paused'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next_retry_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert_one(row)
    }

    async fn count_by_status(&self, workspace_id: WorkspaceId) -> Result<CampaignCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'active') AS active,
                COUNT(*) FILTER (WHERE status = 'paused') AS paused,
                COUNT(*) FILTER (WHERE status = 'recovered') AS recovered,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COALESCE(SUM(recovered_amount_cents) FILTER (WHERE status = 'recovered'), 0)::BIGINT
                    AS recovered_amount_cents
            FROM dunning_campaigns
            WHERE workspace_id = $1
            "#,
        )
        .bind(workspace_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(CampaignCounts {
            active: row.get::<Option<i64>, _>("active").unwrap_or(0),
            paused: row.get::<Option<i64>, _>("paused").unwrap_or(0),
            recovered: row.get::<Option<i64>, _>("recovered").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            recovered_amount_cents: row
                .get::<Option<i64>, _>("recovered_amount_cents")
                .unwrap_or(0),
        })
    }
}
