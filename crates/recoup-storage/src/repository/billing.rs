//! Billing read models consumed by the dunning engine

use crate::db::{db_err, parse_column, DatabasePool};
use crate::models::{
    Customer, EventCounts, NewSubscriptionEvent, Payment, Price, StateChange, Subscription,
    SubscriptionEvent, SUBSCRIPTION_CANCELLED,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recoup_common::types::{CustomerId, PaymentId, PriceId, SubscriptionId};
use recoup_common::{Error, Result};
use sqlx::{FromRow, Row};
use uuid::Uuid;

/// Billing repository trait
#[async_trait]
pub trait BillingRepository: Send + Sync {
    async fn get_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>>;
    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>>;
    async fn get_price(&self, id: PriceId) -> Result<Option<Price>>;
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;
    /// Failed subscription events that occurred at or after `since`, oldest first
    async fn list_failed_events(&self, since: DateTime<Utc>) -> Result<Vec<SubscriptionEvent>>;
    /// Success and failure counts over the subscription's whole history
    async fn count_events(&self, subscription_id: SubscriptionId) -> Result<EventCounts>;
    async fn record_event(&self, input: NewSubscriptionEvent) -> Result<SubscriptionEvent>;
    /// Failed payments with no subscription created at or after `since`
    async fn list_failed_payments(&self, since: DateTime<Utc>) -> Result<Vec<Payment>>;
    /// Cancel a subscription effective `at` and write the audit entry.
    /// Returns `None` when the subscription is already cancelled.
    async fn cancel_subscription(
        &self,
        id: SubscriptionId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<StateChange>>;
    async fn list_state_changes(&self, subscription_id: SubscriptionId)
        -> Result<Vec<StateChange>>;
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    workspace_id: Uuid,
    customer_id: Uuid,
    subscription_id: Option<Uuid>,
    amount_cents: i64,
    currency: String,
    status: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = Error;

    fn try_from(row: PaymentRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            customer_id: row.customer_id,
            subscription_id: row.subscription_id,
            amount_cents: row.amount_cents,
            currency: row.currency,
            status: parse_column("status", &row.status)?,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    workspace_id: Uuid,
    subscription_id: Uuid,
    payment_id: Option<Uuid>,
    status: String,
    amount_cents: i64,
    currency: String,
    error_message: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for SubscriptionEvent {
    type Error = Error;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            subscription_id: row.subscription_id,
            payment_id: row.payment_id,
            status: parse_column("status", &row.status)?,
            amount_cents: row.amount_cents,
            currency: row.currency,
            error_message: row.error_message,
            occurred_at: row.occurred_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: Uuid,
    workspace_id: Uuid,
    customer_id: Uuid,
    price_id: Uuid,
    status: String,
    current_period_end: DateTime<Utc>,
    cancel_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            customer_id: row.customer_id,
            price_id: row.price_id,
            status: row.status,
            current_period_end: row.current_period_end,
            cancel_at: row.cancel_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct StateChangeRow {
    id: Uuid,
    subscription_id: Uuid,
    from_status: String,
    to_status: String,
    reason: String,
    created_at: DateTime<Utc>,
}

impl From<StateChangeRow> for StateChange {
    fn from(row: StateChangeRow) -> Self {
        Self {
            id: row.id,
            subscription_id: row.subscription_id,
            from_status: row.from_status,
            to_status: row.to_status,
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}

/// Database billing repository
pub struct DbBillingRepository {
    pool: DatabasePool,
}

impl DbBillingRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingRepository for DbBillingRepository {
    async fn get_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        let row = sqlx::query("SELECT id, workspace_id, name, email FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(row.map(|r| Customer {
            id: r.get("id"),
            workspace_id: r.get("workspace_id"),
            name: r.get("name"),
            email: r.get("email"),
        }))
    }

    async fn get_price(&self, id: PriceId) -> Result<Option<Price>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, amount_cents, currency FROM prices WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| Price {
            id: r.get("id"),
            workspace_id: r.get("workspace_id"),
            amount_cents: r.get("amount_cents"),
            currency: r.get("currency"),
        }))
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_failed_events(&self, since: DateTime<Utc>) -> Result<Vec<SubscriptionEvent>> {
        sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM subscription_events
            WHERE status = 'failed' AND occurred_at >= $1
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    async fn count_events(&self, subscription_id: SubscriptionId) -> Result<EventCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'success') AS successes,
                COUNT(*) FILTER (WHERE status = 'failed') AS failures
            FROM subscription_events
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(EventCounts {
            successes: row.get::<Option<i64>, _>("successes").unwrap_or(0),
            failures: row.get::<Option<i64>, _>("failures").unwrap_or(0),
        })
    }

    async fn record_event(&self, input: NewSubscriptionEvent) -> Result<SubscriptionEvent> {
        sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO subscription_events (
                id, workspace_id, subscription_id, payment_id, status,
                amount_cents, currency, error_message, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.workspace_id)
        .bind(input.subscription_id)
        .bind(input.payment_id)
        .bind(input.status.as_str())
        .bind(input.amount_cents)
        .bind(&input.currency)
        .bind(&input.error_message)
        .bind(input.occurred_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?
        .try_into()
    }

    async fn list_failed_payments(&self, since: DateTime<Utc>) -> Result<Vec<Payment>> {
        sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT * FROM payments
            WHERE status = 'failed' AND subscription_id IS NULL AND created_at >= $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    async fn cancel_subscription(
        &self,
        id: SubscriptionId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<StateChange>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM subscriptions WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;

        let from_status = match current {
            Some(status) if status == SUBSCRIPTION_CANCELLED => return Ok(None),
            Some(status) => status,
            None => return Err(Error::NotFound(format!("Subscription {} not found", id))),
        };

        sqlx::query("UPDATE subscriptions SET status = $2, cancel_at = $3 WHERE id = $1")
            .bind(id)
            .bind(SUBSCRIPTION_CANCELLED)
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let change = sqlx::query_as::<_, StateChangeRow>(
            r#"
            INSERT INTO subscription_state_changes (
                id, subscription_id, from_status, to_status, reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(id)
        .bind(&from_status)
        .bind(SUBSCRIPTION_CANCELLED)
        .bind(reason)
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(Some(change.into()))
    }

    async fn list_state_changes(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<StateChange>> {
        let rows = sqlx::query_as::<_, StateChangeRow>(
            r#"
            SELECT * FROM subscription_state_changes
            WHERE subscription_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
