//! Email template repository

use crate::db::{db_err, parse_column, DatabasePool};
use crate::models::EmailTemplate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recoup_common::types::{EmailTemplateId, EmailTemplateType, WorkspaceId};
use recoup_common::{Error, Result};
use sqlx::FromRow;
use uuid::Uuid;

/// Email template repository trait
#[async_trait]
pub trait EmailTemplateRepository: Send + Sync {
    async fn get(&self, id: EmailTemplateId) -> Result<Option<EmailTemplate>>;
    /// Most recently created template of a type for the workspace
    async fn get_by_type(
        &self,
        workspace_id: WorkspaceId,
        template_type: EmailTemplateType,
    ) -> Result<Option<EmailTemplate>>;
}

#[derive(Debug, FromRow)]
struct TemplateRow {
    id: Uuid,
    workspace_id: Uuid,
    template_type: String,
    subject: String,
    html_body: Option<String>,
    text_body: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for EmailTemplate {
    type Error = Error;

    fn try_from(row: TemplateRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            template_type: parse_column("template_type", &row.template_type)?,
            subject: row.subject,
            html_body: row.html_body,
            text_body: row.text_body,
            created_at: row.created_at,
        })
    }
}

/// Database email template repository
pub struct DbEmailTemplateRepository {
    pool: DatabasePool,
}

impl DbEmailTemplateRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailTemplateRepository for DbEmailTemplateRepository {
    async fn get(&self, id: EmailTemplateId) -> Result<Option<EmailTemplate>> {
        sqlx::query_as::<_, TemplateRow>("SELECT * FROM email_templates WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn get_by_type(
        &self,
        workspace_id: WorkspaceId,
        template_type: EmailTemplateType,
    ) -> Result<Option<EmailTemplate>> {
        sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT * FROM email_templates
            WHERE workspace_id = $1 AND template_type = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(workspace_id)
        .bind(template_type.as_str())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?
        .map(TryInto::try_into)
        .transpose()
    }
}
