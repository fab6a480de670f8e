//! Template Renderer - Fills dunning email placeholders

use super::EmailContext;
use recoup_common::types::format_amount;
use recoup_common::{Error, Result};
use regex::Regex;

/// Template renderer for `{{placeholder}}` style dunning emails
///
/// Supported placeholders: `name`, `first_name`, `email`, `amount`,
/// `currency`, `attempt_number`, `max_attempts`, `attempts_remaining`,
/// `next_retry_date` and `billing_url`. Anything else is removed.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    /// Base URL customers use to update their payment method
    billing_portal_url: String,
    placeholder: Regex,
}

impl TemplateRenderer {
    /// Create a new template renderer
    pub fn new(billing_portal_url: impl Into<String>) -> Result<Self> {
        let placeholder = Regex::new(r"\{\{[^}]+\}\}")
            .map_err(|e| Error::Internal(format!("Invalid placeholder pattern: {}", e)))?;

        Ok(Self {
            billing_portal_url: billing_portal_url.into().trim_end_matches('/').to_string(),
            placeholder,
        })
    }

    /// Render a template body or subject with campaign data
    pub fn render(&self, template: &str, context: &EmailContext) -> String {
        let mut result = template.to_string();

        let name = context.customer_name.as_deref().unwrap_or("");
        let first_name = name.split_whitespace().next().unwrap_or("");

        result = result.replace("{{name}}", name);
        result = result.replace("{{first_name}}", first_name);
        result = result.replace("{{email}}", &context.customer_email);
        result = result.replace(
            "{{amount}}",
            &format_amount(context.amount_cents, &context.currency),
        );
        result = result.replace("{{currency}}", &context.currency.to_uppercase());
        result = result.replace("{{attempt_number}}", &context.attempt_number.to_string());
        result = result.replace("{{max_attempts}}", &context.max_attempts.to_string());
        result = result.replace(
            "{{attempts_remaining}}",
            &context.attempts_remaining().to_string(),
        );

        let next_retry = context
            .next_retry_at
            .map(|at| at.format("%B %-d, %Y").to_string())
            .unwrap_or_default();
        result = result.replace("{{next_retry_date}}", &next_retry);

        let billing_url = format!("{}/{}", self.billing_portal_url, context.campaign_id);
        result = result.replace("{{billing_url}}", &billing_url);

        self.remove_unused_placeholders(&result)
    }

    fn remove_unused_placeholders(&self, content: &str) -> String {
        self.placeholder.replace_all(content, "").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn context() -> EmailContext {
        EmailContext {
            campaign_id: uuid::Uuid::nil(),
            customer_name: Some("Ada Lovelace".to_string()),
            customer_email: "ada@example.com".to_string(),
            amount_cents: 4900,
            currency: "usd".to_string(),
            attempt_number: 2,
            max_attempts: 4,
            next_retry_at: Some(chrono::Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_render_campaign_values() {
        let renderer = TemplateRenderer::new("https://billing.example.com/").unwrap();

        let result = renderer.render(
            "Hi {{first_name}}, we could not collect {{amount}}. {{attempts_remaining}} tries left, next on {{next_retry_date}}.",
            &context(),
        );

        assert_eq!(
            result,
            "Hi Ada, we could not collect 49.00 USD. 2 tries left, next on March 5, 2024."
        );
    }

    #[test]
    fn test_render_billing_url() {
        let renderer = TemplateRenderer::new("https://billing.example.com/").unwrap();
        let result = renderer.render("{{billing_url}}", &context());
        assert_eq!(
            result,
            "https://billing.example.com/00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_render_removes_unused() {
        let renderer = TemplateRenderer::new("https://billing.example.com").unwrap();
        let mut ctx = context();
        ctx.customer_name = None;

        let result = renderer.render("Hello {{name}}, {{unknown_var}} test", &ctx);
        assert_eq!(result, "Hello ,  test");
    }
}
