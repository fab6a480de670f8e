//! SMTP delivery of dunning emails

use super::{EmailContext, EmailSender, TemplateRenderer};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use recoup_common::config::EmailConfig;
use recoup_common::types::EmailAddress;
use recoup_common::{Error, Result};
use recoup_storage::models::EmailTemplate;
use std::time::Duration;
use tracing::debug;

/// Email sender relaying through an SMTP server
pub struct SmtpEmailSender {
    config: EmailConfig,
    renderer: TemplateRenderer,
}

impl SmtpEmailSender {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let renderer = TemplateRenderer::new(config.billing_portal_url.clone())?;
        Ok(Self { config, renderer })
    }

    fn from_mailbox(&self) -> Result<Mailbox> {
        let formatted = match &self.config.from_name {
            Some(name) => format!("{} <{}>", name, self.config.from_address),
            None => self.config.from_address.clone(),
        };
        formatted
            .parse()
            .map_err(|e| Error::Config(format!("Invalid from address: {}", e)))
    }

    /// Build the message, choosing multipart only when both bodies exist
    pub(crate) fn build_message(
        &self,
        template: &EmailTemplate,
        context: &EmailContext,
        recipient: &str,
    ) -> Result<Message> {
        let to_address: EmailAddress = recipient.parse()?;
        let to: Mailbox = to_address
            .to_string()
            .parse()
            .map_err(|e| Error::Validation(format!("Invalid recipient address: {}", e)))?;

        let subject = self.renderer.render(&template.subject, context);
        let html = template
            .html_body
            .as_deref()
            .map(|body| self.renderer.render(body, context));
        let text = template
            .text_body
            .as_deref()
            .map(|body| self.renderer.render(body, context));

        let builder = Message::builder()
            .from(self.from_mailbox()?)
            .to(to)
            .subject(subject);

        let message = match (html, text) {
            (Some(html), Some(text)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text))
                    .singlepart(SinglePart::html(html)),
            ),
            (Some(html), None) => builder.header(ContentType::TEXT_HTML).body(html),
            (None, Some(text)) => builder.header(ContentType::TEXT_PLAIN).body(text),
            (None, None) => builder.body(String::new()),
        };

        message.map_err(|e| Error::Email(format!("Failed to build email: {}", e)))
    }

    fn mailer(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)
                .map_err(|e| Error::Email(format!("Failed to create SMTP transport: {}", e)))?
        } else if self.config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
                .map_err(|e| Error::Email(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host)
        };

        let mut builder = builder.port(self.config.port);
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.timeout(Some(Duration::from_secs(30))).build())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_dunning_email(
        &self,
        template: &EmailTemplate,
        context: &EmailContext,
        recipient: &str,
    ) -> Result<()> {
        let message = self.build_message(template, context, recipient)?;

        let response = self
            .mailer()?
            .send(message)
            .await
            .map_err(|e| Error::Email(e.to_string()))?;

        debug!(
            campaign_id = %context.campaign_id,
            template_type = %template.template_type,
            code = %response.code(),
            "Dunning email accepted by relay"
        );

        Ok(())
    }
}
