//! Repository layer for data access

pub mod attempts;
pub mod billing;
pub mod campaigns;
pub mod configurations;
pub mod templates;

// Repository traits consumed by the dunning engine
pub use attempts::AttemptRepository;
pub use billing::BillingRepository;
pub use campaigns::CampaignRepository;
pub use configurations::ConfigurationRepository;
pub use templates::EmailTemplateRepository;

// PostgreSQL implementations
pub use attempts::DbAttemptRepository;
pub use billing::DbBillingRepository;
pub use campaigns::DbCampaignRepository;
pub use configurations::DbConfigurationRepository;
pub use templates::DbEmailTemplateRepository;
