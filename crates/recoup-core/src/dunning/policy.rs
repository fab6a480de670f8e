//! Typed retry policy parsed from a dunning configuration document

use crate::error::{DunningError, Result};
use chrono::{DateTime, Duration, Utc};
use recoup_common::types::{ActionKind, AttemptType, EmailTemplateId, FinalAction};
use recoup_storage::models::{
    AttemptActions, CreateConfiguration, DunningConfiguration, CONFIGURATION_SCHEMA_VERSION,
};
use std::collections::{BTreeMap, HashSet};

/// Wait used when a configuration has a single attempt and so no intervals
const FALLBACK_INTERVAL_DAYS: i64 = 1;

/// Longest wait allowed between two attempts
pub const MAX_INTERVAL_DAYS: i32 = 365;

/// Longest delay allowed before the first attempt
pub const MAX_GRACE_PERIOD_HOURS: i32 = 24 * 365;

/// What to do for one attempt number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptPlan {
    pub actions: Vec<ActionKind>,
    pub email_template_id: Option<EmailTemplateId>,
}

impl AttemptPlan {
    fn default_plan() -> Self {
        Self {
            actions: vec![ActionKind::RetryPayment],
            email_template_id: None,
        }
    }

    pub fn retries_payment(&self) -> bool {
        self.actions.contains(&ActionKind::RetryPayment)
    }

    pub fn attempt_type(&self) -> AttemptType {
        if self.retries_payment() {
            AttemptType::Payment
        } else {
            AttemptType::Notification
        }
    }
}

/// Validated retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retry_attempts: i32,
    retry_interval_days: Vec<i32>,
    plans: BTreeMap<i32, AttemptPlan>,
    final_action: FinalAction,
    grace_period_hours: i32,
}

impl RetryPolicy {
    /// Parse a stored configuration, rejecting documents that fail validation
    pub fn from_configuration(configuration: &DunningConfiguration) -> Result<Self> {
        if configuration.schema_version != CONFIGURATION_SCHEMA_VERSION {
            return Err(DunningError::Validation(format!(
                "Configuration {} has unsupported schema version {}",
                configuration.id, configuration.schema_version
            )));
        }

        Self::build(
            configuration.max_retry_attempts,
            &configuration.retry_interval_days,
            &configuration.attempt_actions,
            configuration.final_action,
            configuration.grace_period_hours,
        )
    }

    /// Validate configuration input before it is stored
    pub fn validate(input: &CreateConfiguration) -> Result<Self> {
        if input.name.trim().is_empty() {
            return Err(DunningError::Validation(
                "Configuration name must not be empty".to_string(),
            ));
        }

        Self::build(
            input.max_retry_attempts,
            &input.retry_interval_days,
            &input.attempt_actions,
            input.final_action,
            input.grace_period_hours,
        )
    }

    fn build(
        max_retry_attempts: i32,
        retry_interval_days: &[i32],
        attempt_actions: &[AttemptActions],
        final_action: FinalAction,
        grace_period_hours: i32,
    ) -> Result<Self> {
        if max_retry_attempts < 1 {
            return Err(DunningError::Validation(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }

        let required = (max_retry_attempts - 1) as usize;
        if retry_interval_days.len() < required {
            return Err(DunningError::Validation(format!(
                "retry_interval_days needs at least {} entries for {} attempts, got {}",
                required,
                max_retry_attempts,
                retry_interval_days.len()
            )));
        }
        if retry_interval_days.iter().any(|days| *days < 0) {
            return Err(DunningError::Validation(
                "retry_interval_days entries must not be negative".to_string(),
            ));
        }
        if let Some(days) = retry_interval_days
            .iter()
            .find(|days| **days > MAX_INTERVAL_DAYS)
        {
            return Err(DunningError::Validation(format!(
                "retry_interval_days entries must be at most {}, got {}",
                MAX_INTERVAL_DAYS, days
            )));
        }

        if grace_period_hours < 0 {
            return Err(DunningError::Validation(
                "grace_period_hours must not be negative".to_string(),
            ));
        }
        if grace_period_hours > MAX_GRACE_PERIOD_HOURS {
            return Err(DunningError::Validation(format!(
                "grace_period_hours must be at most {}, got {}",
                MAX_GRACE_PERIOD_HOURS, grace_period_hours
            )));
        }

        let mut plans = BTreeMap::new();
        for entry in attempt_actions {
            if entry.attempt < 1 || entry.attempt > max_retry_attempts {
                return Err(DunningError::Validation(format!(
                    "attempt_actions entry for attempt {} is outside 1..={}",
                    entry.attempt, max_retry_attempts
                )));
            }
            if entry.actions.is_empty() {
                return Err(DunningError::Validation(format!(
                    "attempt_actions entry for attempt {} has no actions",
                    entry.attempt
                )));
            }
            let unique: HashSet<_> = entry.actions.iter().collect();
            if unique.len() != entry.actions.len() {
                return Err(DunningError::Validation(format!(
                    "attempt_actions entry for attempt {} repeats an action",
                    entry.attempt
                )));
            }

            let plan = AttemptPlan {
                actions: entry.actions.clone(),
                email_template_id: entry.email_template_id,
            };
            if plans.insert(entry.attempt, plan).is_some() {
                return Err(DunningError::Validation(format!(
                    "attempt_actions has more than one entry for attempt {}",
                    entry.attempt
                )));
            }
        }

        Ok(Self {
            max_retry_attempts,
            retry_interval_days: retry_interval_days.to_vec(),
            plans,
            final_action,
            grace_period_hours,
        })
    }

    pub fn max_retry_attempts(&self) -> i32 {
        self.max_retry_attempts
    }

    pub fn final_action(&self) -> FinalAction {
        self.final_action
    }

    /// Delay between a failure being detected and the first attempt
    pub fn grace_period(&self) -> Duration {
        Duration::hours(i64::from(self.grace_period_hours))
    }

    /// Actions for a one-based attempt number; unconfigured attempts retry the payment
    pub fn plan_for(&self, attempt_number: i32) -> AttemptPlan {
        self.plans
            .get(&attempt_number)
            .cloned()
            .unwrap_or_else(AttemptPlan::default_plan)
    }

    /// Wait after attempt `attempt_number` fails. Indexes past the end of the
    /// interval list reuse the last configured interval.
    pub fn interval_after(&self, attempt_number: i32) -> Duration {
        let days = usize::try_from(attempt_number - 1)
            .ok()
            .and_then(|index| self.retry_interval_days.get(index))
            .or_else(|| self.retry_interval_days.last())
            .map(|days| i64::from(*days))
            .unwrap_or(FALLBACK_INTERVAL_DAYS);
        Duration::days(days)
    }

    /// When a campaign opened at `now` makes its first attempt
    pub fn first_retry_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        shift(now, self.grace_period())
    }

    /// When the attempt after a failed `attempt_number` is due
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempt_number: i32) -> Result<DateTime<Utc>> {
        shift(now, self.interval_after(attempt_number))
    }
}

fn shift(now: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(by).ok_or_else(|| {
        DunningError::Validation(format!("Retry time {} + {} is out of range", now, by))
    })
}
