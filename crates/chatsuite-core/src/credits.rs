//! Credit gate for chat turns.
//!
//! The check here is pure and advisory: it explains why a request would be
//! refused. The authoritative charge is the conditional decrement in
//! [`Database::try_consume_credits`](crate::db::Database::try_consume_credits).

use serde::{Deserialize, Serialize};

/// Cost of one chat turn under the default policy.
pub const DEFAULT_COST_PER_MESSAGE: i64 = 1;

/// What a request wants to use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageConfig {
    pub model_id: String,
    #[serde(default)]
    pub browse_enabled: bool,
    #[serde(default)]
    pub has_attachments: bool,
}

/// Outcome of a credit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditCheck {
    pub can_use: bool,
    pub required_credits: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Flat per-message pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditPolicy {
    pub cost_per_message: i64,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            cost_per_message: DEFAULT_COST_PER_MESSAGE,
        }
    }
}

impl CreditPolicy {
    pub fn new(cost_per_message: i64) -> Self {
        Self { cost_per_message }
    }

    /// Credits a configuration costs. Model and features do not change the price.
    pub fn required_credits(&self, _config: &UsageConfig) -> i64 {
        self.cost_per_message
    }

    /// Fail-closed check of a balance against a configuration.
    pub fn check(&self, balance: i64, config: &UsageConfig) -> CreditCheck {
        let required = self.required_credits(config);
        if balance >= required {
            CreditCheck {
                can_use: true,
                required_credits: required,
                reason: None,
            }
        } else {
            CreditCheck {
                can_use: false,
                required_credits: required,
                reason: Some(format!(
                    "Insufficient credits: this message needs {required} credit{}, you have {balance}. Please top up to keep chatting.",
                    if required == 1 { "" } else { "s" }
                )),
            }
        }
    }
}

/// Check a balance under the default policy.
pub fn can_use_configuration(balance: i64, config: &UsageConfig) -> CreditCheck {
    CreditPolicy::default().check(balance, config)
}
