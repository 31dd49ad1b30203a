use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The inbound payload that starts a pipeline run.
///
/// Every field except the company/domain pair is optional metadata; the
/// campaign fields ride along for attribution and keyword fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(default)]
    pub target_company: String,
    #[serde(default)]
    pub target_domain: String,
    #[serde(default)]
    pub product_description: String,
    #[serde(default)]
    pub campaign_signal: String,
    #[serde(default)]
    pub campaign_id: String,
    #[serde(default)]
    pub prospect_name: String,
    #[serde(default)]
    pub prospect_email: String,
    #[serde(default = "default_tier")]
    pub tier: u8,
}

fn default_tier() -> u8 {
    1
}

impl Default for Webhook {
    fn default() -> Self {
        Self {
            target_company: String::new(),
            target_domain: String::new(),
            product_description: String::new(),
            campaign_signal: String::new(),
            campaign_id: String::new(),
            prospect_name: String::new(),
            prospect_email: String::new(),
            tier: default_tier(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("webhook must have target_domain or target_company")]
    MissingTarget,
}

impl Webhook {
    /// At least one of company or domain must be present and non-empty.
    pub fn validate(&self) -> Result<(), WebhookError> {
        if self.target_company.trim().is_empty() && self.target_domain.trim().is_empty() {
            return Err(WebhookError::MissingTarget);
        }
        Ok(())
    }

    /// Display name used in report headers and prompts.
    pub fn display_name(&self) -> &str {
        if self.target_company.trim().is_empty() {
            &self.target_domain
        } else {
            &self.target_company
        }
    }
}
