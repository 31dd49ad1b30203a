//! Tunable registry for the intel brief pipeline.
//!
//! A process hosts one [`ConfigRegistry`]. Operators may mutate values at
//! runtime through the typed key/value surface; every run takes an
//! immutable [`PipelineConfig`] snapshot at admission and never reads the
//! registry again, so in-flight runs are unaffected by later edits.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

// ============================================================================
// Snapshot value object
// ============================================================================

/// All pipeline tunables. Cloned wholesale as the per-run snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent runs admitted into heavy work
    pub max_concurrent_runs: u32,
    /// Secondary buyers selected after the featured buyer
    pub max_secondary_buyers: u32,
    /// Feed prior runs for the same domain into the strategy analyst
    pub enable_prior_run_dedup: bool,
    /// Prior runs loaded per domain
    pub prior_run_limit: u32,
    /// Page size for opportunity searches (s3a/s3b)
    pub opportunity_page_size: u32,
    /// Page size for buyer searches (s3c/s3d)
    pub buyer_search_page_size: u32,
    /// Contacts fetched for the featured buyer
    pub featured_contact_page_size: u32,
    /// Contacts fetched per secondary buyer
    pub secondary_contact_page_size: u32,
    /// Poll interval for the async buyer chat endpoint
    pub chat_poll_interval_secs: u64,
    /// Maximum wall time the buyer chat poll loop may wait
    pub chat_max_wait_secs: u64,
    /// Generator text-mode subprocess deadline
    pub llm_text_timeout_secs: u64,
    /// Generator tool-mode subprocess deadline
    pub llm_tool_timeout_secs: u64,
    /// Budget for deterministic steps (parse, rank, persist, templates)
    pub timeout_fast_step_secs: u64,
    /// Budget for each discovery branch (s3a..s3d)
    pub timeout_discovery_secs: u64,
    /// Budget for secondary-buyer enrichment (s7)
    pub timeout_secondary_intel_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 3,
            max_secondary_buyers: 4,
            enable_prior_run_dedup: true,
            prior_run_limit: 5,
            opportunity_page_size: 40,
            buyer_search_page_size: 25,
            featured_contact_page_size: 50,
            secondary_contact_page_size: 20,
            chat_poll_interval_secs: 3,
            chat_max_wait_secs: 300,
            llm_text_timeout_secs: 300,
            llm_tool_timeout_secs: 300,
            timeout_fast_step_secs: 20,
            timeout_discovery_secs: 30,
            timeout_secondary_intel_secs: 60,
        }
    }
}

impl PipelineConfig {
    /// Step budget for the strategy/section writer steps: the inner
    /// subprocess deadline plus headroom so the Generator's own timeout
    /// fires first and reports the better message.
    pub fn llm_step_timeout_secs(&self) -> u64 {
        self.llm_text_timeout_secs + 30
    }

    /// Step budget for featured intel: dominated by the chat poll loop.
    pub fn featured_intel_timeout_secs(&self) -> u64 {
        self.chat_max_wait_secs + 30
    }

    /// Step budget for assemble-and-publish: two tool-mode attempts.
    pub fn assemble_timeout_secs(&self) -> u64 {
        self.llm_tool_timeout_secs * 2 + 30
    }

    /// Step budget for validation: consistency check plus one fixer pass.
    pub fn validate_timeout_secs(&self) -> u64 {
        self.llm_text_timeout_secs * 2 + 60
    }
}

// ============================================================================
// Key metadata
// ============================================================================

/// Declared type of a tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Bool,
}

/// Catalog entry for one tunable: enough for a config UI to render and
/// validate edits without knowing the struct.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigEntry {
    pub key: &'static str,
    pub category: &'static str,
    pub value_type: ValueType,
    pub description: &'static str,
    pub unit: Option<&'static str>,
}

/// Static metadata for every tunable in [`PipelineConfig`].
pub fn metadata() -> &'static [ConfigEntry] {
    const ENTRIES: &[ConfigEntry] = &[
        ConfigEntry {
            key: "max_concurrent_runs",
            category: "concurrency",
            value_type: ValueType::Int,
            description: "Concurrent runs admitted into heavy work",
            unit: None,
        },
        ConfigEntry {
            key: "max_secondary_buyers",
            category: "selection",
            value_type: ValueType::Int,
            description: "Secondary buyers selected after the featured buyer",
            unit: None,
        },
        ConfigEntry {
            key: "enable_prior_run_dedup",
            category: "strategy",
            value_type: ValueType::Bool,
            description: "Feed prior runs for the same domain into the strategy analyst",
            unit: None,
        },
        ConfigEntry {
            key: "prior_run_limit",
            category: "strategy",
            value_type: ValueType::Int,
            description: "Prior runs loaded per domain",
            unit: None,
        },
        ConfigEntry {
            key: "opportunity_page_size",
            category: "discovery",
            value_type: ValueType::Int,
            description: "Page size for opportunity searches",
            unit: None,
        },
        ConfigEntry {
            key: "buyer_search_page_size",
            category: "discovery",
            value_type: ValueType::Int,
            description: "Page size for buyer searches",
            unit: None,
        },
        ConfigEntry {
            key: "featured_contact_page_size",
            category: "enrichment",
            value_type: ValueType::Int,
            description: "Contacts fetched for the featured buyer",
            unit: None,
        },
        ConfigEntry {
            key: "secondary_contact_page_size",
            category: "enrichment",
            value_type: ValueType::Int,
            description: "Contacts fetched per secondary buyer",
            unit: None,
        },
        ConfigEntry {
            key: "chat_poll_interval_secs",
            category: "signals",
            value_type: ValueType::Int,
            description: "Poll interval for the async buyer chat endpoint",
            unit: Some("seconds"),
        },
        ConfigEntry {
            key: "chat_max_wait_secs",
            category: "signals",
            value_type: ValueType::Int,
            description: "Maximum wall time the buyer chat poll loop may wait",
            unit: Some("seconds"),
        },
        ConfigEntry {
            key: "llm_text_timeout_secs",
            category: "generator",
            value_type: ValueType::Int,
            description: "Generator text-mode subprocess deadline",
            unit: Some("seconds"),
        },
        ConfigEntry {
            key: "llm_tool_timeout_secs",
            category: "generator",
            value_type: ValueType::Int,
            description: "Generator tool-mode subprocess deadline",
            unit: Some("seconds"),
        },
        ConfigEntry {
            key: "timeout_fast_step_secs",
            category: "timeouts",
            value_type: ValueType::Int,
            description: "Budget for deterministic steps",
            unit: Some("seconds"),
        },
        ConfigEntry {
            key: "timeout_discovery_secs",
            category: "timeouts",
            value_type: ValueType::Int,
            description: "Budget for each discovery branch",
            unit: Some("seconds"),
        },
        ConfigEntry {
            key: "timeout_secondary_intel_secs",
            category: "timeouts",
            value_type: ValueType::Int,
            description: "Budget for secondary-buyer enrichment",
            unit: Some("seconds"),
        },
    ];
    ENTRIES
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("config key {key} expects {expected}")]
    InvalidType {
        key: String,
        expected: &'static str,
    },
}

/// Process-wide registry. Holds the live config behind a lock plus the
/// factory copy captured at construction for `reset`.
pub struct ConfigRegistry {
    current: RwLock<PipelineConfig>,
    factory: PipelineConfig,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl ConfigRegistry {
    pub fn new(initial: PipelineConfig) -> Self {
        Self {
            current: RwLock::new(initial.clone()),
            factory: initial,
        }
    }

    /// Immutable copy for one run. Taken once at admission.
    pub async fn snapshot(&self) -> PipelineConfig {
        self.current.read().await.clone()
    }

    /// Restore the factory snapshot captured at construction.
    pub async fn reset(&self) {
        *self.current.write().await = self.factory.clone();
    }

    pub async fn get_value(&self, key: &str) -> Result<Value, ConfigError> {
        let config = self.current.read().await;
        get_field(&config, key)
    }

    /// All current values as one JSON object, keyed per the metadata table.
    pub async fn values(&self) -> Value {
        let config = self.current.read().await;
        let mut map = Map::new();
        for entry in metadata() {
            if let Ok(value) = get_field(&config, entry.key) {
                map.insert(entry.key.to_string(), value);
            }
        }
        Value::Object(map)
    }

    /// Typed runtime mutation. Affects only subsequently admitted runs.
    pub async fn set_value(&self, key: &str, value: &Value) -> Result<(), ConfigError> {
        let mut config = self.current.write().await;
        set_field(&mut config, key, value)
    }
}

fn get_field(config: &PipelineConfig, key: &str) -> Result<Value, ConfigError> {
    let value = match key {
        "max_concurrent_runs" => json!(config.max_concurrent_runs),
        "max_secondary_buyers" => json!(config.max_secondary_buyers),
        "enable_prior_run_dedup" => json!(config.enable_prior_run_dedup),
        "prior_run_limit" => json!(config.prior_run_limit),
        "opportunity_page_size" => json!(config.opportunity_page_size),
        "buyer_search_page_size" => json!(config.buyer_search_page_size),
        "featured_contact_page_size" => json!(config.featured_contact_page_size),
        "secondary_contact_page_size" => json!(config.secondary_contact_page_size),
        "chat_poll_interval_secs" => json!(config.chat_poll_interval_secs),
        "chat_max_wait_secs" => json!(config.chat_max_wait_secs),
        "llm_text_timeout_secs" => json!(config.llm_text_timeout_secs),
        "llm_tool_timeout_secs" => json!(config.llm_tool_timeout_secs),
        "timeout_fast_step_secs" => json!(config.timeout_fast_step_secs),
        "timeout_discovery_secs" => json!(config.timeout_discovery_secs),
        "timeout_secondary_intel_secs" => json!(config.timeout_secondary_intel_secs),
        other => return Err(ConfigError::UnknownKey(other.to_string())),
    };
    Ok(value)
}

fn set_field(config: &mut PipelineConfig, key: &str, value: &Value) -> Result<(), ConfigError> {
    fn as_u32(key: &str, value: &Value) -> Result<u32, ConfigError> {
        value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(ConfigError::InvalidType {
                key: key.to_string(),
                expected: "a non-negative integer",
            })
    }
    fn as_u64(key: &str, value: &Value) -> Result<u64, ConfigError> {
        value.as_u64().ok_or(ConfigError::InvalidType {
            key: key.to_string(),
            expected: "a non-negative integer",
        })
    }
    fn as_bool(key: &str, value: &Value) -> Result<bool, ConfigError> {
        value.as_bool().ok_or(ConfigError::InvalidType {
            key: key.to_string(),
            expected: "a boolean",
        })
    }

    match key {
        "max_concurrent_runs" => config.max_concurrent_runs = as_u32(key, value)?.max(1),
        "max_secondary_buyers" => config.max_secondary_buyers = as_u32(key, value)?,
        "enable_prior_run_dedup" => config.enable_prior_run_dedup = as_bool(key, value)?,
        "prior_run_limit" => config.prior_run_limit = as_u32(key, value)?,
        "opportunity_page_size" => config.opportunity_page_size = as_u32(key, value)?.max(1),
        "buyer_search_page_size" => config.buyer_search_page_size = as_u32(key, value)?.max(1),
        "featured_contact_page_size" => {
            config.featured_contact_page_size = as_u32(key, value)?.max(1)
        }
        "secondary_contact_page_size" => {
            config.secondary_contact_page_size = as_u32(key, value)?.max(1)
        }
        "chat_poll_interval_secs" => config.chat_poll_interval_secs = as_u64(key, value)?.max(1),
        "chat_max_wait_secs" => config.chat_max_wait_secs = as_u64(key, value)?.max(1),
        "llm_text_timeout_secs" => config.llm_text_timeout_secs = as_u64(key, value)?.max(1),
        "llm_tool_timeout_secs" => config.llm_tool_timeout_secs = as_u64(key, value)?.max(1),
        "timeout_fast_step_secs" => config.timeout_fast_step_secs = as_u64(key, value)?.max(1),
        "timeout_discovery_secs" => config.timeout_discovery_secs = as_u64(key, value)?.max(1),
        "timeout_secondary_intel_secs" => {
            config.timeout_secondary_intel_secs = as_u64(key, value)?.max(1)
        }
        other => return Err(ConfigError::UnknownKey(other.to_string())),
    }
    Ok(())
}
