//! Step framework: the trait every pipeline step implements, the shared
//! execution context, and the timer/audit decorator that wraps each run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use brief_config::PipelineConfig;
use brief_generator::Generator;
use brief_publisher::Publisher;
use brief_signals::SignalsApi;
use brief_store::Store;
use brief_types::{AuditStatus, Blackboard, Webhook};

use crate::engine::{Clients, PublishTarget};
use crate::error::{PipelineError, PipelineResult};

/// Strings above this size are truncated in audit metadata.
const METADATA_STRING_MAX: usize = 10 * 1024;
/// Lists above this length are sampled in audit metadata.
const METADATA_LIST_SAMPLE: usize = 10;

// ============================================================================
// Context
// ============================================================================

/// Everything a step may read. Steps are pure functions of this context:
/// they perform I/O through the clients but mutate shared state only via
/// the store and their returned delta.
pub struct StepContext {
    pub run_id: i64,
    pub webhook: Webhook,
    pub config: PipelineConfig,
    /// Immutable view of the blackboard as of this step's start.
    pub board: Blackboard,
    pub store: Store,
    pub signals: Arc<dyn SignalsApi>,
    pub generator: Arc<dyn Generator>,
    pub publisher: Arc<dyn Publisher>,
    pub publish: PublishTarget,
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new(
        run_id: i64,
        webhook: Webhook,
        config: PipelineConfig,
        board: Blackboard,
        store: Store,
        clients: &Clients,
        publish: PublishTarget,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            webhook,
            config,
            board,
            store,
            signals: clients.signals.clone(),
            generator: clients.generator.clone(),
            publisher: clients.publisher.clone(),
            publish,
            cancel,
        }
    }
}

// ============================================================================
// Step trait
// ============================================================================

/// Result of a step body: the blackboard delta plus the audit status the
/// entry should carry. Skipped branches and validator warnings override
/// the default `success`.
pub struct StepOutput {
    pub delta: Blackboard,
    pub status: AuditStatus,
    pub message: Option<String>,
}

impl StepOutput {
    pub fn delta(delta: Blackboard) -> Self {
        Self {
            delta,
            status: AuditStatus::Success,
            message: None,
        }
    }

    pub fn skipped(delta: Blackboard, message: impl Into<String>) -> Self {
        Self {
            delta,
            status: AuditStatus::Skipped,
            message: Some(message.into()),
        }
    }

    pub fn warning(delta: Blackboard, message: impl Into<String>) -> Self {
        Self {
            delta,
            status: AuditStatus::Warning,
            message: Some(message.into()),
        }
    }
}

/// One node in the phase graph.
#[async_trait]
pub trait Step: Send + Sync {
    /// Label used in logs and the audit trail, e.g. `s3a_primary_search`.
    fn name(&self) -> &'static str;

    fn timeout_secs(&self, config: &PipelineConfig) -> u64;

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput>;
}

// ============================================================================
// Executor
// ============================================================================

/// Run one step under the framework contract: cancellation check, step
/// timeout, audit entry with duration and summarized delta metadata.
/// Returns the delta for the orchestrator to merge.
pub async fn execute_step(step: &dyn Step, ctx: &StepContext) -> PipelineResult<Blackboard> {
    let started = tokio::time::Instant::now();

    if ctx.cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let budget = Duration::from_secs(step.timeout_secs(&ctx.config));
    let result = tokio::time::timeout(budget, async {
        tokio::select! {
            output = step.run(ctx) => output,
            _ = ctx.cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    })
    .await;

    let duration = started.elapsed().as_secs_f64();

    match result {
        Ok(Ok(output)) => {
            ctx.store.log_step(
                ctx.run_id,
                step.name(),
                output.status,
                output.message.as_deref(),
                Some(duration),
                Some(&summarize_delta(&output.delta)),
            );
            tracing::info!(
                step = step.name(),
                status = output.status.as_str(),
                duration_seconds = duration,
                "step finished"
            );
            Ok(output.delta)
        }
        Ok(Err(PipelineError::Cancelled)) => {
            // The cancel path writes its own audit entry once.
            Err(PipelineError::Cancelled)
        }
        Ok(Err(error)) => {
            let status = if error.is_timeout() {
                AuditStatus::Timeout
            } else {
                AuditStatus::Failure
            };
            ctx.store.log_step(
                ctx.run_id,
                step.name(),
                status,
                Some(&error.to_string()),
                Some(duration),
                None,
            );
            tracing::error!(step = step.name(), error = %error, "step failed");
            Err(error)
        }
        Err(_elapsed) => {
            let message = format!(
                "step {} exceeded its {}s budget",
                step.name(),
                budget.as_secs()
            );
            ctx.store.log_step(
                ctx.run_id,
                step.name(),
                AuditStatus::Timeout,
                Some(&message),
                Some(duration),
                None,
            );
            tracing::error!(step = step.name(), budget_secs = budget.as_secs(), "step timed out");
            Err(PipelineError::Timeout(message))
        }
    }
}

// ============================================================================
// Audit metadata summarization
// ============================================================================

/// Summarize a step delta for the audit log. This is an observable
/// contract the monitor depends on: long strings are truncated with a
/// visible length marker, long lists are reduced to a sample plus count.
pub fn summarize_delta(delta: &Blackboard) -> Value {
    let raw = serde_json::to_value(delta).unwrap_or(Value::Null);
    let mut out = Map::new();
    if let Value::Object(map) = raw {
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            out.insert(key, summarize_value(value));
        }
    }
    Value::Object(out)
}

fn summarize_value(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let len = s.chars().count();
            if len > METADATA_STRING_MAX {
                let truncated: String = s.chars().take(METADATA_STRING_MAX).collect();
                Value::String(format!("{truncated}…[truncated, len={len}]"))
            } else {
                Value::String(s)
            }
        }
        Value::Array(items) => {
            let count = items.len();
            if count > METADATA_LIST_SAMPLE {
                let sample: Vec<Value> = items
                    .into_iter()
                    .take(METADATA_LIST_SAMPLE)
                    .map(summarize_value)
                    .collect();
                json!({ "sample": sample, "count": count })
            } else {
                Value::Array(items.into_iter().map(summarize_value).collect())
            }
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, summarize_value(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_strings_carry_a_visible_length_marker() {
        let long = "a".repeat(METADATA_STRING_MAX + 5);
        let summarized = summarize_value(Value::String(long));
        let text = summarized.as_str().unwrap();
        assert!(text.ends_with(&format!("…[truncated, len={}]", METADATA_STRING_MAX + 5)));
    }

    #[test]
    fn long_lists_are_sampled_with_a_count() {
        let items: Vec<Value> = (0..25).map(|i| json!({ "i": i })).collect();
        let summarized = summarize_value(Value::Array(items));
        assert_eq!(summarized["count"], 25);
        assert_eq!(summarized["sample"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn short_values_pass_through() {
        let value = json!({ "keywords": ["a", "b"], "note": "short" });
        assert_eq!(summarize_value(value.clone()), value);
    }

    #[test]
    fn delta_summary_skips_unproduced_keys() {
        let delta = Blackboard {
            featured_buyer_name: Some("B1".to_string()),
            ..Blackboard::default()
        };
        let summary = summarize_delta(&delta);
        let object = summary.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(object["featured_buyer_name"], "B1");
    }
}
