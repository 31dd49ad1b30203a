//! Orchestrator: drives one run through the phase graph.
//!
//! Phases execute in declared order; within a phase, branches fan out
//! onto worker tasks and fan in at a barrier. The orchestrator owns the
//! blackboard; branches run against immutable clones and return
//! accumulated deltas. Cancellation is checked between phases and
//! sequential steps and is woven into every step execution.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use brief_config::PipelineConfig;
use brief_generator::Generator;
use brief_publisher::Publisher;
use brief_signals::SignalsApi;
use brief_store::Store;
use brief_types::{AuditStatus, Blackboard, ValidationReport, Webhook};

use crate::error::{PipelineError, PipelineResult};
use crate::step::{execute_step, Step, StepContext};
use crate::steps;

/// External collaborators the steps call. Trait objects so tests can
/// substitute scripted implementations.
#[derive(Clone)]
pub struct Clients {
    pub signals: Arc<dyn SignalsApi>,
    pub generator: Arc<dyn Generator>,
    pub publisher: Arc<dyn Publisher>,
}

/// Where reports land: the workspace parent page plus the tool surface
/// the assembler sub-agent is allowed to call.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub parent_page_id: String,
    pub tool_server_name: String,
    pub tool_server_url: String,
    pub tool_api_key: String,
    /// Exact alias of the page-create tool as the workspace adapter
    /// exposes it; the assembler prompt quotes it verbatim.
    pub create_tool_alias: String,
}

impl Default for PublishTarget {
    fn default() -> Self {
        Self {
            parent_page_id: String::new(),
            tool_server_name: "workspace".to_string(),
            tool_server_url: String::new(),
            tool_api_key: String::new(),
            create_tool_alias: "workspace__pages_create".to_string(),
        }
    }
}

// ============================================================================
// Outcome payloads
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub profile_available: bool,
    pub contacts_count: usize,
    pub opportunities_count: usize,
    pub ai_chat_available: bool,
    pub secondary_buyers: usize,
    pub total_signals_scanned: usize,
    pub validation: Option<ValidationReport>,
    pub generation_timestamp: String,
    pub total_duration_seconds: f64,
}

/// What one pipeline execution produced. Serialized as the API response
/// body with a `status` discriminator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Success {
        run_id: i64,
        buyer_id: Option<String>,
        buyer_name: Option<String>,
        report_url: Option<String>,
        report_markdown: Option<String>,
        metadata: ResponseMetadata,
    },
    Error {
        run_id: Option<i64>,
        error: String,
        produced_keys: Vec<String>,
        elapsed_seconds: f64,
    },
    Cancelled {
        run_id: Option<i64>,
        elapsed_seconds: f64,
    },
}

impl PipelineOutcome {
    pub fn status_label(&self) -> &'static str {
        match self {
            PipelineOutcome::Success { .. } => "success",
            PipelineOutcome::Error { .. } => "error",
            PipelineOutcome::Cancelled { .. } => "cancelled",
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// One orchestrator drives one run. Clone is cheap; all heavy state sits
/// behind Arcs so branch tasks can carry the engine into spawned work.
#[derive(Clone)]
pub struct Orchestrator {
    webhook: Webhook,
    config: PipelineConfig,
    store: Store,
    clients: Clients,
    publish: PublishTarget,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        webhook: Webhook,
        config: PipelineConfig,
        store: Store,
        clients: Clients,
        publish: PublishTarget,
    ) -> Self {
        Self {
            webhook,
            config,
            store,
            clients,
            publish,
            cancel: CancellationToken::new(),
        }
    }

    /// Token shared with every step and the Generator; firing it kills
    /// in-flight subprocesses and aborts outstanding branches.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn ctx(&self, run_id: i64, board: &Blackboard) -> StepContext {
        StepContext::new(
            run_id,
            self.webhook.clone(),
            self.config.clone(),
            board.clone(),
            self.store.clone(),
            &self.clients,
            self.publish.clone(),
            self.cancel.clone(),
        )
    }

    /// Execute the full graph. Never returns `Err`: failures and
    /// cancellations are folded into the outcome payload after the
    /// corresponding persistence path has run.
    pub async fn execute(&self, pre_assigned: Option<i64>) -> PipelineOutcome {
        let started = tokio::time::Instant::now();

        // A run row must exist before the first audit entry. The admission
        // controller pre-assigns ids; direct library calls get their stub
        // here as part of validate-and-load's contract.
        let run_id = match pre_assigned {
            Some(id) => id,
            None => {
                if let Err(error) = self.store.init() {
                    return PipelineOutcome::Error {
                        run_id: None,
                        error: error.to_string(),
                        produced_keys: Vec::new(),
                        elapsed_seconds: round1(started.elapsed().as_secs_f64()),
                    };
                }
                match self.store.insert_run_stub(&self.webhook, None) {
                    Ok(id) => {
                        let _ = self.store.mark_run_processing(id);
                        id
                    }
                    Err(error) => {
                        return PipelineOutcome::Error {
                            run_id: None,
                            error: error.to_string(),
                            produced_keys: Vec::new(),
                            elapsed_seconds: round1(started.elapsed().as_secs_f64()),
                        }
                    }
                }
            }
        };

        tracing::info!(run_id, "pipeline start");
        let mut board = Blackboard::default();

        match self.drive(run_id, &mut board).await {
            Ok(()) => {
                let elapsed = round1(started.elapsed().as_secs_f64());
                tracing::info!(run_id, elapsed_seconds = elapsed, "pipeline complete");
                self.success_outcome(run_id, &board, elapsed)
            }
            Err(PipelineError::Cancelled) => {
                let elapsed = round1(started.elapsed().as_secs_f64());
                if let Err(error) = self.store.update_run_cancelled(run_id) {
                    tracing::error!(run_id, error = %error, "failed to persist cancellation");
                }
                self.store.log_step(
                    run_id,
                    "pipeline_cancelled",
                    AuditStatus::Warning,
                    Some(&format!("pipeline cancelled after {elapsed:.1}s")),
                    Some(elapsed),
                    None,
                );
                tracing::warn!(run_id, elapsed_seconds = elapsed, "pipeline cancelled");
                PipelineOutcome::Cancelled {
                    run_id: Some(run_id),
                    elapsed_seconds: elapsed,
                }
            }
            Err(error) => {
                let elapsed = round1(started.elapsed().as_secs_f64());
                if let Err(persist_error) = self.store.update_run_failed(run_id, &board) {
                    tracing::error!(run_id, error = %persist_error, "failed to persist failure state");
                }
                let status = if error.is_timeout() {
                    AuditStatus::Timeout
                } else {
                    AuditStatus::Failure
                };
                self.store.log_step(
                    run_id,
                    "pipeline_failed",
                    status,
                    Some(&error.to_string()),
                    Some(elapsed),
                    None,
                );
                tracing::error!(run_id, error = %error, "pipeline failed");
                PipelineOutcome::Error {
                    run_id: Some(run_id),
                    error: error.to_string(),
                    produced_keys: board
                        .produced_keys()
                        .into_iter()
                        .map(|k| k.to_string())
                        .collect(),
                    elapsed_seconds: elapsed,
                }
            }
        }
    }

    async fn drive(&self, run_id: i64, board: &mut Blackboard) -> PipelineResult<()> {
        // Phase I-III: sequential.
        self.run_sequential(run_id, board, &steps::ParseWebhook).await?;
        self.run_sequential(run_id, board, &steps::ValidateAndLoad).await?;
        self.run_sequential(run_id, board, &steps::SearchStrategyStep).await?;

        // Phase IV: discovery fan-out, four independent branches.
        self.run_branches(
            run_id,
            board,
            vec![
                vec![Box::new(steps::PrimarySearch)],
                vec![Box::new(steps::AlternateSearch)],
                vec![Box::new(steps::BuyerTypeSearch)],
                vec![Box::new(steps::GeoSearch)],
            ],
        )
        .await?;

        // Phase V: sequential selection and persistence.
        self.run_sequential(run_id, board, &steps::RankAndSelect).await?;
        self.run_sequential(run_id, board, &steps::PersistDiscovery).await?;

        // Phase VI: enrich and generate, four branches with internal
        // sequencing (s6→s9, s7→s10).
        self.run_branches(
            run_id,
            board,
            vec![
                vec![Box::new(steps::ExecSummary)],
                vec![Box::new(steps::FeaturedIntel), Box::new(steps::FeaturedSection)],
                vec![Box::new(steps::SecondaryIntel), Box::new(steps::SecondaryCards)],
                vec![Box::new(steps::Cta)],
            ],
        )
        .await?;

        // Phase VII: assemble, validate, save.
        self.run_sequential(run_id, board, &steps::AssemblePublish).await?;
        self.run_sequential(run_id, board, &steps::Validate).await?;
        self.run_sequential(run_id, board, &steps::SaveAndRespond).await?;

        Ok(())
    }

    async fn run_sequential(
        &self,
        run_id: i64,
        board: &mut Blackboard,
        step: &dyn Step,
    ) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let ctx = self.ctx(run_id, board);
        let delta = execute_step(step, &ctx).await?;
        board.merge(delta);
        Ok(())
    }

    /// Fan out over branches, fan in at the barrier. Each branch runs its
    /// steps in order against a local board clone and returns the
    /// accumulated delta; deltas land on the shared board as branches
    /// complete (key sets are disjoint, so order does not matter).
    async fn run_branches(
        &self,
        run_id: i64,
        board: &mut Blackboard,
        branches: Vec<Vec<Box<dyn Step>>>,
    ) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut join_set: JoinSet<PipelineResult<Blackboard>> = JoinSet::new();
        for branch in branches {
            let engine = self.clone();
            let base = board.clone();
            join_set.spawn(async move {
                let mut local = base;
                let mut accumulated = Blackboard::default();
                for step in branch {
                    let ctx = engine.ctx(run_id, &local);
                    let delta = execute_step(step.as_ref(), &ctx).await?;
                    local.merge(delta.clone());
                    accumulated.merge(delta);
                }
                Ok(accumulated)
            });
        }

        let mut first_error: Option<PipelineError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(delta)) => board.merge(delta),
                Ok(Err(PipelineError::Cancelled)) => {
                    // Abandon outstanding work without waiting.
                    join_set.abort_all();
                    return Err(PipelineError::Cancelled);
                }
                Ok(Err(error)) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error =
                            Some(PipelineError::External(format!("branch task died: {join_error}")));
                    }
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn success_outcome(&self, run_id: i64, board: &Blackboard, elapsed: f64) -> PipelineOutcome {
        let metadata = ResponseMetadata {
            profile_available: board
                .feat_profile
                .as_ref()
                .map(|p| !p.is_null())
                .unwrap_or(false),
            contacts_count: board.feat_contacts.as_ref().map(Vec::len).unwrap_or(0),
            opportunities_count: board
                .feat_opportunities
                .as_ref()
                .map(Vec::len)
                .unwrap_or(0),
            ai_chat_available: board
                .feat_ai_context
                .as_ref()
                .map(|c| !c.is_empty())
                .unwrap_or(false),
            secondary_buyers: board.secondary_buyers.as_ref().map(Vec::len).unwrap_or(0),
            total_signals_scanned: board.all_opportunities().len(),
            validation: board.validation_result.clone(),
            generation_timestamp: chrono::Utc::now().to_rfc3339(),
            total_duration_seconds: elapsed,
        };

        PipelineOutcome::Success {
            run_id,
            buyer_id: board.featured_buyer_id.clone(),
            buyer_name: board.featured_buyer_name.clone(),
            report_url: board.notion_url.clone(),
            report_markdown: board.report_markdown.clone(),
            metadata,
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Convenience for the status endpoint: decode the JSON columns of a full
/// run row in place.
pub fn decode_run_json_columns(row: Value) -> Value {
    let Value::Object(mut map) = row else {
        return row;
    };
    for key in [
        "search_strategy",
        "discovery_signals_a",
        "discovery_signals_b",
        "discovery_buyers",
        "secondary_buyers",
        "feat_profile",
        "feat_contacts",
        "feat_opportunities",
        "sec_profiles",
        "sec_contacts",
        "validation_result",
    ] {
        if let Some(Value::String(raw)) = map.get(key) {
            if let Ok(decoded) = serde_json::from_str::<Value>(raw) {
                map.insert(key.to_string(), decoded);
            }
        }
    }
    Value::Object(map)
}
