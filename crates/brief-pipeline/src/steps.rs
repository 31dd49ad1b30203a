//! The pipeline's step implementations, s0 through s14.
//!
//! Steps read their inputs from the context's blackboard view and return
//! deltas; the orchestrator owns the merge. Branch steps (s3x, s6..s11)
//! run under the fan-out in [`crate::engine`].

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use brief_config::PipelineConfig;
use brief_generator::{extract_json, ToolAccess};
use brief_publisher::PagePatch;
use brief_types::{AuditStatus, Blackboard, SearchStrategy, ValidationReport};

use crate::error::{PipelineError, PipelineResult};
use crate::prompts::{parse_assembler_output, AgentPrompts};
use crate::score;
use crate::sections;
use crate::step::{Step, StepContext, StepOutput};
use crate::validate;

fn require_strategy(ctx: &StepContext) -> PipelineResult<&SearchStrategy> {
    ctx.board
        .search_strategy
        .as_ref()
        .ok_or_else(|| PipelineError::Validation("search strategy not produced".to_string()))
}

fn require_featured(ctx: &StepContext) -> PipelineResult<(String, String)> {
    let id = ctx
        .board
        .featured_buyer_id
        .clone()
        .ok_or_else(|| PipelineError::Validation("featured buyer not selected".to_string()))?;
    let name = ctx
        .board
        .featured_buyer_name
        .clone()
        .unwrap_or_else(|| "Unknown".to_string());
    Ok((id, name))
}

fn signal_buyer_id(signal: &Value) -> Option<&str> {
    signal
        .get("buyerId")
        .or_else(|| signal.get("buyer_id"))
        .and_then(Value::as_str)
}

// ============================================================================
// Phase I-III
// ============================================================================

/// s0 validate the webhook and open the run.
pub struct ParseWebhook;

#[async_trait]
impl Step for ParseWebhook {
    fn name(&self) -> &'static str {
        "s0_parse_webhook"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_fast_step_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        ctx.webhook.validate()?;
        tracing::info!(
            target_company = %ctx.webhook.target_company,
            target_domain = %ctx.webhook.target_domain,
            "webhook accepted"
        );
        let mut output = StepOutput::delta(Blackboard::default());
        output.message = Some(format!(
            "{} ({})",
            ctx.webhook.display_name(),
            ctx.webhook.target_domain
        ));
        Ok(output)
    }
}

/// s1 validate field formats and load prior runs for deduplication.
pub struct ValidateAndLoad;

#[async_trait]
impl Step for ValidateAndLoad {
    fn name(&self) -> &'static str {
        "s1_validate_and_load"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_fast_step_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let domain = ctx.webhook.target_domain.trim();
        if !domain.is_empty() {
            if let Ok(re) = regex::Regex::new(r"^[\w.-]+\.\w{2,}$") {
                if !re.is_match(domain) {
                    tracing::warn!(domain, "domain format suspect");
                }
            }
        }

        ctx.store.init()?;

        let prior_runs = if ctx.config.enable_prior_run_dedup && !domain.is_empty() {
            ctx.store
                .load_prior_runs(domain, ctx.config.prior_run_limit)?
        } else {
            Vec::new()
        };

        let mut output = StepOutput::delta(Blackboard {
            prior_runs: Some(prior_runs.clone()),
            ..Blackboard::default()
        });
        output.message = Some(format!("prior runs: {}", prior_runs.len()));
        Ok(output)
    }
}

/// s2 strategy analyst: vendor/product → segments, keywords, types.
pub struct SearchStrategyStep;

#[async_trait]
impl Step for SearchStrategyStep {
    fn name(&self) -> &'static str {
        "s2_search_strategy"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.llm_step_timeout_secs()
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let prior = ctx.board.prior_runs.clone().unwrap_or_default();
        let (system, content) = AgentPrompts::search_strategy(&ctx.webhook, &prior);

        let raw = ctx
            .generator
            .generate(&system, &content, &ctx.cancel)
            .await?;

        let mut strategy: SearchStrategy =
            serde_json::from_value(Value::Object(extract_json(&raw))).unwrap_or_default();

        let fallback = if ctx.webhook.campaign_signal.trim().is_empty() {
            ctx.webhook.display_name().to_string()
        } else {
            ctx.webhook.campaign_signal.clone()
        };
        strategy.apply_defaults(&fallback, &ctx.webhook.product_description);

        tracing::info!(
            primary = ?strategy.primary_keywords,
            buyer_types = ?strategy.buyer_types,
            "search strategy ready"
        );

        let mut output = StepOutput::delta(Blackboard {
            search_strategy: Some(strategy),
            ..Blackboard::default()
        });
        output.message = Some("strategy generated".to_string());
        Ok(output)
    }
}

// ============================================================================
// Phase IV: discovery fan-out
// ============================================================================

/// s3a opportunity search with primary + meeting keywords.
pub struct PrimarySearch;

#[async_trait]
impl Step for PrimarySearch {
    fn name(&self) -> &'static str {
        "s3a_primary_search"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_discovery_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let strategy = require_strategy(ctx)?;
        let keywords: Vec<String> = strategy
            .primary_keywords
            .iter()
            .chain(strategy.meeting_keywords.iter())
            .cloned()
            .collect();
        let query = keywords.join(" ");

        let results = ctx
            .signals
            .opportunity_search(
                &query,
                &strategy.opportunity_types,
                ctx.config.opportunity_page_size,
            )
            .await?;

        let mut output = StepOutput::delta(Blackboard {
            discovery_signals_a: Some(results.clone()),
            ..Blackboard::default()
        });
        output.message = Some(format!("{} results", results.len()));
        Ok(output)
    }
}

/// s3b opportunity search with alternate + rfp keywords; skips with no
/// provider call when both lists are empty.
pub struct AlternateSearch;

#[async_trait]
impl Step for AlternateSearch {
    fn name(&self) -> &'static str {
        "s3b_alternate_search"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_discovery_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let strategy = require_strategy(ctx)?;
        let keywords: Vec<String> = strategy
            .alternate_keywords
            .iter()
            .chain(strategy.rfp_keywords.iter())
            .filter(|k| !k.trim().is_empty())
            .cloned()
            .collect();

        let delta_empty = Blackboard {
            discovery_signals_b: Some(Vec::new()),
            ..Blackboard::default()
        };
        if keywords.is_empty() {
            return Ok(StepOutput::skipped(delta_empty, "no alternate keywords"));
        }

        let results = ctx
            .signals
            .opportunity_search(
                &keywords.join(" "),
                &strategy.opportunity_types,
                ctx.config.opportunity_page_size,
            )
            .await?;

        let mut output = StepOutput::delta(Blackboard {
            discovery_signals_b: Some(results.clone()),
            ..Blackboard::default()
        });
        output.message = Some(format!("{} results", results.len()));
        Ok(output)
    }
}

/// s3c buyer search by type filter; skips when the strategy named no
/// buyer types.
pub struct BuyerTypeSearch;

#[async_trait]
impl Step for BuyerTypeSearch {
    fn name(&self) -> &'static str {
        "s3c_buyer_type_search"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_discovery_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let strategy = require_strategy(ctx)?;

        if strategy.buyer_types.is_empty() {
            return Ok(StepOutput::skipped(
                Blackboard {
                    discovery_buyers: Some(Vec::new()),
                    ..Blackboard::default()
                },
                "no buyer types",
            ));
        }

        // Only the first keyword token: long queries return nothing on the
        // name-contains filter.
        let query = strategy
            .primary_keywords
            .first()
            .and_then(|kw| kw.split_whitespace().next())
            .map(|w| w.to_string());

        let results = ctx
            .signals
            .buyer_search(
                query.as_deref(),
                &strategy.buyer_types,
                &[],
                ctx.config.buyer_search_page_size,
            )
            .await?;

        let mut output = StepOutput::delta(Blackboard {
            discovery_buyers: Some(results.clone()),
            ..Blackboard::default()
        });
        output.message = Some(format!("{} buyers", results.len()));
        Ok(output)
    }
}

/// s3d buyer search by geography; hints normalize to two-letter state
/// codes, unknown names drop silently, and an empty result set skips.
pub struct GeoSearch;

#[async_trait]
impl Step for GeoSearch {
    fn name(&self) -> &'static str {
        "s3d_geo_search"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_discovery_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let strategy = require_strategy(ctx)?;
        let states = score::normalize_states(&strategy.geographic_hints);

        if states.is_empty() {
            return Ok(StepOutput::skipped(
                Blackboard {
                    discovery_buyers_geo: Some(Vec::new()),
                    ..Blackboard::default()
                },
                "no resolvable geographic hints",
            ));
        }

        let results = ctx
            .signals
            .buyer_search(None, &[], &states, ctx.config.buyer_search_page_size)
            .await?;

        let mut output = StepOutput::delta(Blackboard {
            discovery_buyers_geo: Some(results.clone()),
            ..Blackboard::default()
        });
        output.message = Some(format!("{} buyers in {}", results.len(), states.join(",")));
        Ok(output)
    }
}

// ============================================================================
// Phase V: selection
// ============================================================================

/// s4 deterministic scoring and featured/secondary selection.
pub struct RankAndSelect;

#[async_trait]
impl Step for RankAndSelect {
    fn name(&self) -> &'static str {
        "s4_rank_and_select"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_fast_step_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let strategy = require_strategy(ctx)?;

        let mut direct: Vec<Value> = Vec::new();
        if let Some(buyers) = &ctx.board.discovery_buyers {
            direct.extend(buyers.iter().cloned());
        }
        if let Some(buyers) = &ctx.board.discovery_buyers_geo {
            direct.extend(buyers.iter().cloned());
        }

        let outcome = score::rank_and_select(
            &ctx.board.all_opportunities(),
            &direct,
            strategy,
            ctx.config.max_secondary_buyers as usize,
            Utc::now(),
        )?;

        tracing::info!(
            featured = %outcome.featured.buyer_name,
            score = outcome.featured.score,
            candidates = outcome.all_scored.len(),
            "buyer ranking complete"
        );

        let mut output = StepOutput::delta(Blackboard {
            featured_buyer_id: Some(outcome.featured.buyer_id.clone()),
            featured_buyer_name: Some(outcome.featured.buyer_name.clone()),
            featured_buyer_type: Some(outcome.featured.buyer_type.clone()),
            secondary_buyers: Some(outcome.secondary),
            selection_rationale: Some(outcome.rationale.clone()),
            all_scored_buyers: Some(outcome.all_scored),
            ..Blackboard::default()
        });
        output.message = Some(outcome.rationale);
        Ok(output)
    }
}

/// s5 persist the discovery phase: run columns plus scored buyers.
pub struct PersistDiscovery;

#[async_trait]
impl Step for PersistDiscovery {
    fn name(&self) -> &'static str {
        "s5_persist_discovery"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_fast_step_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        ctx.store.update_run_discovery(ctx.run_id, &ctx.board)?;

        let scored = ctx.board.all_scored_buyers.clone().unwrap_or_default();
        ctx.store
            .insert_discoveries(ctx.run_id, &ctx.webhook.target_domain, &scored)?;

        let mut output = StepOutput::delta(Blackboard::default());
        output.message = Some(format!("{} discoveries saved", scored.len()));
        Ok(output)
    }
}

// ============================================================================
// Phase VI: enrich and generate (four parallel branches)
// ============================================================================

/// s6 featured-buyer enrichment: profile, contacts, and the long chat
/// narrative fetched in parallel. Opportunities are reused from the
/// discovery results, no extra call.
pub struct FeaturedIntel;

#[async_trait]
impl Step for FeaturedIntel {
    fn name(&self) -> &'static str {
        "s6_featured_intel"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.featured_intel_timeout_secs()
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let (buyer_id, buyer_name) = require_featured(ctx)?;
        let question = AgentPrompts::featured_chat_question(&buyer_name);

        let (profile, contacts, chat) = tokio::try_join!(
            ctx.signals.buyer_profile(&buyer_id),
            ctx.signals
                .buyer_contacts(&buyer_id, ctx.config.featured_contact_page_size),
            ctx.signals.buyer_chat(
                &buyer_id,
                &question,
                std::time::Duration::from_secs(ctx.config.chat_poll_interval_secs),
                std::time::Duration::from_secs(ctx.config.chat_max_wait_secs),
            ),
        )?;

        let ai_context = match &chat {
            Value::Object(map) => map
                .get("ai_response")
                .or_else(|| map.get("response"))
                .or_else(|| map.get("answer"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .unwrap_or_else(|| chat.to_string()),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let opportunities: Vec<Value> = ctx
            .board
            .all_opportunities()
            .into_iter()
            .filter(|opp| signal_buyer_id(opp) == Some(buyer_id.as_str()))
            .collect();

        let mut output = StepOutput::delta(Blackboard {
            feat_profile: Some(profile),
            feat_contacts: Some(contacts.clone()),
            feat_opportunities: Some(opportunities.clone()),
            feat_ai_context: Some(ai_context),
            ..Blackboard::default()
        });
        output.message = Some(format!(
            "contacts: {}, opportunities: {}",
            contacts.len(),
            opportunities.len()
        ));
        Ok(output)
    }
}

/// s9 featured-buyer section writer.
pub struct FeaturedSection;

#[async_trait]
impl Step for FeaturedSection {
    fn name(&self) -> &'static str {
        "s9_featured_section"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.llm_step_timeout_secs()
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let (system, content) = AgentPrompts::featured_section(&ctx.webhook, &ctx.board);
        let section = ctx
            .generator
            .generate(&system, &content, &ctx.cancel)
            .await?;

        Ok(StepOutput::delta(Blackboard {
            section_featured: Some(section),
            ..Blackboard::default()
        }))
    }
}

/// s7 secondary-buyer enrichment: profile + contacts per secondary,
/// parallel across secondaries.
pub struct SecondaryIntel;

#[async_trait]
impl Step for SecondaryIntel {
    fn name(&self) -> &'static str {
        "s7_secondary_intel"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_secondary_intel_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let secondaries = ctx.board.secondary_buyers.clone().unwrap_or_default();
        if secondaries.is_empty() {
            return Ok(StepOutput::skipped(
                Blackboard {
                    sec_profiles: Some(Vec::new()),
                    sec_contacts: Some(Vec::new()),
                    ..Blackboard::default()
                },
                "no secondary buyers",
            ));
        }

        let limit = ctx.config.max_secondary_buyers as usize;
        let fetches = secondaries.iter().take(limit).map(|buyer| {
            let signals = ctx.signals.clone();
            let page_size = ctx.config.secondary_contact_page_size;
            let buyer_id = buyer.buyer_id.clone();
            let buyer_name = buyer.buyer_name.clone();
            async move {
                let (profile, contacts) = tokio::try_join!(
                    signals.buyer_profile(&buyer_id),
                    signals.buyer_contacts(&buyer_id, page_size),
                )?;
                Ok::<(Value, Value), PipelineError>((
                    profile,
                    json!({
                        "buyerId": buyer_id,
                        "buyerName": buyer_name,
                        "contacts": contacts,
                    }),
                ))
            }
        });

        let fetched = futures::future::try_join_all(fetches).await?;
        let (profiles, contact_sets): (Vec<Value>, Vec<Value>) = fetched.into_iter().unzip();

        let mut output = StepOutput::delta(Blackboard {
            sec_profiles: Some(profiles.clone()),
            sec_contacts: Some(contact_sets),
            ..Blackboard::default()
        });
        output.message = Some(format!("{} secondary profiles", profiles.len()));
        Ok(output)
    }
}

/// s10 secondary-cards writer.
pub struct SecondaryCards;

#[async_trait]
impl Step for SecondaryCards {
    fn name(&self) -> &'static str {
        "s10_secondary_cards"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.llm_step_timeout_secs()
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let secondaries = ctx.board.secondary_buyers.clone().unwrap_or_default();
        if secondaries.is_empty() {
            return Ok(StepOutput::skipped(
                Blackboard {
                    section_secondary: Some(String::new()),
                    ..Blackboard::default()
                },
                "no secondary buyers",
            ));
        }

        let (system, content) = AgentPrompts::secondary_cards(&ctx.webhook, &ctx.board);
        let section = ctx
            .generator
            .generate(&system, &content, &ctx.cancel)
            .await?;

        Ok(StepOutput::delta(Blackboard {
            section_secondary: Some(section),
            ..Blackboard::default()
        }))
    }
}

/// s8 executive summary, pure template.
pub struct ExecSummary;

#[async_trait]
impl Step for ExecSummary {
    fn name(&self) -> &'static str {
        "s8_exec_summary"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_fast_step_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        Ok(StepOutput::delta(Blackboard {
            section_exec_summary: Some(sections::exec_summary(
                &ctx.board,
                ctx.webhook.display_name(),
            )),
            ..Blackboard::default()
        }))
    }
}

/// s11 call-to-action section, pure template.
pub struct Cta;

#[async_trait]
impl Step for Cta {
    fn name(&self) -> &'static str {
        "s11_cta"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_fast_step_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        Ok(StepOutput::delta(Blackboard {
            section_cta: Some(sections::cta(&ctx.board, ctx.webhook.display_name())),
            ..Blackboard::default()
        }))
    }
}

// ============================================================================
// Phase VII: assemble, validate, save
// ============================================================================

/// s12 tool-mode assembler: combines the sections and publishes via the
/// workspace tool. One retry; a second attempt often produces correctly
/// shaped tool parameters.
pub struct AssemblePublish;

impl AssemblePublish {
    async fn attempt(&self, ctx: &StepContext) -> PipelineResult<(String, String)> {
        let month = sections::month_year(chrono::Local::now());
        let (system, content) =
            AgentPrompts::assemble_and_publish(&ctx.webhook, &ctx.board, &ctx.publish, &month);

        let tools = ToolAccess {
            server_name: ctx.publish.tool_server_name.clone(),
            server_url: ctx.publish.tool_server_url.clone(),
            api_key: ctx.publish.tool_api_key.clone(),
        };
        let allowed = vec![ctx.publish.create_tool_alias.clone()];

        let output = ctx
            .generator
            .generate_with_tools(&system, &content, &tools, &allowed, &ctx.cancel)
            .await?;

        parse_assembler_output(&output).map_err(PipelineError::External)
    }
}

#[async_trait]
impl Step for AssemblePublish {
    fn name(&self) -> &'static str {
        "s12_assemble_publish"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.assemble_timeout_secs()
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let (report, url) = match self.attempt(ctx).await {
            Ok(result) => result,
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(first_error) => {
                tracing::warn!(error = %first_error, "assemble-and-publish failed, retrying once");
                self.attempt(ctx).await?
            }
        };

        let mut output = StepOutput::delta(Blackboard {
            report_markdown: Some(report.clone()),
            notion_url: Some(url.clone()),
            ..Blackboard::default()
        });
        output.message = Some(url);
        Ok(output)
    }
}

/// Workspace page id out of a published URL: the trailing hex token.
fn page_id_from_url(url: &str) -> Option<String> {
    let tail = url
        .split(['?', '#'])
        .next()?
        .trim_end_matches('/')
        .rsplit('/')
        .next()?;
    let id = tail.rsplit('-').next().unwrap_or(tail);
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// s13 deterministic checks plus the LLM consistency pass; findings
/// trigger the report fixer and a workspace page update.
pub struct Validate;

#[async_trait]
impl Step for Validate {
    fn name(&self) -> &'static str {
        "s13_validate"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.validate_timeout_secs()
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        let report = ctx
            .board
            .report_markdown
            .clone()
            .ok_or_else(|| PipelineError::Validation("no report to validate".to_string()))?;
        let featured = ctx.board.featured_buyer_name.clone().unwrap_or_default();
        let secondary_names: Vec<String> = ctx
            .board
            .secondary_buyers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|b| b.buyer_name)
            .collect();

        let month = sections::month_year(chrono::Local::now());
        let mut findings = validate::check_report(
            &report,
            &featured,
            ctx.webhook.display_name(),
            &secondary_names,
            &month,
        );

        // Internal-consistency check. FAIL findings are warnings; a broken
        // checker call is logged and skipped, never fatal.
        let (system, content) = AgentPrompts::fact_check(&featured, &report);
        match ctx.generator.generate(&system, &content, &ctx.cancel).await {
            Ok(result) => {
                if result.to_uppercase().contains("FAIL") {
                    findings.warnings.push(format!(
                        "Consistency check: {}",
                        result.chars().take(500).collect::<String>()
                    ));
                }
            }
            Err(brief_generator::GeneratorError::Cancelled) => {
                return Err(PipelineError::Cancelled)
            }
            Err(error) => {
                tracing::warn!(error = %error, "consistency check skipped");
            }
        }

        let mut delta = Blackboard::default();
        let mut fixed = false;

        if !findings.is_clean() {
            let (system, content) = AgentPrompts::fix_report(
                &featured,
                &report,
                &findings.issues,
                &findings.warnings,
            );
            match ctx.generator.generate(&system, &content, &ctx.cancel).await {
                Ok(corrected) => {
                    fixed = true;
                    delta.report_markdown = Some(corrected.clone());
                    ctx.store.log_step(
                        ctx.run_id,
                        "s13_fix_report",
                        AuditStatus::Success,
                        Some(&format!(
                            "fixed {} issues, {} warnings",
                            findings.issues.len(),
                            findings.warnings.len()
                        )),
                        None,
                        None,
                    );

                    // Push the corrected report to the workspace when a page
                    // exists. Update failures are warnings only.
                    if let Some(url) = &ctx.board.notion_url {
                        if let Some(page_id) = page_id_from_url(url) {
                            let patch = PagePatch {
                                properties: None,
                                content: Some(corrected),
                            };
                            match ctx.publisher.update_page(&page_id, &patch).await {
                                Ok(()) => ctx.store.log_step(
                                    ctx.run_id,
                                    "s13_notion_update",
                                    AuditStatus::Success,
                                    Some(url),
                                    None,
                                    None,
                                ),
                                Err(error) => ctx.store.log_step(
                                    ctx.run_id,
                                    "s13_notion_update",
                                    AuditStatus::Warning,
                                    Some(&error.to_string()),
                                    None,
                                    None,
                                ),
                            }
                        }
                    }
                }
                Err(brief_generator::GeneratorError::Cancelled) => {
                    return Err(PipelineError::Cancelled)
                }
                Err(error) => {
                    ctx.store.log_step(
                        ctx.run_id,
                        "s13_fix_report",
                        AuditStatus::Warning,
                        Some(&error.to_string()),
                        None,
                        None,
                    );
                }
            }
        }

        let report_result = ValidationReport {
            passed: findings.issues.is_empty(),
            issues: findings.issues.clone(),
            warnings: findings.warnings.clone(),
            fixed,
            checked_at: Some(Utc::now().to_rfc3339()),
        };
        delta.validation_result = Some(report_result);

        if findings.is_clean() {
            Ok(StepOutput::delta(delta))
        } else {
            Ok(StepOutput::warning(
                delta,
                format!(
                    "{} issues, {} warnings{}",
                    findings.issues.len(),
                    findings.warnings.len(),
                    if fixed { ", fix applied" } else { "" }
                ),
            ))
        }
    }
}

/// s14 final persistence: completed run row plus featured contacts.
pub struct SaveAndRespond;

#[async_trait]
impl Step for SaveAndRespond {
    fn name(&self) -> &'static str {
        "s14_save_and_respond"
    }

    fn timeout_secs(&self, config: &PipelineConfig) -> u64 {
        config.timeout_fast_step_secs
    }

    async fn run(&self, ctx: &StepContext) -> PipelineResult<StepOutput> {
        ctx.store.update_run_completed(ctx.run_id, &ctx.board)?;

        if let (Some(buyer_id), Some(contacts)) =
            (&ctx.board.featured_buyer_id, &ctx.board.feat_contacts)
        {
            if !contacts.is_empty() {
                ctx.store
                    .insert_contacts(ctx.run_id, buyer_id, contacts)?;
            }
        }

        let mut output = StepOutput::delta(Blackboard::default());
        output.message = Some("run completed".to_string());
        Ok(output)
    }
}
