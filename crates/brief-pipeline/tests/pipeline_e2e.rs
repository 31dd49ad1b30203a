//! End-to-end pipeline scenarios against scripted clients.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use brief_config::{ConfigRegistry, PipelineConfig};
use brief_pipeline::{
    AdmissionConfig, AdmissionController, Clients, Orchestrator, PipelineOutcome, PublishTarget,
};
use brief_store::Store;
use brief_types::{RunStatus, ValidationReport, Webhook};

use support::{MockGenerator, MockPublisher, MockSignals};

fn webhook() -> Webhook {
    Webhook {
        target_company: "Acme".to_string(),
        target_domain: "acme.com".to_string(),
        product_description: "widget procurement platform".to_string(),
        ..Webhook::default()
    }
}

fn recent_date(days_ago: i64) -> String {
    (Utc::now() - chrono::Duration::days(days_ago))
        .format("%Y-%m-%d")
        .to_string()
}

fn springfield_opportunities() -> Vec<Value> {
    vec![
        json!({
            "id": "opp-1", "buyerId": "B1", "buyerName": "Springfield City",
            "buyerType": "City", "type": "RFP",
            "title": "RFP for widget procurement platform",
            "summary": "City seeks widget platform", "date": recent_date(10),
            "amount": 250000,
        }),
        json!({
            "id": "opp-2", "buyerId": "B1", "buyerName": "Springfield City",
            "buyerType": "City", "type": "Contract",
            "title": "Widget services contract renewal",
            "date": recent_date(30), "amount": "1,200,000",
        }),
        json!({
            "id": "opp-3", "buyerId": "B1", "buyerName": "Springfield City",
            "buyerType": "City", "type": "Meeting",
            "title": "Council discussed widget modernization",
            "date": recent_date(5),
        }),
    ]
}

fn month_year() -> String {
    chrono::Local::now().format("%B %Y").to_string()
}

fn clean_report() -> String {
    let body = "Springfield City is actively buying widget platforms for Acme-scale needs. "
        .repeat(12);
    format!(
        "# 📊 Springfield City — Intelligence Report for Acme\n\n{body}\n\n\
         Key contact: Jane Doe — Director of Procurement — jane.doe@springfield.gov\n\n\
         *Generated Brief Intelligence {}*",
        month_year()
    )
}

fn assembler_output(report: &str) -> String {
    format!("{report}\n---NOTION_URL---\nhttps://notion.so/abc123\n")
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Store,
    signals: Arc<MockSignals>,
    generator: Arc<MockGenerator>,
    publisher: Arc<MockPublisher>,
}

impl Harness {
    fn new(signals: MockSignals, generator: MockGenerator) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("pipeline.db"));
        store.init().unwrap();
        Self {
            _dir: dir,
            store,
            signals: Arc::new(signals),
            generator: Arc::new(generator),
            publisher: Arc::new(MockPublisher::default()),
        }
    }

    fn clients(&self) -> Clients {
        Clients {
            signals: self.signals.clone(),
            generator: self.generator.clone(),
            publisher: self.publisher.clone(),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            webhook(),
            PipelineConfig::default(),
            self.store.clone(),
            self.clients(),
            PublishTarget::default(),
        )
    }

    fn audit_entry(&self, run_id: i64, step: &str) -> Option<brief_types::AuditEntry> {
        self.store
            .get_audit_log(run_id)
            .unwrap()
            .into_iter()
            .find(|e| e.step == step)
    }
}

fn happy_signals() -> MockSignals {
    MockSignals {
        primary_results: springfield_opportunities(),
        type_buyers: vec![json!({ "id": "B1", "name": "Springfield City", "type": "City" })],
        ..MockSignals::default()
    }
}

fn happy_generator() -> MockGenerator {
    MockGenerator {
        assembler_output: assembler_output(&clean_report()),
        ..MockGenerator::default()
    }
}

// ============================================================================
// Scenario: happy path
// ============================================================================

#[tokio::test]
async fn happy_path_completes_with_full_audit_trail() {
    let harness = Harness::new(happy_signals(), happy_generator());
    let outcome = harness.orchestrator().execute(None).await;

    let run_id = match &outcome {
        PipelineOutcome::Success {
            run_id,
            buyer_name,
            report_url,
            report_markdown,
            metadata,
            buyer_id: _,
        } => {
            assert_eq!(buyer_name.as_deref(), Some("Springfield City"));
            assert_eq!(report_url.as_deref(), Some("https://notion.so/abc123"));
            let report = report_markdown.as_deref().unwrap();
            assert!(report.contains("Acme"));
            assert!(report.contains("Springfield City"));
            assert!(report.contains(&month_year()));
            assert_eq!(metadata.total_signals_scanned, 3);
            assert!(metadata.ai_chat_available);
            assert_eq!(metadata.contacts_count, 1);
            *run_id
        }
        other => panic!("expected success, got {other:?}"),
    };

    // Run row is terminal and fully populated.
    let row = harness.store.get_run(run_id).unwrap();
    assert_eq!(row.status, "completed");
    assert!(row.completed_at.is_some());
    assert!(row.report_markdown.is_some());
    assert_eq!(row.notion_url.as_deref(), Some("https://notion.so/abc123"));

    let validation: ValidationReport =
        serde_json::from_str(row.validation_result.as_deref().unwrap()).unwrap();
    assert!(validation.passed);
    assert!(!validation.fixed);

    // Audit completeness: one entry per executed step, finite durations.
    let expected = [
        ("s0_parse_webhook", "success"),
        ("s1_validate_and_load", "success"),
        ("s2_search_strategy", "success"),
        ("s3a_primary_search", "success"),
        ("s3b_alternate_search", "skipped"),
        ("s3c_buyer_type_search", "success"),
        ("s3d_geo_search", "skipped"),
        ("s4_rank_and_select", "success"),
        ("s5_persist_discovery", "success"),
        ("s6_featured_intel", "success"),
        ("s7_secondary_intel", "skipped"),
        ("s8_exec_summary", "success"),
        ("s9_featured_section", "success"),
        ("s10_secondary_cards", "skipped"),
        ("s11_cta", "success"),
        ("s12_assemble_publish", "success"),
        ("s13_validate", "success"),
        ("s14_save_and_respond", "success"),
    ];
    let entries = harness.store.get_audit_log(run_id).unwrap();
    for (step, status) in expected {
        let matching: Vec<_> = entries.iter().filter(|e| e.step == step).collect();
        assert_eq!(matching.len(), 1, "expected exactly one audit row for {step}");
        assert_eq!(matching[0].status, status, "unexpected status for {step}");
        assert!(
            matching[0].duration_seconds.is_some(),
            "missing duration for {step}"
        );
    }

    // Skipped branches made no provider calls.
    let calls = harness.signals.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|c| c.starts_with("opportunity_search"))
            .count(),
        1,
        "alternate search must not reach the provider"
    );
    assert_eq!(
        calls
            .iter()
            .filter(|c| c.starts_with("buyer_search"))
            .count(),
        1,
        "geo search must not reach the provider"
    );

    // Featured contacts were persisted.
    assert_eq!(harness.store.get_contacts(run_id).unwrap().len(), 1);
    assert!(!harness.store.get_discoveries(run_id).unwrap().is_empty());

    // Generator intents: strategy, featured section, fact check, and the
    // tool-mode assembler. No fixer on a clean report.
    let generator_calls = harness.generator.calls();
    assert!(generator_calls.contains(&"strategy".to_string()));
    assert!(generator_calls.contains(&"featured_section".to_string()));
    assert!(generator_calls.contains(&"assembler".to_string()));
    assert!(generator_calls.contains(&"fact_check".to_string()));
    assert!(!generator_calls.contains(&"fix_report".to_string()));
}

// ============================================================================
// Scenario: all-empty discovery
// ============================================================================

#[tokio::test]
async fn empty_discovery_fails_the_run_with_no_buyers() {
    let signals = MockSignals::default();
    let generator = MockGenerator {
        strategy_json: json!({
            "primary_keywords": ["widget"],
            "opportunity_types": ["RFP"],
        })
        .to_string(),
        ..happy_generator()
    };
    let harness = Harness::new(signals, generator);

    let outcome = harness.orchestrator().execute(None).await;
    let run_id = match &outcome {
        PipelineOutcome::Error {
            run_id,
            error,
            produced_keys,
            ..
        } => {
            assert!(error.contains("No buyers"), "unexpected error: {error}");
            assert!(produced_keys.contains(&"search_strategy".to_string()));
            run_id.unwrap()
        }
        other => panic!("expected error outcome, got {other:?}"),
    };

    let row = harness.store.get_run(run_id).unwrap();
    assert_eq!(row.status, "failed");
    assert!(row.report_markdown.is_none());
    // Partial persistence: the strategy survived the failure.
    assert!(row.search_strategy.is_some());

    let entry = harness.audit_entry(run_id, "s4_rank_and_select").unwrap();
    assert_eq!(entry.status, "failure");
    assert!(entry.message.unwrap().contains("No buyers"));
    assert!(harness.audit_entry(run_id, "pipeline_failed").is_some());
}

// ============================================================================
// Scenario: mid-run cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn cancel_during_featured_intel_marks_run_cancelled() {
    let signals = MockSignals {
        chat_delay: Duration::from_secs(30),
        ..happy_signals()
    };
    let harness = Harness::new(signals, happy_generator());
    let orchestrator = harness.orchestrator();

    let runner = orchestrator.clone();
    let task = tokio::spawn(async move { runner.execute(None).await });

    // Let the run reach the featured-intel chat poll, then fire the token.
    tokio::time::sleep(Duration::from_millis(300)).await;
    orchestrator.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("cancel must interrupt the run promptly")
        .unwrap();

    let run_id = match outcome {
        PipelineOutcome::Cancelled {
            run_id,
            elapsed_seconds,
        } => {
            assert!(elapsed_seconds < 5.0);
            run_id.unwrap()
        }
        other => panic!("expected cancelled outcome, got {other:?}"),
    };

    assert_eq!(
        harness.store.get_run_status(run_id).unwrap(),
        Some(RunStatus::Cancelled)
    );
    assert!(harness.audit_entry(run_id, "pipeline_cancelled").is_some());
    // Discovery-phase state was preserved.
    let row = harness.store.get_run(run_id).unwrap();
    assert!(row.featured_buyer_name.is_some());
}

// ============================================================================
// Scenario: chat timeout is terminal
// ============================================================================

#[tokio::test]
async fn buyer_chat_timeout_fails_the_run() {
    let signals = MockSignals {
        chat_times_out: true,
        ..happy_signals()
    };
    let harness = Harness::new(signals, happy_generator());

    let outcome = harness.orchestrator().execute(None).await;
    let run_id = match &outcome {
        PipelineOutcome::Error { run_id, error, .. } => {
            assert!(error.contains("timed out"));
            run_id.unwrap()
        }
        other => panic!("expected error outcome, got {other:?}"),
    };

    let row = harness.store.get_run(run_id).unwrap();
    assert_eq!(row.status, "failed");
    assert!(row.report_markdown.is_none(), "no report after chat timeout");

    let entry = harness.audit_entry(run_id, "s6_featured_intel").unwrap();
    assert_eq!(entry.status, "timeout");
}

// ============================================================================
// Scenario: validator-triggered fix
// ============================================================================

#[tokio::test]
async fn validator_findings_trigger_fix_and_page_update() {
    // Featured buyer name only appears after the first 500 characters.
    let padding = "x".repeat(600);
    let bad_report = format!(
        "# 📊 Intelligence Report for Acme\n\n{padding}\n\nSpringfield City details follow.\n\n\
         *Generated Brief Intelligence {}*",
        month_year()
    );
    let generator = MockGenerator {
        assembler_output: assembler_output(&bad_report),
        fixed_report: clean_report(),
        ..MockGenerator::default()
    };
    let harness = Harness::new(happy_signals(), generator);

    let outcome = harness.orchestrator().execute(None).await;
    let run_id = match &outcome {
        PipelineOutcome::Success { run_id, metadata, .. } => {
            let validation = metadata.validation.as_ref().unwrap();
            assert!(!validation.passed);
            assert!(validation.fixed);
            assert!(validation
                .issues
                .iter()
                .any(|i| i.contains("featured buyer name")));
            *run_id
        }
        other => panic!("expected success with fix applied, got {other:?}"),
    };

    let validate_entry = harness.audit_entry(run_id, "s13_validate").unwrap();
    assert_eq!(validate_entry.status, "warning");
    assert_eq!(
        harness
            .audit_entry(run_id, "s13_fix_report")
            .unwrap()
            .status,
        "success"
    );
    assert_eq!(
        harness
            .audit_entry(run_id, "s13_notion_update")
            .unwrap()
            .status,
        "success"
    );
    assert_eq!(harness.publisher.updated_pages(), vec!["abc123".to_string()]);

    // The corrected report is what got persisted.
    let row = harness.store.get_run(run_id).unwrap();
    assert_eq!(row.status, "completed");
    assert_eq!(row.report_markdown.as_deref(), Some(clean_report().as_str()));
}

// ============================================================================
// Scenario: batch admission under a capacity bound
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn batch_of_three_respects_concurrency_bound_of_two() {
    let signals = MockSignals {
        chat_delay: Duration::from_millis(300),
        ..happy_signals()
    };
    let harness = Harness::new(signals, happy_generator());

    let registry = Arc::new(ConfigRegistry::default());
    registry
        .set_value("max_concurrent_runs", &json!(2))
        .await
        .unwrap();

    let controller = AdmissionController::new(
        harness.store.clone(),
        registry,
        harness.clients(),
        AdmissionConfig::default(),
    )
    .await
    .unwrap();

    let (batch_id, run_ids) = controller
        .submit_batch(vec![webhook(), webhook(), webhook()])
        .await
        .unwrap();
    assert_eq!(run_ids.len(), 3);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    let mut max_processing = 0i64;
    loop {
        let processing = harness
            .store
            .count_runs_in_status(RunStatus::Processing)
            .unwrap();
        max_processing = max_processing.max(processing);
        assert!(
            processing <= 2,
            "processing count {processing} exceeded the bound"
        );

        let done = run_ids
            .iter()
            .all(|id| {
                harness
                    .store
                    .get_run_status(*id)
                    .unwrap()
                    .map(RunStatus::is_terminal)
                    .unwrap_or(false)
            });
        if done {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "batch did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(max_processing >= 1);

    for run_id in &run_ids {
        let row = harness.store.get_run(*run_id).unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.batch_id, Some(batch_id));
        assert!(!harness.store.get_audit_log(*run_id).unwrap().is_empty());
    }
    assert_eq!(harness.store.get_batch_runs(batch_id).unwrap().len(), 3);
}

// ============================================================================
// Scenario: killing a queued run
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn killing_a_queued_run_cancels_it_without_processing() {
    let signals = MockSignals {
        chat_delay: Duration::from_millis(500),
        ..happy_signals()
    };
    let harness = Harness::new(signals, happy_generator());

    let registry = Arc::new(ConfigRegistry::default());
    registry
        .set_value("max_concurrent_runs", &json!(1))
        .await
        .unwrap();

    let controller = AdmissionController::new(
        harness.store.clone(),
        registry,
        harness.clients(),
        AdmissionConfig::default(),
    )
    .await
    .unwrap();

    let first = controller.submit(webhook()).await.unwrap();
    let second = controller.submit(webhook()).await.unwrap();

    // Give the first run time to claim the only slot, then kill the
    // queued one.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(controller.kill(second).await.unwrap());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = harness.store.get_run_status(second).unwrap();
        if status == Some(RunStatus::Cancelled) {
            break;
        }
        assert_ne!(
            status,
            Some(RunStatus::Processing),
            "killed queued run must never enter processing"
        );
        assert!(tokio::time::Instant::now() < deadline, "cancel not observed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The first run is unaffected and completes.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while !harness
        .store
        .get_run_status(first)
        .unwrap()
        .map(RunStatus::is_terminal)
        .unwrap_or(false)
    {
        assert!(tokio::time::Instant::now() < deadline, "first run stuck");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        harness.store.get_run_status(first).unwrap(),
        Some(RunStatus::Completed)
    );
}

// ============================================================================
// Invalid input
// ============================================================================

#[tokio::test]
async fn invalid_webhook_is_rejected_at_submission() {
    let harness = Harness::new(MockSignals::default(), MockGenerator::default());
    let registry = Arc::new(ConfigRegistry::default());
    let controller = AdmissionController::new(
        harness.store.clone(),
        registry,
        harness.clients(),
        AdmissionConfig::default(),
    )
    .await
    .unwrap();

    let empty = Webhook::default();
    let err = controller.submit(empty).await.unwrap_err();
    assert!(err.to_string().contains("target_domain or target_company"));
}
