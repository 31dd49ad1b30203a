//! Scripted client implementations for pipeline integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use brief_generator::{Generator, GeneratorError, GeneratorResult, ToolAccess};
use brief_publisher::{PagePatch, PageRef, Publisher, PublisherResult};
use brief_signals::{SignalsApi, SignalsError, SignalsResult};

// ============================================================================
// Signals
// ============================================================================

/// Scripted Signals Provider. Opportunity queries containing
/// `primary_token` return the primary result set, anything else the
/// alternate set; buyer searches dispatch on whether states were passed.
pub struct MockSignals {
    pub primary_token: String,
    pub primary_results: Vec<Value>,
    pub alternate_results: Vec<Value>,
    pub type_buyers: Vec<Value>,
    pub geo_buyers: Vec<Value>,
    pub profile: Value,
    pub contacts: Vec<Value>,
    pub chat_response: Value,
    pub chat_delay: Duration,
    pub chat_times_out: bool,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockSignals {
    fn default() -> Self {
        Self {
            primary_token: "widget".to_string(),
            primary_results: Vec::new(),
            alternate_results: Vec::new(),
            type_buyers: Vec::new(),
            geo_buyers: Vec::new(),
            profile: json!({ "name": "Springfield City", "state": "IL" }),
            contacts: vec![json!({
                "name": "Jane Doe",
                "title": "Director of Procurement",
                "email": "jane.doe@springfield.gov",
                "emailVerified": true,
            })],
            chat_response: json!({ "ai_response": "Springfield City is modernizing procurement." }),
            chat_delay: Duration::from_millis(0),
            chat_times_out: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockSignals {
    pub fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalsApi for MockSignals {
    async fn opportunity_search(
        &self,
        query: &str,
        _types: &[String],
        _page_size: u32,
    ) -> SignalsResult<Vec<Value>> {
        self.record(format!("opportunity_search:{query}"));
        if query.contains(&self.primary_token) {
            Ok(self.primary_results.clone())
        } else {
            Ok(self.alternate_results.clone())
        }
    }

    async fn buyer_search(
        &self,
        query: Option<&str>,
        _buyer_types: &[String],
        states: &[String],
        _page_size: u32,
    ) -> SignalsResult<Vec<Value>> {
        self.record(format!(
            "buyer_search:{}:{}",
            query.unwrap_or(""),
            states.join(",")
        ));
        if states.is_empty() {
            Ok(self.type_buyers.clone())
        } else {
            Ok(self.geo_buyers.clone())
        }
    }

    async fn buyer_profile(&self, buyer_id: &str) -> SignalsResult<Value> {
        self.record(format!("buyer_profile:{buyer_id}"));
        Ok(self.profile.clone())
    }

    async fn buyer_contacts(&self, buyer_id: &str, _page_size: u32) -> SignalsResult<Vec<Value>> {
        self.record(format!("buyer_contacts:{buyer_id}"));
        Ok(self.contacts.clone())
    }

    async fn buyer_chat(
        &self,
        buyer_id: &str,
        _question: &str,
        _poll_interval: Duration,
        max_wait: Duration,
    ) -> SignalsResult<Value> {
        self.record(format!("buyer_chat:{buyer_id}"));
        tokio::time::sleep(self.chat_delay).await;
        if self.chat_times_out {
            return Err(SignalsError::Timeout {
                tool: "buyer-chat".to_string(),
                waited_secs: max_wait.as_secs(),
            });
        }
        Ok(self.chat_response.clone())
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Scripted Generator. Dispatches on distinctive fragments of the system
/// prompts; tool-mode calls return the assembler output.
pub struct MockGenerator {
    pub strategy_json: String,
    pub featured_section: String,
    pub secondary_cards: String,
    pub assembler_output: String,
    pub fact_check: String,
    pub fixed_report: String,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self {
            strategy_json: json!({
                "primary_keywords": ["widget"],
                "buyer_types": ["City"],
                "opportunity_types": ["RFP", "Contract"],
            })
            .to_string(),
            featured_section: "> 🏙️\n> **Springfield City** | City\n\nFeatured analysis."
                .to_string(),
            secondary_cards: "**Metro County** | County".to_string(),
            assembler_output: String::new(),
            fact_check: "PASS".to_string(),
            fixed_report: String::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockGenerator {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        _user_content: &str,
        cancel: &CancellationToken,
    ) -> GeneratorResult<String> {
        if cancel.is_cancelled() {
            return Err(GeneratorError::Cancelled);
        }
        let (label, response) = if system_prompt.contains("procurement intelligence analyst") {
            ("strategy", self.strategy_json.clone())
        } else if system_prompt.contains("Featured Buyer section") {
            ("featured_section", self.featured_section.clone())
        } else if system_prompt.contains("compact buyer cards") {
            ("secondary_cards", self.secondary_cards.clone())
        } else if system_prompt.contains("fact-checker") {
            ("fact_check", self.fact_check.clone())
        } else if system_prompt.contains("report editor") {
            ("fix_report", self.fixed_report.clone())
        } else {
            ("unknown", String::new())
        };
        self.calls.lock().unwrap().push(label.to_string());
        if response.is_empty() {
            return Err(GeneratorError::EmptyOutput {
                label: label.to_string(),
            });
        }
        Ok(response)
    }

    async fn generate_with_tools(
        &self,
        _system_prompt: &str,
        _user_content: &str,
        _tools: &ToolAccess,
        _allowed_tools: &[String],
        cancel: &CancellationToken,
    ) -> GeneratorResult<String> {
        if cancel.is_cancelled() {
            return Err(GeneratorError::Cancelled);
        }
        self.calls.lock().unwrap().push("assembler".to_string());
        if self.assembler_output.is_empty() {
            return Err(GeneratorError::EmptyOutput {
                label: "assembler".to_string(),
            });
        }
        Ok(self.assembler_output.clone())
    }
}

// ============================================================================
// Publisher
// ============================================================================

#[derive(Default)]
pub struct MockPublisher {
    pub updates: Arc<Mutex<Vec<String>>>,
}

impl MockPublisher {
    pub fn updated_pages(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn create_page(
        &self,
        _title: &str,
        _body_markdown: &str,
        _parent_id: &str,
    ) -> PublisherResult<PageRef> {
        Ok(PageRef {
            id: Some("page-1".to_string()),
            url: Some("https://notion.so/page1".to_string()),
        })
    }

    async fn update_page(&self, page_id: &str, _patch: &PagePatch) -> PublisherResult<()> {
        self.updates.lock().unwrap().push(page_id.to_string());
        Ok(())
    }
}
