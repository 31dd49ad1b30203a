//! Client for the procurement Signals Provider.
//!
//! Four synchronous operations (opportunity search, buyer search, buyer
//! profile, buyer contacts) and one asynchronous operation (buyer chat,
//! submit + poll). Responses arrive wrapped in the provider's tool
//! envelope; this crate unwraps them and normalizes list-or-keyed-dict
//! payload shapes to plain lists before anything downstream sees them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalsError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{tool} failed: {message}")]
    Api { tool: String, message: String },
    #[error("{tool} async submit returned no run id")]
    MissingRunId { tool: String },
    #[error("{tool} polling timed out after {waited_secs}s")]
    Timeout { tool: String, waited_secs: u64 },
}

pub type SignalsResult<T> = Result<T, SignalsError>;

/// Uniform interface over the provider's endpoints. The pipeline holds a
/// trait object so tests can substitute scripted implementations.
#[async_trait]
pub trait SignalsApi: Send + Sync {
    /// Full-text search over procurement records.
    async fn opportunity_search(
        &self,
        query: &str,
        types: &[String],
        page_size: u32,
    ) -> SignalsResult<Vec<Value>>;

    /// Filter-only buyer lookup; `query` is a name-contains filter.
    async fn buyer_search(
        &self,
        query: Option<&str>,
        buyer_types: &[String],
        states: &[String],
        page_size: u32,
    ) -> SignalsResult<Vec<Value>>;

    /// Single-buyer attribute bag.
    async fn buyer_profile(&self, buyer_id: &str) -> SignalsResult<Value>;

    async fn buyer_contacts(&self, buyer_id: &str, page_size: u32) -> SignalsResult<Vec<Value>>;

    /// Long-running AI narrative about a buyer. Submit + poll; bounded by
    /// `max_wait`, after which the call fails with [`SignalsError::Timeout`].
    async fn buyer_chat(
        &self,
        buyer_id: &str,
        question: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> SignalsResult<Value>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Per-operation endpoint slugs on the provider's tool gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsTools {
    pub opportunity_search: String,
    pub buyer_search: String,
    pub buyer_profile: String,
    pub buyer_contacts: String,
    pub buyer_chat: String,
}

impl Default for SignalsTools {
    fn default() -> Self {
        Self {
            opportunity_search: "opportunity-search".to_string(),
            buyer_search: "buyer-search".to_string(),
            buyer_profile: "buyer-profile".to_string(),
            buyer_contacts: "buyer-contacts".to_string(),
            buyer_chat: "buyer-chat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub tools: SignalsTools,
}

impl SignalsConfig {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("SIGNALS_API_KEY").ok()?;
        let base_url = std::env::var("SIGNALS_BASE_URL")
            .unwrap_or_else(|_| "https://api.signals.example".to_string());
        Some(Self {
            base_url,
            api_key,
            tools: SignalsTools::default(),
        })
    }
}

pub struct HttpSignalsClient {
    client: reqwest::Client,
    config: SignalsConfig,
}

impl HttpSignalsClient {
    pub fn new(config: SignalsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn call_sync(&self, tool: &str, params: Value) -> SignalsResult<Value> {
        let url = format!("{}/tools/{}", self.config.base_url.trim_end_matches('/'), tool);
        tracing::debug!(tool, "signals sync call");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .timeout(Duration::from_secs(120))
            .json(&json!({ "input_vars": params }))
            .send()
            .await?;

        let body: Value = response.json().await?;
        unwrap_envelope(tool, body)
    }

    async fn call_async(
        &self,
        tool: &str,
        params: Value,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> SignalsResult<Value> {
        let base = self.config.base_url.trim_end_matches('/');
        let submit_url = format!("{base}/tools/{tool}/async");
        tracing::debug!(tool, "signals async submit");

        let response = self
            .client
            .post(&submit_url)
            .header("x-api-key", &self.config.api_key)
            .timeout(Duration::from_secs(30))
            .json(&json!({ "input_vars": params }))
            .send()
            .await?;
        let body: Value = response.json().await?;

        let run_id = extract_run_id(&body).ok_or_else(|| SignalsError::MissingRunId {
            tool: tool.to_string(),
        })?;
        tracing::debug!(tool, run_id = %run_id, "signals async run submitted");

        let poll_url = format!("{base}/runs/{run_id}/output");
        let start = tokio::time::Instant::now();

        while start.elapsed() < max_wait {
            tokio::time::sleep(poll_interval).await;

            let response = self
                .client
                .get(&poll_url)
                .header("x-api-key", &self.config.api_key)
                .timeout(Duration::from_secs(15))
                .send()
                .await?;

            // 202 is the provider's still-processing marker.
            if response.status() == reqwest::StatusCode::ACCEPTED {
                continue;
            }

            let body: Value = response.json().await?;
            let output = unwrap_envelope(tool, body)?;
            tracing::debug!(
                tool,
                elapsed_secs = start.elapsed().as_secs(),
                "signals async run complete"
            );
            return Ok(output);
        }

        Err(SignalsError::Timeout {
            tool: tool.to_string(),
            waited_secs: max_wait.as_secs(),
        })
    }
}

#[async_trait]
impl SignalsApi for HttpSignalsClient {
    async fn opportunity_search(
        &self,
        query: &str,
        types: &[String],
        page_size: u32,
    ) -> SignalsResult<Vec<Value>> {
        let mut params = json!({
            "search_query": query,
            "page_size": page_size,
            "sort_field": "SearchRelevancy",
        });
        if !types.is_empty() {
            params["types"] = json!(types);
        }
        let raw = self
            .call_sync(self.config.tools.opportunity_search.as_str(), params)
            .await?;
        Ok(opportunities_list(raw))
    }

    async fn buyer_search(
        &self,
        query: Option<&str>,
        buyer_types: &[String],
        states: &[String],
        page_size: u32,
    ) -> SignalsResult<Vec<Value>> {
        let mut params = json!({ "page_size": page_size });
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            params["query"] = json!(q);
        }
        if !buyer_types.is_empty() {
            params["buyer_types"] = json!(buyer_types);
        }
        if !states.is_empty() {
            params["states"] = json!(states);
        }
        let raw = self
            .call_sync(self.config.tools.buyer_search.as_str(), params)
            .await?;
        Ok(buyers_list(raw))
    }

    async fn buyer_profile(&self, buyer_id: &str) -> SignalsResult<Value> {
        let raw = self
            .call_sync(
                self.config.tools.buyer_profile.as_str(),
                json!({ "buyer_id": buyer_id }),
            )
            .await?;
        // Some deployments nest the bag under "profile".
        if let Some(profile) = raw.get("profile") {
            return Ok(profile.clone());
        }
        Ok(raw)
    }

    async fn buyer_contacts(&self, buyer_id: &str, page_size: u32) -> SignalsResult<Vec<Value>> {
        let raw = self
            .call_sync(
                self.config.tools.buyer_contacts.as_str(),
                json!({ "buyer_id": buyer_id, "page_size": page_size }),
            )
            .await?;
        Ok(contacts_list(raw))
    }

    async fn buyer_chat(
        &self,
        buyer_id: &str,
        question: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> SignalsResult<Value> {
        self.call_async(
            self.config.tools.buyer_chat.as_str(),
            json!({ "buyer_id": buyer_id, "question": question }),
            poll_interval,
            max_wait,
        )
        .await
    }
}

// ============================================================================
// Envelope unwrapping and normalization
// ============================================================================

/// Unwrap the provider's tool envelope:
/// `{success, data: {output_vars: {output: …}}}` on success, an error
/// envelope otherwise. Output strings that parse as JSON are decoded.
/// Tools sometimes embed upstream API errors in the output instead of
/// failing the envelope; those surface as errors too.
pub fn unwrap_envelope(tool: &str, body: Value) -> SignalsResult<Value> {
    if let Some(false) = body.get("success").and_then(Value::as_bool) {
        let message = match body.get("error") {
            Some(Value::Object(err)) => err
                .get("message")
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .unwrap_or_else(|| Value::Object(err.clone()).to_string()),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        };
        return Err(SignalsError::Api {
            tool: tool.to_string(),
            message,
        });
    }

    let inner = body.get("data").cloned().unwrap_or(body);
    let mut out = inner.get("output_vars").cloned().unwrap_or(inner);
    if let Some(wrapped) = out.get("output") {
        out = wrapped.clone();
    }
    if let Some(text) = out.as_str() {
        if let Ok(parsed) = serde_json::from_str::<Value>(text) {
            out = parsed;
        }
    }

    if let Some(err) = out.get("error") {
        if !err.is_null() {
            let status = out
                .get("status_code")
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(SignalsError::Api {
                tool: tool.to_string(),
                message: format!("API error {status}"),
            });
        }
    }

    Ok(out)
}

fn extract_run_id(body: &Value) -> Option<String> {
    let direct = body
        .get("run_id")
        .or_else(|| body.get("run_uuid"))
        .and_then(Value::as_str);
    if let Some(id) = direct {
        return Some(id.to_string());
    }
    let data = body.get("data")?;
    data.get("run_id")
        .or_else(|| data.get("run_uuid"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

fn keyed_list(raw: Value, keys: &[&str]) -> Vec<Value> {
    match raw {
        Value::Array(items) => items,
        Value::Object(map) => {
            for key in keys {
                if let Some(Value::Array(items)) = map.get(*key) {
                    if !items.is_empty() {
                        return items.clone();
                    }
                }
            }
            // A present-but-empty list under a known key is still a list.
            for key in keys {
                if let Some(Value::Array(items)) = map.get(*key) {
                    return items.clone();
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Normalize opportunity search results to a list.
pub fn opportunities_list(raw: Value) -> Vec<Value> {
    keyed_list(raw, &["opportunities", "results", "data"])
}

/// Normalize buyer search results to a list.
pub fn buyers_list(raw: Value) -> Vec<Value> {
    keyed_list(raw, &["buyers", "results", "data"])
}

/// Normalize a contacts response to a list.
pub fn contacts_list(raw: Value) -> Vec<Value> {
    keyed_list(raw, &["contacts", "results", "data"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_nested_envelope() {
        let body = json!({
            "success": true,
            "data": { "output_vars": { "output": { "opportunities": [{"id": 1}] } } }
        });
        let out = unwrap_envelope("opportunity-search", body).unwrap();
        assert_eq!(opportunities_list(out).len(), 1);
    }

    #[test]
    fn unwrap_decodes_json_strings() {
        let body = json!({
            "success": true,
            "data": { "output_vars": { "output": "{\"buyers\": [{\"id\": \"B1\"}]}" } }
        });
        let out = unwrap_envelope("buyer-search", body).unwrap();
        assert_eq!(buyers_list(out).len(), 1);
    }

    #[test]
    fn envelope_error_raises() {
        let body = json!({
            "success": false,
            "error": { "message": "rate limited" }
        });
        let err = unwrap_envelope("buyer-search", body).unwrap_err();
        assert!(matches!(err, SignalsError::Api { .. }));
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn embedded_error_payload_raises() {
        let body = json!({
            "success": true,
            "data": { "output_vars": { "output": { "error": "upstream down", "status_code": 503 } } }
        });
        let err = unwrap_envelope("buyer-profile", body).unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn normalizers_collapse_both_shapes() {
        assert_eq!(opportunities_list(json!([{"id": 1}, {"id": 2}])).len(), 2);
        assert_eq!(
            contacts_list(json!({"contacts": [{"name": "Jane"}]})).len(),
            1
        );
        assert_eq!(buyers_list(json!({"results": [{"id": "B1"}]})).len(), 1);
        assert_eq!(buyers_list(json!({"data": []})).len(), 0);
        assert_eq!(buyers_list(json!("not a list")).len(), 0);
    }

    #[test]
    fn run_id_extraction_handles_both_nestings() {
        assert_eq!(
            extract_run_id(&json!({"run_id": "r-1"})).as_deref(),
            Some("r-1")
        );
        assert_eq!(
            extract_run_id(&json!({"data": {"run_uuid": "r-2"}})).as_deref(),
            Some("r-2")
        );
        assert_eq!(extract_run_id(&json!({"status": "submitted"})), None);
    }
}
