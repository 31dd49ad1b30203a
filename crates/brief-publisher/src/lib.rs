//! Publisher client: create and update pages in the external document
//! workspace.
//!
//! Transient failures (5xx, transport, timeout) retry up to three times
//! with 2 s / 5 s / 10 s delays. Client errors (4xx) never retry; a bad
//! request will not get better by repeating it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("workspace returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("create response carried neither url nor id")]
    MissingPageRef,
}

pub type PublisherResult<T> = Result<T, PublisherError>;

/// Whether an error is worth retrying: server-side failures and transport
/// problems only.
pub fn is_retryable(error: &PublisherError) -> bool {
    match error {
        PublisherError::Status { status, .. } => (500..600).contains(status),
        PublisherError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        PublisherError::MissingPageRef => false,
    }
}

/// Reference to a workspace page after a create call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRef {
    pub id: Option<String>,
    pub url: Option<String>,
}

impl PageRef {
    /// Stable page URL: the workspace's own URL when present, otherwise a
    /// deterministic `notion.so/<id-without-dashes>` form.
    pub fn resolved_url(&self) -> Option<String> {
        if let Some(url) = &self.url {
            if !url.trim().is_empty() {
                return Some(url.clone());
            }
        }
        self.id
            .as_ref()
            .map(|id| format!("https://notion.so/{}", id.replace('-', "")))
    }
}

/// Patch for an existing page: either properties, content, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn create_page(
        &self,
        title: &str,
        body_markdown: &str,
        parent_id: &str,
    ) -> PublisherResult<PageRef>;

    async fn update_page(&self, page_id: &str, patch: &PagePatch) -> PublisherResult<()>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub base_url: String,
    pub api_key: String,
    /// Delays between retry attempts. Overridable for tests.
    pub retry_delays: Vec<Duration>,
}

impl PublisherConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry_delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
        }
    }
}

pub struct HttpPublisherClient {
    client: reqwest::Client,
    config: PublisherConfig,
}

impl HttpPublisherClient {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn post_pages(&self, body: &Value) -> PublisherResult<Value> {
        let url = format!("{}/pages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .timeout(Duration::from_secs(30))
            .json(body)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn patch_page(&self, page_id: &str, body: &Value) -> PublisherResult<Value> {
        let url = format!(
            "{}/pages/{}",
            self.config.base_url.trim_end_matches('/'),
            page_id
        );
        let response = self
            .client
            .patch(&url)
            .header("x-api-key", &self.config.api_key)
            .timeout(Duration::from_secs(30))
            .json(body)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn check_status(response: reqwest::Response) -> PublisherResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PublisherError::Status {
                status: status.as_u16(),
                detail: detail.chars().take(500).collect(),
            });
        }
        Ok(response.json().await.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Publisher for HttpPublisherClient {
    async fn create_page(
        &self,
        title: &str,
        body_markdown: &str,
        parent_id: &str,
    ) -> PublisherResult<PageRef> {
        let body = json!({
            "parent": { "page_id": parent_id },
            "pages": [{
                "properties": { "title": title },
                "content": body_markdown,
            }],
        });

        let response = with_retry("create_page", &self.config.retry_delays, || {
            self.post_pages(&body)
        })
        .await?;

        let page = page_from_response(response).ok_or(PublisherError::MissingPageRef)?;
        tracing::info!(url = page.resolved_url().as_deref().unwrap_or(""), "page created");
        Ok(page)
    }

    async fn update_page(&self, page_id: &str, patch: &PagePatch) -> PublisherResult<()> {
        let body = serde_json::to_value(patch).unwrap_or(Value::Null);
        with_retry("update_page", &self.config.retry_delays, || {
            self.patch_page(page_id, &body)
        })
        .await?;
        Ok(())
    }
}

/// Run `op` up to `1 + delays.len()` times, sleeping the next delay after
/// each retryable failure.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    delays: &[Duration],
    mut op: F,
) -> PublisherResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = PublisherResult<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_retryable(&error) || attempt >= delays.len() {
                    return Err(error);
                }
                let delay = delays[attempt];
                attempt += 1;
                tracing::warn!(
                    label,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    error = %error,
                    "transient publisher failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Unwrap the workspace SDK's varied create-response structures down to a
/// single page object: a `pages` list, a bare object, or a URL string.
pub fn page_from_response(response: Value) -> Option<PageRef> {
    let inner = match &response {
        Value::Array(items) => items.first().cloned()?,
        other => other.clone(),
    };

    let page = match &inner {
        Value::Object(map) if map.contains_key("pages") => {
            match map.get("pages") {
                Some(Value::Array(pages)) => pages.first().cloned()?,
                _ => inner.clone(),
            }
        }
        Value::String(s) if s.starts_with("http") => {
            return Some(PageRef {
                id: None,
                url: Some(s.clone()),
            })
        }
        _ => inner.clone(),
    };

    let object = page.as_object()?;
    let url = ["url", "page_url", "public_url"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(|s| s.to_string());
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    if url.is_none() && id.is_none() {
        return None;
    }
    Some(PageRef { id, url })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn url_synthesis_is_deterministic() {
        let page = PageRef {
            id: Some("30a845c1-6a83-81d8-9a22-f2360c6b1093".to_string()),
            url: None,
        };
        assert_eq!(
            page.resolved_url().as_deref(),
            Some("https://notion.so/30a845c16a8381d89a22f2360c6b1093")
        );

        let with_url = PageRef {
            id: Some("abc".to_string()),
            url: Some("https://workspace.example/p/abc".to_string()),
        };
        assert_eq!(
            with_url.resolved_url().as_deref(),
            Some("https://workspace.example/p/abc")
        );
    }

    #[test]
    fn response_unwrapping_handles_the_known_shapes() {
        let nested = json!([{ "pages": [{ "id": "p-1", "url": "https://n/p1" }] }]);
        assert_eq!(
            page_from_response(nested).unwrap().url.as_deref(),
            Some("https://n/p1")
        );

        let flat = json!({ "id": "p-2" });
        assert_eq!(page_from_response(flat).unwrap().id.as_deref(), Some("p-2"));

        let url_only = json!("https://n/p3");
        assert_eq!(
            page_from_response(url_only).unwrap().url.as_deref(),
            Some("https://n/p3")
        );

        assert!(page_from_response(json!({ "ok": true })).is_none());
    }

    #[test]
    fn retry_classification() {
        assert!(is_retryable(&PublisherError::Status {
            status: 503,
            detail: String::new()
        }));
        assert!(!is_retryable(&PublisherError::Status {
            status: 404,
            detail: String::new()
        }));
        assert!(!is_retryable(&PublisherError::Status {
            status: 422,
            detail: String::new()
        }));
        assert!(!is_retryable(&PublisherError::MissingPageRef));
    }

    #[tokio::test]
    async fn retry_stops_after_the_delay_budget() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let delays = [Duration::from_millis(1); 3];

        let result: PublisherResult<()> = with_retry("test", &delays, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PublisherError::Status {
                    status: 500,
                    detail: "down".to_string(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4, "initial try + 3 retries");
    }

    #[tokio::test]
    async fn client_errors_never_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let delays = [Duration::from_millis(1); 3];

        let result: PublisherResult<()> = with_retry("test", &delays, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PublisherError::Status {
                    status: 400,
                    detail: "bad".to_string(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let delays = [Duration::from_millis(1); 3];

        let result = with_retry("test", &delays, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PublisherError::Status {
                        status: 502,
                        detail: "bad gateway".to_string(),
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
