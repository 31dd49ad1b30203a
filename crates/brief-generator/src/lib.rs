//! Generator client: drives the LLM sub-agent CLI.
//!
//! Two modes share one subprocess supervisor. Text mode pipes a combined
//! system/user prompt over stdin and returns stdout. Tool mode adds a
//! temporary tool-server config and an allow-list so the sub-agent can
//! reach the workspace publisher, and nothing else.
//!
//! The supervisor watches the run's cancellation token and the mode
//! deadline alongside the child; either signal kills the subprocess
//! within the half-second window the pipeline promises.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("{0} not set — the generator credential is required at startup")]
    MissingCredential(String),
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{label} exited {code}: {detail}")]
    NonZeroExit {
        label: String,
        code: i32,
        detail: String,
    },
    #[error("{label} returned empty output")]
    EmptyOutput { label: String },
    #[error("{label} timed out after {secs}s")]
    Timeout { label: String, secs: u64 },
    #[error("generator subprocess killed by cancellation")]
    Cancelled,
}

pub type GeneratorResult<T> = Result<T, GeneratorError>;

/// Tool surface handed to the sub-agent in tool mode. The config is
/// materialized as a temp file for the CLI; the allow-list restricts the
/// sub-agent to the publisher's page tools.
#[derive(Debug, Clone)]
pub struct ToolAccess {
    pub server_name: String,
    pub server_url: String,
    pub api_key: String,
}

/// Uniform interface over the sub-agent transports.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Text mode: returns the sub-agent's stdout. Hard-fails on non-zero
    /// exit, empty output, timeout, or cancellation.
    async fn generate(
        &self,
        system_prompt: &str,
        user_content: &str,
        cancel: &CancellationToken,
    ) -> GeneratorResult<String>;

    /// Tool mode: same contract with a restricted tool surface exposed.
    async fn generate_with_tools(
        &self,
        system_prompt: &str,
        user_content: &str,
        tools: &ToolAccess,
        allowed_tools: &[String],
        cancel: &CancellationToken,
    ) -> GeneratorResult<String>;
}

// ============================================================================
// CLI implementation
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Sub-agent binary on PATH.
    pub command: String,
    pub model: String,
    pub max_output_tokens: u32,
    /// Env var holding the sub-agent credential.
    pub credential_env: String,
    pub text_timeout: Duration,
    pub tool_timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: "subagent".to_string(),
            model: "default".to_string(),
            max_output_tokens: 16_000,
            credential_env: "GENERATOR_OAUTH_TOKEN".to_string(),
            text_timeout: Duration::from_secs(300),
            tool_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
pub struct CliGenerator {
    config: GeneratorConfig,
    credential: String,
}

impl CliGenerator {
    /// Resolve the credential at construction. A missing credential is a
    /// fatal init error, not a per-call failure.
    pub fn new(config: GeneratorConfig) -> GeneratorResult<Self> {
        let credential = std::env::var(&config.credential_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| GeneratorError::MissingCredential(config.credential_env.clone()))?;
        tracing::info!(command = %config.command, model = %config.model, "generator backend ready");
        Ok(Self { config, credential })
    }

    async fn run_cli(
        &self,
        extra_args: &[String],
        prompt: String,
        timeout: Duration,
        label: &str,
        cancel: &CancellationToken,
    ) -> GeneratorResult<String> {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg("-p")
            .arg("--model")
            .arg(&self.config.model)
            .args(extra_args)
            .env(&self.config.credential_env, &self.credential)
            .env(
                "GENERATOR_MAX_OUTPUT_TOKENS",
                self.config.max_output_tokens.to_string(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| GeneratorError::Spawn {
            command: self.config.command.clone(),
            source,
        })?;

        // Drain stdout/stderr from the start so a chatty child can never
        // fill a pipe while we are still feeding the prompt.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            // Close stdin so the CLI starts generating.
            drop(stdin);
        }

        // Supervise: first of exit / cancellation / deadline wins. The kill
        // path reaps the child before returning so no zombie lingers.
        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                tracing::warn!(label, "cancellation fired, killing generator subprocess");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(GeneratorError::Cancelled);
            }
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(label, secs = timeout.as_secs(), "generator subprocess deadline");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(GeneratorError::Timeout { label: label.to_string(), secs: timeout.as_secs() });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let detail = if stderr.trim().is_empty() {
                stdout.trim().chars().take(500).collect()
            } else {
                stderr.trim().to_string()
            };
            return Err(GeneratorError::NonZeroExit {
                label: label.to_string(),
                code: status.code().unwrap_or(-1),
                detail,
            });
        }

        let output = stdout.trim().to_string();
        if output.is_empty() {
            return Err(GeneratorError::EmptyOutput {
                label: label.to_string(),
            });
        }

        brief_observability::log_payload_event("generator", label, &output);
        Ok(output)
    }

    /// Materialize the tool-server config the CLI expects. The temp file
    /// lives as long as the returned handle.
    fn write_tool_config(tools: &ToolAccess) -> GeneratorResult<(tempfile::NamedTempFile, PathBuf)> {
        let config = json!({
            "toolServers": {
                tools.server_name.clone(): {
                    "type": "http",
                    "url": tools.server_url,
                    "headers": { "X-API-Key": tools.api_key },
                }
            }
        });
        let file = tempfile::Builder::new()
            .prefix("tool_config_")
            .suffix(".json")
            .tempfile()?;
        std::fs::write(file.path(), serde_json::to_vec(&config)?)?;
        let path = file.path().to_path_buf();
        Ok((file, path))
    }
}

#[async_trait]
impl Generator for CliGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_content: &str,
        cancel: &CancellationToken,
    ) -> GeneratorResult<String> {
        let prompt = format!("{system_prompt}\n\n---\n\n{user_content}");
        self.run_cli(&[], prompt, self.config.text_timeout, "subagent", cancel)
            .await
    }

    async fn generate_with_tools(
        &self,
        system_prompt: &str,
        user_content: &str,
        tools: &ToolAccess,
        allowed_tools: &[String],
        cancel: &CancellationToken,
    ) -> GeneratorResult<String> {
        let prompt = format!("{system_prompt}\n\n---\n\n{user_content}");
        let (_config_file, config_path) = Self::write_tool_config(tools)?;

        let mut args = vec![
            "--tool-config".to_string(),
            config_path.display().to_string(),
        ];
        if !allowed_tools.is_empty() {
            args.push("--allowed-tools".to_string());
            args.push(allowed_tools.join(","));
        }

        self.run_cli(
            &args,
            prompt,
            self.config.tool_timeout,
            "subagent (with tools)",
            cancel,
        )
        .await
    }
}

// ============================================================================
// JSON extraction
// ============================================================================

/// Extract the first JSON object from an LLM response.
///
/// Ladder: parse the raw text, then the first fenced ```json block, then
/// the first `{…}` span. Unrecoverable output yields an empty map so
/// callers can fill defaults.
pub fn extract_json(text: &str) -> Map<String, Value> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return map;
    }

    if let Ok(fenced) = regex::Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```") {
        if let Some(captures) = fenced.captures(text) {
            if let Some(block) = captures.get(1) {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(block.as_str()) {
                    return map;
                }
            }
        }
    }

    if let Ok(bare) = regex::Regex::new(r"\{[\s\S]*\}") {
        if let Some(found) = bare.find(text) {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(found.as_str()) {
                return map;
            }
        }
    }

    Map::new()
}
