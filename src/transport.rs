//! Capability transports
//!
//! One interface over the three ways a capability is reached:
//! - **Inference**: Ollama-compatible `/api/generate` endpoint
//! - **Process**: a command line spawned per call, task appended as last arg
//! - **Builtin**: an in-process handler
//!
//! Transports return raw responses; shaping them into a payload is the
//! dispatcher's job. Timeouts are also enforced by the dispatcher.

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::error::TransportError;
use crate::memory::PatternStore;

/// Unshaped response from a transport
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

/// Transport to a single capability
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short label for logs
    fn kind(&self) -> &'static str;

    /// Send `task` and wait for the raw response
    async fn call(&self, task: &str) -> Result<RawResponse, TransportError>;
}

/// Text completion over an Ollama-compatible HTTP endpoint
pub struct InferenceTransport {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl InferenceTransport {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature: 0.3,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Transport for InferenceTransport {
    fn kind(&self) -> &'static str {
        "inference"
    }

    async fn call(&self, task: &str) -> Result<RawResponse, TransportError> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": task,
                "stream": false,
                "options": {
                    "temperature": self.temperature,
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("{}: {}", status, body)));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Parse(e.to_string()))?;

        Ok(RawResponse::Text(result.response))
    }
}

/// Subprocess invoked once per call
pub struct ProcessTransport {
    program: String,
    args: Vec<String>,
}

impl ProcessTransport {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
        }
    }

    /// Parse a whitespace-separated command line such as `python worker.py`
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts.map(str::to_string).collect()))
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn kind(&self) -> &'static str {
        "process"
    }

    async fn call(&self, task: &str) -> Result<RawResponse, TransportError> {
        debug!(program = %self.program, "Spawning capability process");

        // kill_on_drop: a timed-out call drops this future and must not leak the child
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(task)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransportError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(TransportError::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(RawResponse::Bytes(output.stdout))
    }
}

type Handler = Arc<dyn Fn(&str) -> Result<RawResponse, TransportError> + Send + Sync>;

/// In-process handler
#[derive(Clone)]
pub struct BuiltinTransport {
    handler: Handler,
}

impl BuiltinTransport {
    pub fn new(
        handler: impl Fn(&str) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Returns the task unchanged
    pub fn echo() -> Self {
        Self::new(|task| Ok(RawResponse::Text(task.to_string())))
    }
}

#[async_trait]
impl Transport for BuiltinTransport {
    fn kind(&self) -> &'static str {
        "builtin"
    }

    async fn call(&self, task: &str) -> Result<RawResponse, TransportError> {
        (self.handler)(task)
    }
}

/// Recalls recent patterns and forwards the enriched prompt
pub struct MemoryRecallTransport {
    store: Arc<PatternStore>,
    inner: Arc<dyn Transport>,
    recall: usize,
}

impl MemoryRecallTransport {
    pub fn new(store: Arc<PatternStore>, inner: Arc<dyn Transport>) -> Self {
        Self {
            store,
            inner,
            recall: 10,
        }
    }

    pub fn with_recall(mut self, recall: usize) -> Self {
        self.recall = recall;
        self
    }

    /// Prompt with the recalled patterns prepended
    pub fn build_prompt(&self, task: &str) -> String {
        let recent = self.store.list_recent(self.recall);

        let context = if recent.is_empty() {
            "No previous memories".to_string()
        } else {
            recent
                .iter()
                .map(|p| format!("Previous: {} ({})", p.name, p.source_domain))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "Context from previous conversations:\n{}\n\nUser now asks: \"{}\"\n\n\
             Provide a response that references relevant past interactions.",
            context, task
        )
    }
}

#[async_trait]
impl Transport for MemoryRecallTransport {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn call(&self, task: &str) -> Result<RawResponse, TransportError> {
        let prompt = self.build_prompt(task);
        self.inner.call(&prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Pattern;

    #[test]
    fn test_command_line_parsing() {
        let t = ProcessTransport::from_command_line("python  workers/search.py --json").unwrap();
        assert_eq!(t.program, "python");
        assert_eq!(t.args, vec!["workers/search.py", "--json"]);
        assert!(ProcessTransport::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_builtin_echo() {
        let t = BuiltinTransport::echo();
        assert_eq!(t.call("hi").await.unwrap(), RawResponse::Text("hi".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_appends_task() {
        let t = ProcessTransport::new("echo", vec!["task:".to_string()]);
        let out = t.call("ping").await.unwrap();
        assert_eq!(out, RawResponse::Bytes(b"task: ping\n".to_vec()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_non_zero_exit() {
        let t = ProcessTransport::new("false", vec![]);
        assert!(matches!(
            t.call("x").await,
            Err(TransportError::NonZeroExit { .. })
        ));
    }

    #[tokio::test]
    async fn test_process_spawn_failure() {
        let t = ProcessTransport::new("definitely-not-a-real-binary-4821", vec![]);
        assert!(matches!(t.call("x").await, Err(TransportError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_memory_recall_prompt() {
        let store = Arc::new(PatternStore::open_in_memory().unwrap());
        let recall = MemoryRecallTransport::new(store.clone(), Arc::new(BuiltinTransport::echo()));

        let prompt = recall.build_prompt("what do I like?");
        assert!(prompt.contains("No previous memories"));

        store.append(Pattern::new("Flow over features", "design", "structure", 0.9));
        let out = recall.call("what do I like?").await.unwrap();
        match out {
            RawResponse::Text(text) => {
                assert!(text.contains("Previous: Flow over features (design)"));
                assert!(text.contains("\"what do I like?\""));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
