//! Invocation Dispatcher
//!
//! Calls a capability's transport under a hard timeout and normalizes
//! whatever comes back into a single `Payload` shape. Transport failures
//! never escape as errors: they become failed `InvocationResult`s and mark
//! the capability unhealthy. There is no automatic retry.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{KernelError, KernelResult, TransportError};
use crate::registry::{CapabilityRegistry, HealthState};
use crate::transport::{RawResponse, Transport};

/// Normalized capability response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Structured(serde_json::Value),
    Error(String),
}

impl Payload {
    pub fn is_error(&self) -> bool {
        matches!(self, Payload::Error(_))
    }

    /// Text rendering of the payload
    pub fn as_text(&self) -> String {
        match self {
            Payload::Text(t) => t.clone(),
            Payload::Structured(v) => v.to_string(),
            Payload::Error(e) => e.clone(),
        }
    }

    /// Shape a raw transport response
    pub fn normalize(raw: RawResponse) -> Self {
        match raw {
            RawResponse::Text(text) => Self::from_text(text),
            RawResponse::Bytes(bytes) => Self::from_text(String::from_utf8_lossy(&bytes).into_owned()),
            RawResponse::Json(value) => Self::from_json(value),
        }
    }

    fn from_text(text: String) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Payload::Error("Empty response".to_string());
        }

        // Worker scripts print a JSON object on stdout
        if trimmed.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
                return Self::from_json(value);
            }
        }

        Payload::Text(trimmed.to_string())
    }

    fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::String(s) => Self::from_text(s),
            Value::Null => Payload::Error("Empty response".to_string()),
            Value::Object(ref map) => {
                let failed = map.get("success").and_then(Value::as_bool) == Some(false)
                    || map.get("status").and_then(Value::as_str) == Some("error");

                if let Some(err) = map.get("error").and_then(Value::as_str) {
                    if failed || !has_text_field(map) {
                        return Payload::Error(err.to_string());
                    }
                }
                if failed {
                    let message = map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("Capability reported failure");
                    return Payload::Error(message.to_string());
                }

                for key in TEXT_FIELDS {
                    if let Some(text) = map.get(*key).and_then(Value::as_str) {
                        if !text.trim().is_empty() {
                            return Payload::Text(text.trim().to_string());
                        }
                    }
                }

                Payload::Structured(value)
            }
            other => Payload::Structured(other),
        }
    }
}

/// Fields carrying the primary text answer, in preference order
const TEXT_FIELDS: &[&str] = &["content", "response", "output", "result", "message"];

fn has_text_field(map: &serde_json::Map<String, serde_json::Value>) -> bool {
    TEXT_FIELDS
        .iter()
        .any(|k| map.get(*k).and_then(|v| v.as_str()).is_some_and(|s| !s.trim().is_empty()))
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub capability_id: String,
    pub success: bool,
    pub payload: Payload,
    pub latency_ms: u64,
    pub worker_label: String,
}

/// Dispatches tasks to registered capabilities
pub struct InvocationDispatcher {
    registry: Arc<CapabilityRegistry>,
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
    default_timeout: Duration,
}

impl InvocationDispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            transports: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Attach the transport used for `capability_id`
    pub fn bind(&self, capability_id: &str, transport: Arc<dyn Transport>) {
        self.transports
            .write()
            .insert(capability_id.to_string(), transport);
    }

    pub fn is_bound(&self, capability_id: &str) -> bool {
        self.transports.read().contains_key(capability_id)
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Invoke a capability with `task`
    ///
    /// Errors only on precondition violations: unknown capability or empty task.
    pub async fn invoke(&self, capability_id: &str, task: &str) -> KernelResult<InvocationResult> {
        let descriptor = self.registry.lookup(capability_id)?;
        if task.trim().is_empty() {
            return Err(KernelError::EmptyTask);
        }

        let timeout = descriptor.timeout.unwrap_or(self.default_timeout);
        let transport = self.transports.read().get(capability_id).cloned();
        let start = Instant::now();

        let outcome = match transport {
            Some(transport) => {
                debug!(capability = %capability_id, kind = transport.kind(), "Dispatching");
                match tokio::time::timeout(timeout, transport.call(task)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(timeout)),
                }
            }
            None => Err(TransportError::Builtin(format!(
                "No transport bound for {}",
                capability_id
            ))),
        };

        let latency_ms = start.elapsed().as_millis() as u64;

        let payload = match outcome {
            Ok(raw) => Payload::normalize(raw),
            Err(e) => {
                warn!(capability = %capability_id, latency_ms, "Dispatch failed: {}", e);
                Payload::Error(e.to_string())
            }
        };

        let success = !payload.is_error();
        self.registry.mark_health(
            capability_id,
            if success { HealthState::Active } else { HealthState::Error },
        );
        self.registry.record_invocation(capability_id, success, latency_ms);

        Ok(InvocationResult {
            capability_id: descriptor.id,
            success,
            payload,
            latency_ms,
            worker_label: descriptor.display_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CapabilityCategory, CapabilityDescriptor};
    use crate::transport::BuiltinTransport;
    use async_trait::async_trait;
    use serde_json::json;

    struct SlowTransport(Duration);

    #[async_trait]
    impl Transport for SlowTransport {
        fn kind(&self) -> &'static str {
            "slow"
        }

        async fn call(&self, _task: &str) -> Result<RawResponse, TransportError> {
            tokio::time::sleep(self.0).await;
            Ok(RawResponse::Text("too late".to_string()))
        }
    }

    fn dispatcher() -> InvocationDispatcher {
        let registry = Arc::new(
            CapabilityRegistry::from_table([
                CapabilityDescriptor::new("echo", CapabilityCategory::Builtin, "echo").with_name("Echo"),
                CapabilityDescriptor::new("slow", CapabilityCategory::Builtin, "slow")
                    .with_timeout(Duration::from_millis(20)),
                CapabilityDescriptor::new("broken", CapabilityCategory::Builtin, "broken"),
                CapabilityDescriptor::new("unbound", CapabilityCategory::Builtin, "unbound"),
            ])
            .unwrap(),
        );
        let d = InvocationDispatcher::new(registry, Duration::from_secs(5));
        d.bind("echo", Arc::new(BuiltinTransport::echo()));
        d.bind("slow", Arc::new(SlowTransport(Duration::from_secs(2))));
        d.bind(
            "broken",
            Arc::new(BuiltinTransport::new(|_| {
                Err(TransportError::Builtin("boom".to_string()))
            })),
        );
        d
    }

    #[tokio::test]
    async fn test_success_marks_active() {
        let d = dispatcher();
        let result = d.invoke("echo", "hello").await.unwrap();
        assert!(result.success);
        assert_eq!(result.payload, Payload::Text("hello".to_string()));
        assert_eq!(result.worker_label, "Echo");
        assert_eq!(d.registry().lookup("echo").unwrap().health_state, HealthState::Active);
    }

    #[tokio::test]
    async fn test_unknown_capability_is_error() {
        let d = dispatcher();
        assert!(matches!(
            d.invoke("ghost", "hello").await,
            Err(KernelError::CapabilityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_task_is_error() {
        let d = dispatcher();
        assert!(matches!(d.invoke("echo", "   ").await, Err(KernelError::EmptyTask)));
    }

    #[tokio::test]
    async fn test_timeout_marks_error() {
        let d = dispatcher();
        let result = d.invoke("slow", "hello").await.unwrap();
        assert!(!result.success);
        assert!(matches!(result.payload, Payload::Error(ref e) if e.contains("Timed out")));
        assert!(result.latency_ms < 2000);
        assert_eq!(d.registry().lookup("slow").unwrap().health_state, HealthState::Error);
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_raised() {
        let d = dispatcher();
        let result = d.invoke("broken", "hello").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.payload, Payload::Error("Builtin handler failed: boom".to_string()));

        let result = d.invoke("unbound", "hello").await.unwrap();
        assert!(!result.success);

        let snap = d.registry().snapshot();
        let broken = snap.iter().find(|s| s.descriptor.id == "broken").unwrap();
        assert_eq!(broken.failures, 1);
    }

    #[test]
    fn test_normalize_shapes() {
        assert_eq!(
            Payload::normalize(RawResponse::Json(json!({"response": " hi "}))),
            Payload::Text("hi".to_string())
        );
        assert_eq!(
            Payload::normalize(RawResponse::Bytes(br#"{"success": true, "content": "done"}"#.to_vec())),
            Payload::Text("done".to_string())
        );
        assert_eq!(
            Payload::normalize(RawResponse::Json(json!({"success": false, "error": "no app"}))),
            Payload::Error("no app".to_string())
        );
        assert_eq!(
            Payload::normalize(RawResponse::Json(json!({"status": "error", "message": "bad"}))),
            Payload::Error("bad".to_string())
        );
        assert_eq!(
            Payload::normalize(RawResponse::Text("  ".to_string())),
            Payload::Error("Empty response".to_string())
        );

        let stats = json!({"cpu": 12.5, "ram": 40});
        assert_eq!(
            Payload::normalize(RawResponse::Json(stats.clone())),
            Payload::Structured(stats)
        );
        assert_eq!(
            Payload::normalize(RawResponse::Text("{not json".to_string())),
            Payload::Text("{not json".to_string())
        );
    }
}
