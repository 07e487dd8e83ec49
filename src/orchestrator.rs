//! Orchestration Facade
//!
//! Single entry point: route → dispatch (or reason) → govern → respond.
//! Every service is constructed once and injected; there are no globals.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::{ChainOutcome, ReasoningChain};
use crate::config::Config;
use crate::dispatcher::InvocationDispatcher;
use crate::error::KernelError;
use crate::governor::{PolicyDomain, PolicyGovernor};
use crate::memory::PatternStore;
use crate::registry::{CapabilityCategory, CapabilityRegistry};
use crate::router::{IntentRouter, PredicateTable};
use crate::transport::{
    BuiltinTransport, InferenceTransport, MemoryRecallTransport, ProcessTransport, Transport,
};

/// Unit of work entering the kernel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

impl TaskRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Chain details, present only when the chain ran
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub iterations: u32,
    pub complete: bool,
    /// Root named by the final iteration
    pub root_found: Option<String>,
}

impl From<&ChainOutcome> for ChainSummary {
    fn from(outcome: &ChainOutcome) -> Self {
        Self {
            iterations: outcome.iterations(),
            complete: outcome.complete(),
            root_found: outcome
                .state
                .history
                .last()
                .and_then(|step| step.reflection.found_root.clone()),
        }
    }
}

/// Response returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelResponse {
    pub success: bool,
    /// Governor-sanitized answer
    pub content: String,
    /// Capability that produced, or attempted, the answer
    pub worker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KernelResponse {
    fn ok(content: String, worker: &str) -> Self {
        Self {
            success: true,
            content,
            worker: worker.to_string(),
            chain: None,
            error: None,
        }
    }

    fn failure(worker: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            worker: worker.to_string(),
            chain: None,
            error: Some(error.into()),
        }
    }

    fn with_chain(mut self, summary: ChainSummary) -> Self {
        self.chain = Some(summary);
        self
    }
}

/// Ties router, dispatcher, chain and governor together
pub struct Orchestrator {
    router: IntentRouter,
    dispatcher: Arc<InvocationDispatcher>,
    governor: Arc<PolicyGovernor>,
    store: Arc<PatternStore>,
    chain: Option<ReasoningChain>,
}

impl Orchestrator {
    pub fn new(
        router: IntentRouter,
        dispatcher: Arc<InvocationDispatcher>,
        governor: Arc<PolicyGovernor>,
        store: Arc<PatternStore>,
    ) -> Self {
        Self {
            router,
            dispatcher,
            governor,
            store,
            chain: None,
        }
    }

    /// Enable the reasoning chain for complex tasks
    pub fn with_chain(mut self, chain: ReasoningChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Wire every service from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = match PatternStore::open(&config.db_path) {
            Ok(store) => store,
            Err(e) => {
                warn!("Pattern store unavailable ({}), using in-memory store", e);
                PatternStore::open_in_memory().context("Failed to open in-memory pattern store")?
            }
        };
        let store = Arc::new(store);

        let registry = Arc::new(CapabilityRegistry::from_table(config.load_capabilities()?)?);
        for id in [&config.default_capability, &config.reasoning_capability] {
            if !registry.contains(id) {
                return Err(KernelError::InvalidConfig(format!(
                    "capability '{}' is not in the capability table",
                    id
                ))
                .into());
            }
        }

        let dispatcher = Arc::new(InvocationDispatcher::new(registry.clone(), config.dispatch_timeout));
        bind_transports(&dispatcher, &registry, &store, config);

        let table = PredicateTable::standard(&config.default_capability);
        for id in table.capability_ids() {
            if !registry.contains(&id) {
                warn!(capability = %id, "Routing table targets an unregistered capability");
            }
        }
        let router = IntentRouter::new(table).with_known_capabilities(registry.ids());

        let governor = Arc::new(PolicyGovernor::with_constitution());
        governor.set_enabled(config.governor_enabled);

        let mut orchestrator = Self::new(router, dispatcher.clone(), governor, store.clone());
        if config.chain_enabled {
            orchestrator =
                orchestrator.with_chain(ReasoningChain::new(dispatcher, store, config.chain_config()));
        }

        info!(
            capabilities = registry.len(),
            chain = config.chain_enabled,
            governor = config.governor_enabled,
            "Orchestrator ready"
        );
        Ok(orchestrator)
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        self.dispatcher.registry()
    }

    pub fn store(&self) -> &Arc<PatternStore> {
        &self.store
    }

    pub fn governor(&self) -> &Arc<PolicyGovernor> {
        &self.governor
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    /// Process one task to completion
    pub async fn handle(&self, request: &TaskRequest) -> KernelResponse {
        self.handle_with_cancel(request, &AtomicBool::new(false)).await
    }

    /// Process one task; `cancel` stops a running chain between iterations
    pub async fn handle_with_cancel(&self, request: &TaskRequest, cancel: &AtomicBool) -> KernelResponse {
        let task = request.text.trim();
        if task.is_empty() {
            return KernelResponse::failure(self.router.default_id(), KernelError::EmptyTask.to_string());
        }

        let route = self.router.resolve(task);
        info!(
            capability = %route.capability_id,
            reasoning = %route.reasoning,
            complexity = ?route.complexity,
            "Task routed"
        );

        match &self.chain {
            Some(chain) if route.needs_chain() => self.reason(chain, task, cancel).await,
            _ => self.dispatch(&route.capability_id, task).await,
        }
    }

    async fn reason(&self, chain: &ReasoningChain, task: &str, cancel: &AtomicBool) -> KernelResponse {
        let reasoning_id = chain.config().reasoning_capability.clone();

        let outcome = match chain.run_with_cancel(task, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => return KernelResponse::failure(&reasoning_id, e.to_string()),
        };
        let summary = ChainSummary::from(&outcome);

        match (outcome.output(), outcome.worker()) {
            (Some(thought), Some(worker)) => {
                let content = self.govern(thought.to_string(), worker);
                KernelResponse::ok(content, worker).with_chain(summary)
            }
            _ => {
                let error = if outcome.cancelled {
                    "Cancelled before any thought was produced"
                } else {
                    "No iteration produced a thought"
                };
                KernelResponse::failure(&reasoning_id, error).with_chain(summary)
            }
        }
    }

    async fn dispatch(&self, capability_id: &str, task: &str) -> KernelResponse {
        let result = match self.dispatcher.invoke(capability_id, task).await {
            Ok(result) => result,
            Err(e) => return KernelResponse::failure(capability_id, e.to_string()),
        };
        if result.success {
            let content = self.govern(result.payload.as_text(), &result.capability_id);
            return KernelResponse::ok(content, &result.capability_id);
        }

        let error = result.payload.as_text();
        let default_id = self.router.default_id();
        if capability_id == default_id {
            return KernelResponse::failure(capability_id, error);
        }

        debug!(from = %capability_id, to = %default_id, "Dispatch failed, falling back: {}", error);
        match self.dispatcher.invoke(default_id, task).await {
            Ok(fallback) if fallback.success => {
                let content = self.govern(fallback.payload.as_text(), &fallback.capability_id);
                KernelResponse::ok(content, &fallback.capability_id)
            }
            Ok(fallback) => KernelResponse::failure(
                capability_id,
                format!("{}; fallback {} failed: {}", error, default_id, fallback.payload.as_text()),
            ),
            Err(e) => KernelResponse::failure(capability_id, format!("{}; fallback {}: {}", error, default_id, e)),
        }
    }

    /// Apply the rules of the domain the producing capability emits
    fn govern(&self, content: String, capability_id: &str) -> String {
        let domain = self
            .registry()
            .lookup(capability_id)
            .map(|d| d.domain)
            .unwrap_or(PolicyDomain::Text);
        self.governor.enforce(content, domain)
    }
}

/// Attach a transport to every registered capability
fn bind_transports(
    dispatcher: &InvocationDispatcher,
    registry: &CapabilityRegistry,
    store: &Arc<PatternStore>,
    config: &Config,
) {
    let inference: Arc<dyn Transport> =
        Arc::new(InferenceTransport::new(&config.ollama_url, &config.model));

    for descriptor in registry.snapshot().into_iter().map(|s| s.descriptor) {
        let endpoint = descriptor.endpoint_ref.trim();

        let transport: Option<Arc<dyn Transport>> = match descriptor.category {
            CapabilityCategory::ExternalService if endpoint.starts_with("http") => {
                Some(Arc::new(InferenceTransport::new(endpoint, &config.model)))
            }
            CapabilityCategory::ExternalService => Some(inference.clone()),
            CapabilityCategory::ExternalProcess => ProcessTransport::from_command_line(endpoint)
                .map(|t| Arc::new(t) as Arc<dyn Transport>),
            CapabilityCategory::Builtin => match endpoint {
                "memory" => Some(Arc::new(MemoryRecallTransport::new(store.clone(), inference.clone()))),
                "echo" => Some(Arc::new(BuiltinTransport::echo())),
                _ => None,
            },
        };

        match transport {
            Some(t) => {
                debug!(capability = %descriptor.id, kind = t.kind(), "Transport bound");
                dispatcher.bind(&descriptor.id, t);
            }
            None => warn!(
                capability = %descriptor.id,
                endpoint = %endpoint,
                "No transport for capability; calls will fail"
            ),
        }
    }
}
