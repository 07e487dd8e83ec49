//! Hive Kernel
//!
//! Task-orchestration core for a local assistant: classify free-form input,
//! pick a capability, optionally reason toward a root answer, remember what
//! was learned, and gate every answer through a constitutional governor.
//!
//! # Features
//!
//! - **Capability Registry**: static catalog with per-capability health
//! - **Intent Router**: ordered keyword predicates, first match wins
//! - **Invocation Dispatcher**: timeout-bounded calls, one normalized payload shape
//! - **Reasoning Chain**: surface → middle → root descent with bounded iterations
//! - **Pattern Memory**: append-only SQLite log of distilled patterns
//! - **Policy Governor**: per-domain verify/correct rules
//!
//! # Architecture
//!
//! ```text
//! Task ──► Orchestrator ──► Router ──► Dispatcher ──► Transport
//!               │                          ▲           (Ollama / process / builtin)
//!               │ complex                  │
//!               └──► Reasoning Chain ──────┘
//!                          │
//!                          └──► Pattern Store (SQLite)
//!
//! Answer ──► Governor (text / code / action / image) ──► Response
//! ```

pub mod chain;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod governor;
pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;

pub use chain::{ChainConfig, ChainOutcome, ChainState, Layer, ReasoningChain, ThoughtStep};
pub use config::Config;
pub use dispatcher::{InvocationDispatcher, InvocationResult, Payload};
pub use error::{KernelError, KernelResult, TransportError};
pub use governor::{PolicyDomain, PolicyGovernor, PolicyRule, Violation};
pub use memory::{Pattern, PatternStore};
pub use orchestrator::{ChainSummary, KernelResponse, Orchestrator, TaskRequest};
pub use registry::{CapabilityCategory, CapabilityDescriptor, CapabilityRegistry, HealthState};
pub use router::{IntentPredicate, IntentRouter, Keyword, PredicateTable, RouteResult};
pub use transport::{RawResponse, Transport};
