//! Configuration management
//!
//! Runtime settings come from the environment (`.env` is loaded by `main`).
//! The capability table is static: a TOML file of `[[capability]]` rows, or
//! the built-in default table when none is configured.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain::ChainConfig;
use crate::governor::PolicyDomain;
use crate::registry::{CapabilityCategory, CapabilityDescriptor};

/// Kernel configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path for the pattern store
    pub db_path: PathBuf,

    /// Optional TOML capability table
    pub capabilities_path: Option<PathBuf>,

    /// Ollama-compatible inference endpoint
    pub ollama_url: String,

    /// Model used for inference-backed capabilities
    pub model: String,

    /// Capability used when no predicate matches
    pub default_capability: String,

    /// Capability asked for chain thoughts
    pub reasoning_capability: String,

    /// Per-call timeout when a capability sets none
    pub dispatch_timeout: Duration,

    pub chain_max_iterations: u32,
    pub chain_confidence: f64,
    pub chain_enabled: bool,
    pub governor_enabled: bool,

    /// HTTP bridge address
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let db_path = std::env::var("HIVE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("hive-kernel")
                    .join("patterns.db")
            });

        let capabilities_path = std::env::var("HIVE_CAPABILITIES").ok().map(PathBuf::from);

        let ollama_url =
            std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
        let model = std::env::var("HIVE_MODEL").unwrap_or_else(|_| "llama3.2:3b".to_string());

        let default_capability =
            std::env::var("HIVE_DEFAULT_CAPABILITY").unwrap_or_else(|_| "cortex".to_string());
        let reasoning_capability = std::env::var("HIVE_REASONING_CAPABILITY")
            .unwrap_or_else(|_| default_capability.clone());

        let dispatch_timeout = Duration::from_secs(env_parse("HIVE_DISPATCH_TIMEOUT_SECS", 60));

        let chain_max_iterations = env_parse("HIVE_CHAIN_MAX_ITERATIONS", 5u32).max(1);
        let chain_confidence = env_parse("HIVE_CHAIN_CONFIDENCE", 0.8f64).clamp(0.0, 1.0);
        let chain_enabled = env_flag("HIVE_CHAIN_ENABLED", true);
        let governor_enabled = env_flag("HIVE_GOVERNOR_ENABLED", true);

        let host = std::env::var("HIVE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_parse("HIVE_PORT", 3001);
        let bind_addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", host, port))?;

        Ok(Self {
            db_path,
            capabilities_path,
            ollama_url,
            model,
            default_capability,
            reasoning_capability,
            dispatch_timeout,
            chain_max_iterations,
            chain_confidence,
            chain_enabled,
            governor_enabled,
            bind_addr,
        })
    }

    /// Chain settings derived from this config
    pub fn chain_config(&self) -> ChainConfig {
        let mut chain = ChainConfig::default()
            .with_max_iterations(self.chain_max_iterations)
            .with_confidence_threshold(self.chain_confidence)
            .with_reasoning_capability(&self.reasoning_capability);
        if self.reasoning_capability != self.default_capability {
            chain = chain.with_fallback(&self.default_capability);
        }
        chain
    }

    /// Capability table from `capabilities_path`, or the default table
    pub fn load_capabilities(&self) -> Result<Vec<CapabilityDescriptor>> {
        match &self.capabilities_path {
            Some(path) => load_capability_file(path),
            None => Ok(default_capabilities()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

/// One `[[capability]]` row
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityRow {
    pub id: String,
    pub name: Option<String>,
    pub category: CapabilityCategory,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub domain: PolicyDomain,
    pub timeout_secs: Option<u64>,
}

fn default_priority() -> u32 {
    5
}

impl CapabilityRow {
    pub fn into_descriptor(self) -> CapabilityDescriptor {
        let mut descriptor = CapabilityDescriptor::new(&self.id, self.category, &self.endpoint)
            .with_priority(self.priority)
            .with_domain(self.domain);
        if let Some(name) = self.name {
            descriptor = descriptor.with_name(&name);
        }
        if let Some(secs) = self.timeout_secs {
            descriptor = descriptor.with_timeout(Duration::from_secs(secs));
        }
        descriptor
    }
}

#[derive(Debug, Deserialize)]
struct CapabilityFile {
    #[serde(default)]
    capability: Vec<CapabilityRow>,
}

/// Parse a TOML capability table
pub fn parse_capabilities(content: &str) -> Result<Vec<CapabilityDescriptor>> {
    let file: CapabilityFile = toml::from_str(content).context("Failed to parse capability table")?;
    if file.capability.is_empty() {
        anyhow::bail!("Capability table has no [[capability]] rows");
    }
    Ok(file
        .capability
        .into_iter()
        .map(CapabilityRow::into_descriptor)
        .collect())
}

fn load_capability_file(path: &Path) -> Result<Vec<CapabilityDescriptor>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read capability table {}", path.display()))?;
    parse_capabilities(&content)
}

/// Built-in capability table
pub fn default_capabilities() -> Vec<CapabilityDescriptor> {
    use CapabilityCategory::*;

    vec![
        CapabilityDescriptor::new("cortex", ExternalService, "ollama")
            .with_name("Cortex")
            .with_priority(1),
        CapabilityDescriptor::new("memory", Builtin, "memory")
            .with_name("Memory")
            .with_priority(2),
        CapabilityDescriptor::new("deepsearch", ExternalProcess, "python3 workers/deepsearch.py")
            .with_name("Deep Search")
            .with_priority(3)
            .with_timeout(Duration::from_secs(120)),
        CapabilityDescriptor::new("app_launcher", ExternalProcess, "python3 workers/app_launcher.py")
            .with_name("App Launcher")
            .with_priority(4)
            .with_domain(PolicyDomain::Action)
            .with_timeout(Duration::from_secs(10)),
        CapabilityDescriptor::new("code", ExternalService, "ollama")
            .with_name("Code")
            .with_priority(3)
            .with_domain(PolicyDomain::Code),
        CapabilityDescriptor::new("system_monitor", ExternalProcess, "python3 workers/system_monitor.py")
            .with_name("System Monitor")
            .with_priority(6)
            .with_timeout(Duration::from_secs(10)),
        CapabilityDescriptor::new("vision", ExternalProcess, "python3 workers/vision.py")
            .with_name("Vision")
            .with_priority(7)
            .with_domain(PolicyDomain::Image),
        CapabilityDescriptor::new("voice", ExternalProcess, "python3 workers/voice.py")
            .with_name("Voice")
            .with_priority(8),
    ]
}
