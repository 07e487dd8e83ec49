//! Capability Registry
//!
//! Static catalog of invocable workers. Descriptors are registered once at
//! startup and read-only afterwards, except for the health field which the
//! dispatcher updates after every call.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{KernelError, KernelResult};
use crate::governor::PolicyDomain;

/// How a capability is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityCategory {
    /// In-process handler
    Builtin,
    /// Subprocess invoked per call
    ExternalProcess,
    /// Remote service (HTTP)
    ExternalService,
}

impl CapabilityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::ExternalProcess => "external-process",
            Self::ExternalService => "external-service",
        }
    }
}

/// Last observed health of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Active,
    #[default]
    Idle,
    Error,
}

impl HealthState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Idle => 1,
            Self::Error => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Active,
            2 => Self::Error,
            _ => Self::Idle,
        }
    }
}

/// Catalog entry for one capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub id: String,
    pub display_name: String,
    pub category: CapabilityCategory,
    /// URL, command line or builtin handler name depending on `category`
    pub endpoint_ref: String,
    pub priority: u32,
    pub health_state: HealthState,
    /// Policy domain the capability's output is checked against
    pub domain: PolicyDomain,
    /// Per-capability timeout override
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl CapabilityDescriptor {
    pub fn new(id: &str, category: CapabilityCategory, endpoint_ref: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: id.to_string(),
            category,
            endpoint_ref: endpoint_ref.to_string(),
            priority: 5,
            health_state: HealthState::Idle,
            domain: PolicyDomain::Text,
            timeout: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_domain(mut self, domain: PolicyDomain) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Descriptor plus usage counters, as reported to callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    #[serde(flatten)]
    pub descriptor: CapabilityDescriptor,
    pub invocations: u64,
    pub failures: u64,
    pub last_latency_ms: u64,
}

struct CapabilityEntry {
    descriptor: CapabilityDescriptor,
    health: AtomicU8,
    invocations: AtomicU64,
    failures: AtomicU64,
    last_latency_ms: AtomicU64,
}

impl CapabilityEntry {
    fn new(descriptor: CapabilityDescriptor) -> Self {
        let health = AtomicU8::new(descriptor.health_state.to_u8());
        Self {
            descriptor,
            health,
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(0),
        }
    }

    fn descriptor(&self) -> CapabilityDescriptor {
        let mut d = self.descriptor.clone();
        d.health_state = HealthState::from_u8(self.health.load(Ordering::Acquire));
        d
    }
}

#[derive(Default)]
struct Inner {
    order: Vec<Arc<CapabilityEntry>>,
    by_id: HashMap<String, Arc<CapabilityEntry>>,
}

/// Registry of invocable capabilities
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<Inner>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a static table, rejecting duplicate ids
    pub fn from_table(table: impl IntoIterator<Item = CapabilityDescriptor>) -> KernelResult<Self> {
        let registry = Self::new();
        for descriptor in table {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Register a capability
    pub fn register(&self, descriptor: CapabilityDescriptor) -> KernelResult<()> {
        let mut inner = self.inner.write();
        if inner.by_id.contains_key(&descriptor.id) {
            return Err(KernelError::DuplicateCapability(descriptor.id));
        }

        debug!(
            id = %descriptor.id,
            category = descriptor.category.as_str(),
            "Registered capability"
        );

        let entry = Arc::new(CapabilityEntry::new(descriptor));
        inner.by_id.insert(entry.descriptor.id.clone(), entry.clone());
        inner.order.push(entry);
        Ok(())
    }

    /// Look up a capability by id
    pub fn lookup(&self, id: &str) -> KernelResult<CapabilityDescriptor> {
        self.inner
            .read()
            .by_id
            .get(id)
            .map(|e| e.descriptor())
            .ok_or_else(|| KernelError::CapabilityNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().by_id.contains_key(id)
    }

    /// Update health. Unknown ids are logged and ignored.
    pub fn mark_health(&self, id: &str, state: HealthState) {
        match self.inner.read().by_id.get(id) {
            Some(entry) => entry.health.store(state.to_u8(), Ordering::Release),
            None => warn!(id = %id, "mark_health on unknown capability"),
        }
    }

    /// Record the outcome of one dispatch
    pub fn record_invocation(&self, id: &str, success: bool, latency_ms: u64) {
        if let Some(entry) = self.inner.read().by_id.get(id) {
            entry.invocations.fetch_add(1, Ordering::Relaxed);
            if !success {
                entry.failures.fetch_add(1, Ordering::Relaxed);
            }
            entry.last_latency_ms.store(latency_ms, Ordering::Relaxed);
        }
    }

    /// Capabilities of one category, in registration order
    pub fn list_by_category(&self, category: CapabilityCategory) -> Vec<CapabilityDescriptor> {
        self.inner
            .read()
            .order
            .iter()
            .filter(|e| e.descriptor.category == category)
            .map(|e| e.descriptor())
            .collect()
    }

    /// All registered ids, in registration order
    pub fn ids(&self) -> Vec<String> {
        self.inner
            .read()
            .order
            .iter()
            .map(|e| e.descriptor.id.clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<CapabilitySnapshot> {
        self.inner
            .read()
            .order
            .iter()
            .map(|e| CapabilitySnapshot {
                descriptor: e.descriptor(),
                invocations: e.invocations.load(Ordering::Relaxed),
                failures: e.failures.load(Ordering::Relaxed),
                last_latency_ms: e.last_latency_ms.load(Ordering::Relaxed),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::from_table([
            CapabilityDescriptor::new("cortex", CapabilityCategory::ExternalService, "http://localhost:11434"),
            CapabilityDescriptor::new("search", CapabilityCategory::ExternalProcess, "python search.py"),
            CapabilityDescriptor::new("memory", CapabilityCategory::Builtin, "memory"),
            CapabilityDescriptor::new("monitor", CapabilityCategory::ExternalProcess, "python monitor.py"),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_rejected() {
        let reg = registry();
        let err = reg
            .register(CapabilityDescriptor::new("cortex", CapabilityCategory::Builtin, "x"))
            .unwrap_err();
        assert!(matches!(err, KernelError::DuplicateCapability(id) if id == "cortex"));
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn test_lookup_missing() {
        let reg = registry();
        assert!(matches!(
            reg.lookup("nope"),
            Err(KernelError::CapabilityNotFound(_))
        ));
        assert_eq!(reg.lookup("memory").unwrap().category, CapabilityCategory::Builtin);
    }

    #[test]
    fn test_mark_health() {
        let reg = registry();
        assert_eq!(reg.lookup("cortex").unwrap().health_state, HealthState::Idle);

        reg.mark_health("cortex", HealthState::Error);
        assert_eq!(reg.lookup("cortex").unwrap().health_state, HealthState::Error);

        reg.mark_health("cortex", HealthState::Active);
        assert_eq!(reg.lookup("cortex").unwrap().health_state, HealthState::Active);

        // Unknown id is not fatal
        reg.mark_health("ghost", HealthState::Error);
    }

    #[test]
    fn test_list_by_category_keeps_registration_order() {
        let reg = registry();
        let procs: Vec<String> = reg
            .list_by_category(CapabilityCategory::ExternalProcess)
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(procs, vec!["search", "monitor"]);
    }

    #[test]
    fn test_record_invocation() {
        let reg = registry();
        reg.record_invocation("search", true, 12);
        reg.record_invocation("search", false, 40);

        let snap = reg.snapshot();
        let search = snap.iter().find(|s| s.descriptor.id == "search").unwrap();
        assert_eq!(search.invocations, 2);
        assert_eq!(search.failures, 1);
        assert_eq!(search.last_latency_ms, 40);
    }

    #[test]
    fn test_concurrent_mark_health() {
        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    let state = if i % 2 == 0 { HealthState::Active } else { HealthState::Error };
                    for _ in 0..100 {
                        reg.mark_health("cortex", state);
                        let _ = reg.lookup("cortex").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let state = reg.lookup("cortex").unwrap().health_state;
        assert!(matches!(state, HealthState::Active | HealthState::Error));
    }
}
