//! Tool catalog
//!
//! [`ToolDescriptor`] describes one pluggable external tool: what it may do,
//! what it costs, how sensitive it is, and when its operations need
//! approval. Descriptors live in a [`ToolRegistry`] that is constructed once
//! by the orchestration context and shared read-mostly across concurrent
//! requests; the only mutation is an atomic whole-descriptor merge-replace.
//!
//! Approval conditions are declarative [`ContextPredicate`] data, evaluated
//! by a small interpreter over the closed set of context fields, with no
//! injected executable logic. Environment readiness (credentials, feature
//! flags) is the one externally injected probe, because it depends on state
//! the policy layer must not own.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{BudgetTier, RequestContext, SecurityTier, TaskCriticality};
use crate::context::CostTier;
use crate::error::{Error, Result};

/// Externally injected environment-readiness probe.
pub type ReadinessProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Declarative predicate over the closed set of request-context fields.
///
/// Serializable, so approval policy can be configured and tested as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPredicate {
    /// True when every child predicate is true (true when empty).
    All(Vec<ContextPredicate>),
    /// True when at least one child predicate is true.
    Any(Vec<ContextPredicate>),
    Not(Box<ContextPredicate>),
    CriticalityAtLeast(TaskCriticality),
    BudgetAtLeast(BudgetTier),
    SecurityAtLeast(SecurityTier),
    SecurityAtMost(SecurityTier),
}

impl ContextPredicate {
    /// Evaluate against a request context.
    pub fn evaluate(&self, context: &RequestContext) -> bool {
        match self {
            ContextPredicate::All(children) => children.iter().all(|p| p.evaluate(context)),
            ContextPredicate::Any(children) => children.iter().any(|p| p.evaluate(context)),
            ContextPredicate::Not(child) => !child.evaluate(context),
            ContextPredicate::CriticalityAtLeast(min) => context.task_criticality >= *min,
            ContextPredicate::BudgetAtLeast(min) => context.budget_tier >= *min,
            ContextPredicate::SecurityAtLeast(min) => context.security_tier >= *min,
            ContextPredicate::SecurityAtMost(max) => context.security_tier <= *max,
        }
    }
}

/// One conditional entry in a per-operation approval rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalGate {
    pub operations: Vec<String>,
    pub predicate: ContextPredicate,
}

/// Policy determining whether an operation needs gating before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalRule {
    /// Every operation needs approval.
    Always,
    /// No operation needs approval.
    Never,
    /// Per-operation lists, checked never → always → conditional.
    /// The lists need not be disjoint; that order is the tie-break.
    PerOperation {
        #[serde(default)]
        never: Vec<String>,
        #[serde(default)]
        always: Vec<String>,
        #[serde(default)]
        conditional: Vec<ConditionalGate>,
    },
}

impl Default for ApprovalRule {
    fn default() -> Self {
        ApprovalRule::Always
    }
}

/// One pluggable external tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub id: String,
    pub label: String,
    /// Ordered set of operations the tool exposes.
    pub allowed_operations: Vec<String>,
    pub cost_tier: CostTier,
    pub security_tier: SecurityTier,
    pub approval_rule: ApprovalRule,
    environment_ready: ReadinessProbe,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("allowed_operations", &self.allowed_operations)
            .field("cost_tier", &self.cost_tier)
            .field("security_tier", &self.security_tier)
            .field("approval_rule", &self.approval_rule)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// Create a descriptor with safe defaults: no operations, free, public,
    /// approval always required, environment always ready.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            allowed_operations: Vec::new(),
            cost_tier: CostTier::Free,
            security_tier: SecurityTier::Public,
            approval_rule: ApprovalRule::default(),
            environment_ready: Arc::new(|| true),
        }
    }

    /// Set the operations this tool exposes.
    pub fn allowed_operations(
        mut self,
        operations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.allowed_operations = operations.into_iter().map(Into::into).collect();
        self
    }

    /// Set the cost tier.
    pub fn cost_tier(mut self, tier: CostTier) -> Self {
        self.cost_tier = tier;
        self
    }

    /// Set the security tier.
    pub fn security_tier(mut self, tier: SecurityTier) -> Self {
        self.security_tier = tier;
        self
    }

    /// Set the approval rule.
    pub fn approval_rule(mut self, rule: ApprovalRule) -> Self {
        self.approval_rule = rule;
        self
    }

    /// Inject the environment-readiness probe.
    pub fn readiness(mut self, probe: ReadinessProbe) -> Self {
        self.environment_ready = probe;
        self
    }

    /// Ask the injected probe whether the tool's environment is usable.
    pub fn is_environment_ready(&self) -> bool {
        (self.environment_ready)()
    }
}

/// Partial descriptor for [`ToolRegistry::update`]. Unset fields keep the
/// stored value; the merge result replaces the descriptor in one step.
#[derive(Clone, Default)]
pub struct DescriptorPatch {
    pub label: Option<String>,
    pub allowed_operations: Option<Vec<String>>,
    pub cost_tier: Option<CostTier>,
    pub security_tier: Option<SecurityTier>,
    pub approval_rule: Option<ApprovalRule>,
    pub environment_ready: Option<ReadinessProbe>,
}

impl DescriptorPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn allowed_operations(
        mut self,
        operations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.allowed_operations = Some(operations.into_iter().map(Into::into).collect());
        self
    }

    pub fn cost_tier(mut self, tier: CostTier) -> Self {
        self.cost_tier = Some(tier);
        self
    }

    pub fn security_tier(mut self, tier: SecurityTier) -> Self {
        self.security_tier = Some(tier);
        self
    }

    pub fn approval_rule(mut self, rule: ApprovalRule) -> Self {
        self.approval_rule = Some(rule);
        self
    }

    pub fn readiness(mut self, probe: ReadinessProbe) -> Self {
        self.environment_ready = Some(probe);
        self
    }

    /// Merge into an owned copy of the stored descriptor.
    fn merged_into(self, stored: &ToolDescriptor) -> ToolDescriptor {
        let mut merged = stored.clone();
        if let Some(label) = self.label {
            merged.label = label;
        }
        if let Some(operations) = self.allowed_operations {
            merged.allowed_operations = operations;
        }
        if let Some(tier) = self.cost_tier {
            merged.cost_tier = tier;
        }
        if let Some(tier) = self.security_tier {
            merged.security_tier = tier;
        }
        if let Some(rule) = self.approval_rule {
            merged.approval_rule = rule;
        }
        if let Some(probe) = self.environment_ready {
            merged.environment_ready = probe;
        }
        merged
    }
}

/// Declaration-ordered tool registry shared across concurrent requests.
///
/// Reads are concurrent; writes are serialized and replace a whole
/// descriptor at once, so a reader never observes a partially merged entry.
/// There is no deletion.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    inner: Arc<RwLock<Vec<ToolDescriptor>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a registry in declaration order.
    pub fn with_tools(tools: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        let registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ToolDescriptor>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ToolDescriptor>> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a descriptor, or replace the existing one with the same id in
    /// place (declaration order is stable across replacement).
    pub fn register(&self, descriptor: ToolDescriptor) {
        let mut tools = self.write();
        match tools.iter_mut().find(|t| t.id == descriptor.id) {
            Some(existing) => {
                debug!(tool = %descriptor.id, "replacing registered tool");
                *existing = descriptor;
            }
            None => tools.push(descriptor),
        }
    }

    /// Shallow-merge `patch` into the stored descriptor and atomically
    /// replace it. Fails with [`Error::UnknownTool`] when the id is absent,
    /// leaving the registry untouched.
    pub fn update(&self, id: &str, patch: DescriptorPatch) -> Result<()> {
        let mut tools = self.write();
        let stored = tools
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::UnknownTool(id.to_string()))?;
        *stored = patch.merged_into(stored);
        Ok(())
    }

    /// Clone of the descriptor for `id`, if registered.
    pub fn get(&self, id: &str) -> Option<ToolDescriptor> {
        self.read().iter().find(|t| t.id == id).cloned()
    }

    /// Clone of the whole catalog in declaration order.
    pub fn snapshot(&self) -> Vec<ToolDescriptor> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
