//! Per-operation approval resolution
//!
//! `resolve` is total: every `(tool, operation, context)` triple yields
//! exactly one requirement, and anything unrecognized falls back to
//! requiring approval.

use tracing::warn;

use crate::context::RequestContext;
use crate::registry::{ApprovalRule, ToolRegistry};

/// Whether an operation must be approved before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalRequirement {
    /// The operation needs approval.
    Always,
    /// The operation may run unattended.
    Never,
}

impl std::fmt::Display for ApprovalRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalRequirement::Always => write!(f, "always"),
            ApprovalRequirement::Never => write!(f, "never"),
        }
    }
}

/// Resolves approval requirements against the shared tool registry.
pub struct ApprovalResolver {
    registry: ToolRegistry,
}

impl ApprovalResolver {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Resolve the requirement for one operation of one tool.
    ///
    /// An unknown tool id resolves to [`ApprovalRequirement::Always`]: a
    /// caller that names a tool the registry has never seen does not get an
    /// unattended run out of it.
    pub fn resolve(
        &self,
        tool_id: &str,
        operation: &str,
        context: &RequestContext,
    ) -> ApprovalRequirement {
        match self.registry.get(tool_id) {
            Some(tool) => resolve_rule(&tool.approval_rule, operation, context),
            None => {
                warn!(tool = %tool_id, "approval requested for unregistered tool");
                ApprovalRequirement::Always
            }
        }
    }
}

/// Resolve a rule directly, for the mutated rules a selection carries.
///
/// Blanket rules answer immediately. Per-operation rules are checked in the
/// fixed precedence order never-list → always-list → conditional-list; the
/// lists need not be disjoint, and an operation matching none of them
/// defaults to requiring approval.
pub fn resolve_rule(
    rule: &ApprovalRule,
    operation: &str,
    context: &RequestContext,
) -> ApprovalRequirement {
    match rule {
        ApprovalRule::Always => ApprovalRequirement::Always,
        ApprovalRule::Never => ApprovalRequirement::Never,
        ApprovalRule::PerOperation {
            never,
            always,
            conditional,
        } => {
            if never.iter().any(|op| op == operation) {
                return ApprovalRequirement::Never;
            }
            if always.iter().any(|op| op == operation) {
                return ApprovalRequirement::Always;
            }
            for gate in conditional {
                if gate.operations.iter().any(|op| op == operation) {
                    return if gate.predicate.evaluate(context) {
                        ApprovalRequirement::Always
                    } else {
                        ApprovalRequirement::Never
                    };
                }
            }
            ApprovalRequirement::Always
        }
    }
}
