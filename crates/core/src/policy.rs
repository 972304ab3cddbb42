//! Tool policy engine
//!
//! Given a request context, ranks the registered tools by a fixed
//! per-criticality priority table, filters on security tier and environment
//! readiness, caps the selection at the budget tier's allowance, applies the
//! contextual mutations, and prices the result.

use std::cmp::Reverse;

use tracing::{debug, warn};

use crate::context::{RequestContext, TaskCriticality};
use crate::registry::{ApprovalRule, DescriptorPatch, ToolDescriptor, ToolRegistry};
use crate::Result;

/// Aggregate estimated cost above which a selection carries a warning.
pub const BUDGET_WARNING_THRESHOLD: f64 = 0.1;

/// Fixed ranking for routine consultations: the cheap local engine first.
const BASIC_PRIORITIES: &[(&str, i32)] = &[("codex", 30), ("claude", 20), ("gemini", 10)];

/// Fixed ranking for paid work: strongest reasoner first, research last.
const PREMIUM_PRIORITIES: &[(&str, i32)] = &[
    ("claude", 40),
    ("codex", 30),
    ("gemini", 20),
    ("web_research", 10),
];

/// Fixed ranking for critical work: maximum diversity of engines.
const CRITICAL_PRIORITIES: &[(&str, i32)] = &[
    ("claude", 50),
    ("gemini", 40),
    ("codex", 30),
    ("web_research", 20),
    ("doc_archive", 10),
];

fn priority_table(criticality: TaskCriticality) -> &'static [(&'static str, i32)] {
    match criticality {
        TaskCriticality::Basic => BASIC_PRIORITIES,
        TaskCriticality::Premium => PREMIUM_PRIORITIES,
        TaskCriticality::Critical => CRITICAL_PRIORITIES,
    }
}

fn priority_of(table: &[(&str, i32)], id: &str) -> i32 {
    table
        .iter()
        .find(|(tool_id, _)| *tool_id == id)
        .map(|(_, priority)| *priority)
        .unwrap_or(0)
}

/// How many calls a selected tool is assumed to make for cost estimation.
fn assumed_call_count(criticality: TaskCriticality) -> u64 {
    match criticality {
        TaskCriticality::Basic => 1,
        TaskCriticality::Premium => 2,
        TaskCriticality::Critical => 3,
    }
}

/// One accepted tool with its contextual mutations applied.
#[derive(Debug, Clone)]
pub struct ToolSelection {
    pub tool: ToolDescriptor,
    /// Operations after criticality-based truncation.
    pub allowed_operations: Vec<String>,
    /// Approval rule after criticality-based tightening.
    pub approval_rule: ApprovalRule,
}

/// Ordered selection plus its price tag.
#[derive(Debug, Clone, Default)]
pub struct SelectionResult {
    pub selections: Vec<ToolSelection>,
    pub estimated_cost: f64,
    pub budget_warning: Option<String>,
}

impl SelectionResult {
    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Selected tool ids in selection order.
    pub fn tool_ids(&self) -> Vec<&str> {
        self.selections.iter().map(|s| s.tool.id.as_str()).collect()
    }
}

/// Selects, ranks, caps, and mutates tools for a request context.
///
/// Owns no hidden state: the registry is handed in at construction by the
/// orchestration context and shared with the approval resolver.
pub struct ToolPolicyEngine {
    registry: ToolRegistry,
}

impl ToolPolicyEngine {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// The shared registry backing this engine.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Rank, filter, cap, and mutate the catalog for one request.
    pub fn select_tools(&self, context: &RequestContext) -> SelectionResult {
        let table = priority_table(context.task_criticality);
        let call_count = assumed_call_count(context.task_criticality);
        let cap = context.budget_tier.max_tools();

        let mut candidates = self.registry.snapshot();
        // Stable sort: equal priorities keep registry declaration order.
        candidates.sort_by_key(|tool| Reverse(priority_of(table, &tool.id)));

        let mut selections = Vec::new();
        let mut estimated_cost = 0.0;

        for tool in candidates {
            if selections.len() >= cap {
                break;
            }
            if tool.security_tier > context.security_tier {
                debug!(
                    tool = %tool.id,
                    tool_tier = %tool.security_tier,
                    context_tier = %context.security_tier,
                    "tool rejected: security tier above context"
                );
                continue;
            }
            if !tool.is_environment_ready() {
                debug!(tool = %tool.id, "tool rejected: environment not ready");
                continue;
            }

            let (allowed_operations, approval_rule) = mutate_for_context(&tool, context);
            estimated_cost += tool.cost_tier.per_call_rate() * call_count as f64;
            selections.push(ToolSelection {
                tool,
                allowed_operations,
                approval_rule,
            });
        }

        let budget_warning = if estimated_cost > BUDGET_WARNING_THRESHOLD {
            let warning = format!(
                "estimated consultation cost ${estimated_cost:.4} exceeds budget threshold ${BUDGET_WARNING_THRESHOLD:.2}"
            );
            warn!(cost = estimated_cost, "{warning}");
            Some(warning)
        } else {
            None
        };

        debug!(
            criticality = %context.task_criticality,
            budget = %context.budget_tier,
            selected = selections.len(),
            cost = estimated_cost,
            "tool selection complete"
        );

        SelectionResult {
            selections,
            estimated_cost,
            budget_warning,
        }
    }

    /// Shallow-merge a patch into a registered descriptor; fails with
    /// [`crate::Error::UnknownTool`] for an absent id.
    pub fn update_descriptor(&self, id: &str, patch: DescriptorPatch) -> Result<()> {
        self.registry.update(id, patch)
    }
}

/// Apply the criticality-driven mutations to an accepted tool.
fn mutate_for_context(
    tool: &ToolDescriptor,
    context: &RequestContext,
) -> (Vec<String>, ApprovalRule) {
    let mut operations = tool.allowed_operations.clone();
    let mut rule = tool.approval_rule.clone();

    match context.task_criticality {
        TaskCriticality::Basic => {
            // Routine work gets a narrow surface.
            operations.truncate(3);
        }
        TaskCriticality::Critical => {
            // A blanket free pass is too loose for critical work: keep the
            // first two operations ungated, gate everything else.
            if rule == ApprovalRule::Never {
                let split = operations.len().min(2);
                rule = ApprovalRule::PerOperation {
                    never: operations[..split].to_vec(),
                    always: operations[split..].to_vec(),
                    conditional: Vec::new(),
                };
            }
        }
        TaskCriticality::Premium => {}
    }

    (operations, rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BudgetTier, CostTier, SecurityTier};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn catalog() -> ToolRegistry {
        ToolRegistry::with_tools([
            ToolDescriptor::new("codex", "Codex CLI")
                .allowed_operations(["read", "search", "run", "write"])
                .cost_tier(CostTier::Low)
                .approval_rule(ApprovalRule::Never),
            ToolDescriptor::new("claude", "Claude")
                .allowed_operations(["consult", "review"])
                .cost_tier(CostTier::High)
                .security_tier(SecurityTier::Internal),
            ToolDescriptor::new("gemini", "Gemini")
                .allowed_operations(["consult"])
                .cost_tier(CostTier::Medium)
                .security_tier(SecurityTier::Internal),
            ToolDescriptor::new("web_research", "Web research")
                .allowed_operations(["search", "fetch"])
                .cost_tier(CostTier::Low)
                .security_tier(SecurityTier::Sensitive),
            ToolDescriptor::new("doc_archive", "Document archive")
                .allowed_operations(["lookup"])
                .security_tier(SecurityTier::Critical),
        ])
    }

    fn engine() -> ToolPolicyEngine {
        ToolPolicyEngine::new(catalog())
    }

    #[test]
    fn test_critical_standard_internal_bounds() {
        let result = engine().select_tools(&RequestContext::new(
            TaskCriticality::Critical,
            BudgetTier::Standard,
            SecurityTier::Internal,
        ));

        assert!(result.len() <= 3);
        for selection in &result.selections {
            assert!(selection.tool.security_tier <= SecurityTier::Internal);
        }
        // Critical table order with sensitive/critical tools filtered out.
        assert_eq!(result.tool_ids(), vec!["claude", "gemini", "codex"]);
    }

    #[test]
    fn test_basic_prefers_codex_and_truncates_operations() {
        let result = engine().select_tools(&RequestContext::new(
            TaskCriticality::Basic,
            BudgetTier::Free,
            SecurityTier::Public,
        ));

        assert_eq!(result.tool_ids(), vec!["codex"]);
        // Four declared operations truncated to the first three.
        assert_eq!(result.selections[0].allowed_operations, vec!["read", "search", "run"]);
    }

    #[test]
    fn test_security_filter_skips_to_next_candidate() {
        // Public context: claude/gemini (internal) are ineligible, so the
        // premium table falls through to codex.
        let result = engine().select_tools(&RequestContext::new(
            TaskCriticality::Premium,
            BudgetTier::Free,
            SecurityTier::Public,
        ));
        assert_eq!(result.tool_ids(), vec!["codex"]);
    }

    #[test]
    fn test_unready_environment_is_skipped() {
        let registry = catalog();
        registry
            .update(
                "claude",
                DescriptorPatch::new().readiness(Arc::new(|| false)),
            )
            .unwrap();
        let engine = ToolPolicyEngine::new(registry);

        let result = engine.select_tools(&RequestContext::new(
            TaskCriticality::Premium,
            BudgetTier::Standard,
            SecurityTier::Internal,
        ));
        assert!(!result.tool_ids().contains(&"claude"));
    }

    #[test]
    fn test_unranked_tools_keep_declaration_order() {
        let registry = ToolRegistry::with_tools([
            ToolDescriptor::new("alpha", "Alpha"),
            ToolDescriptor::new("beta", "Beta"),
            ToolDescriptor::new("codex", "Codex"),
        ]);
        let engine = ToolPolicyEngine::new(registry);

        let result = engine.select_tools(&RequestContext::new(
            TaskCriticality::Basic,
            BudgetTier::Premium,
            SecurityTier::Public,
        ));
        // codex is ranked; alpha/beta tie at priority 0 in declaration order.
        assert_eq!(result.tool_ids(), vec!["codex", "alpha", "beta"]);
    }

    #[test]
    fn test_critical_tightens_blanket_never() {
        let result = engine().select_tools(&RequestContext::new(
            TaskCriticality::Critical,
            BudgetTier::Standard,
            SecurityTier::Internal,
        ));

        let codex = result
            .selections
            .iter()
            .find(|s| s.tool.id == "codex")
            .unwrap();
        assert_eq!(
            codex.approval_rule,
            ApprovalRule::PerOperation {
                never: vec!["read".to_string(), "search".to_string()],
                always: vec!["run".to_string(), "write".to_string()],
                conditional: vec![],
            }
        );
        // Non-Never rules are left alone.
        let claude = result
            .selections
            .iter()
            .find(|s| s.tool.id == "claude")
            .unwrap();
        assert_eq!(claude.approval_rule, ApprovalRule::Always);
    }

    #[test]
    fn test_cost_aggregation_and_warning() {
        // Critical/internal selects claude (high), gemini (medium),
        // codex (low); three assumed calls each.
        let result = engine().select_tools(&RequestContext::new(
            TaskCriticality::Critical,
            BudgetTier::Standard,
            SecurityTier::Internal,
        ));

        let expected = 3.0 * (0.01 + 0.001 + 0.0001);
        assert!((result.estimated_cost - expected).abs() < 1e-9);
        assert!(result.budget_warning.is_none());

        // Driving the rates up through updates pushes a wider premium
        // selection past the warning threshold.
        let registry = catalog();
        for id in ["codex", "gemini", "web_research"] {
            registry
                .update(id, DescriptorPatch::new().cost_tier(CostTier::High))
                .unwrap();
        }
        let engine = ToolPolicyEngine::new(registry);
        let result = engine.select_tools(&RequestContext::new(
            TaskCriticality::Critical,
            BudgetTier::Premium,
            SecurityTier::Sensitive,
        ));
        assert!(result.estimated_cost > BUDGET_WARNING_THRESHOLD);
        let warning = result.budget_warning.expect("warning expected");
        assert!(warning.contains("exceeds budget threshold"));
    }

    #[test]
    fn test_free_budget_accepts_exactly_one() {
        let result = engine().select_tools(&RequestContext::new(
            TaskCriticality::Critical,
            BudgetTier::Free,
            SecurityTier::Critical,
        ));
        assert_eq!(result.len(), 1);
        assert_eq!(result.tool_ids(), vec!["claude"]);
    }

    #[test]
    fn test_empty_registry_selects_nothing() {
        let engine = ToolPolicyEngine::new(ToolRegistry::new());
        let result = engine.select_tools(&RequestContext::default());
        assert!(result.is_empty());
        assert_eq!(result.estimated_cost, 0.0);
        assert!(result.budget_warning.is_none());
    }

    #[test]
    fn test_update_descriptor_unknown_id() {
        let result = engine().update_descriptor("unheard_of", DescriptorPatch::new());
        assert_matches!(result, Err(crate::Error::UnknownTool(id)) if id == "unheard_of");
    }
}
