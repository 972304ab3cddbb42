//! Request context and the tier taxonomy
//!
//! Every tool-selection and approval decision is made against a
//! [`RequestContext`]: how critical the task is, how much the caller is
//! allowed to spend, and how sensitive a tool the caller may touch.

use serde::{Deserialize, Serialize};

/// How important the current consultation is.
///
/// Unknown wire values deserialize to [`TaskCriticality::Basic`]; a
/// malformed caller never escalates itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCriticality {
    #[default]
    Basic,
    Premium,
    Critical,
}

impl TaskCriticality {
    fn from_wire(value: &str) -> Self {
        match value {
            "premium" => TaskCriticality::Premium,
            "critical" => TaskCriticality::Critical,
            _ => TaskCriticality::Basic,
        }
    }
}

impl std::str::FromStr for TaskCriticality {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(TaskCriticality::from_wire(value))
    }
}

impl<'de> Deserialize<'de> for TaskCriticality {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(TaskCriticality::from_wire(&raw))
    }
}

impl std::fmt::Display for TaskCriticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskCriticality::Basic => write!(f, "basic"),
            TaskCriticality::Premium => write!(f, "premium"),
            TaskCriticality::Critical => write!(f, "critical"),
        }
    }
}

/// Caller-assigned spending category bounding tool count and call volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetTier {
    Free,
    #[default]
    Standard,
    Premium,
}

impl BudgetTier {
    /// Maximum number of tools a selection may accept.
    pub fn max_tools(&self) -> usize {
        match self {
            BudgetTier::Free => 1,
            BudgetTier::Standard => 3,
            BudgetTier::Premium => 5,
        }
    }
}

impl std::fmt::Display for BudgetTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetTier::Free => write!(f, "free"),
            BudgetTier::Standard => write!(f, "standard"),
            BudgetTier::Premium => write!(f, "premium"),
        }
    }
}

/// Ordinal sensitivity classification gating tool eligibility.
///
/// A tool is eligible only when its tier is at or below the context's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityTier {
    #[default]
    Public,
    Internal,
    Sensitive,
    Critical,
}

impl std::fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityTier::Public => write!(f, "public"),
            SecurityTier::Internal => write!(f, "internal"),
            SecurityTier::Sensitive => write!(f, "sensitive"),
            SecurityTier::Critical => write!(f, "critical"),
        }
    }
}

/// Per-call spending class of a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    #[default]
    Free,
    Low,
    Medium,
    High,
}

impl CostTier {
    /// Assumed USD rate for a single call at this tier.
    pub fn per_call_rate(&self) -> f64 {
        match self {
            CostTier::Free => 0.0,
            CostTier::Low => 0.0001,
            CostTier::Medium => 0.001,
            CostTier::High => 0.01,
        }
    }
}

impl std::fmt::Display for CostTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CostTier::Free => write!(f, "free"),
            CostTier::Low => write!(f, "low"),
            CostTier::Medium => write!(f, "medium"),
            CostTier::High => write!(f, "high"),
        }
    }
}

/// The caller-supplied facts a selection or approval decision may depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, alias = "task_type")]
    pub task_criticality: TaskCriticality,
    #[serde(default)]
    pub budget_tier: BudgetTier,
    #[serde(default)]
    pub security_tier: SecurityTier,
}

impl RequestContext {
    pub fn new(
        task_criticality: TaskCriticality,
        budget_tier: BudgetTier,
        security_tier: SecurityTier,
    ) -> Self {
        Self {
            task_criticality,
            budget_tier,
            security_tier,
        }
    }
}
