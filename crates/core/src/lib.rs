//! Conclave Core
//!
//! Core logic for the Conclave multi-engine consultation workflow. This
//! crate owns the two hard pieces of that workflow:
//!
//! - **Process supervision**: run an external reasoning engine as a
//!   subprocess under a dual-timeout cancellation policy and turn its
//!   partially structured output into extracted text and token usage.
//! - **Tool policy**: rank, filter, budget-cap, and approval-gate a catalog
//!   of pluggable external tools per request context.
//!
//! HTTP bindings to hosted engines, document sync, CLI parsing, and
//! telemetry wiring live in the surrounding application, not here.

pub mod approval;
pub mod config;
pub mod context;
pub mod elapsed;
pub mod error;
pub mod invocation;
pub mod parser;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod supervisor;

// Re-exports
pub use approval::{resolve_rule, ApprovalRequirement, ApprovalResolver};
pub use config::{Config, ConfigError, EngineConfig, TimeoutConfig};
pub use context::{BudgetTier, CostTier, RequestContext, SecurityTier, TaskCriticality};
pub use elapsed::format_duration;
pub use error::{Error, Result, STDERR_PREVIEW_MAX_CHARS};
pub use invocation::{
    InputChannel, InvocationRequest, InvocationResult, TimeLimit, TimeoutPolicy, TokenUsage,
    DEFAULT_INACTIVITY_GAP_MS, DEFAULT_TIME_TO_FIRST_BYTE_MS,
};
pub use parser::{approx_tokens, approx_tokens_dense, parse, ParseOutcome};
pub use policy::{
    SelectionResult, ToolPolicyEngine, ToolSelection, BUDGET_WARNING_THRESHOLD,
};
pub use protocol::{decode_line, StreamEvent};
pub use registry::{
    ApprovalRule, ConditionalGate, ContextPredicate, DescriptorPatch, ReadinessProbe,
    ToolDescriptor, ToolRegistry,
};
pub use supervisor::{
    supervise, Outcome, Resolution, ResolutionGuard, TimeoutKind,
    INITIAL_DISARM_THRESHOLD_BYTES,
};
