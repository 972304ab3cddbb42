//! Per-invocation data model
//!
//! One [`InvocationRequest`] describes a single consultation of an external
//! reasoning engine: the command to run, the prompt payload, environment
//! overrides, and the dual-timeout policy. The matching [`InvocationResult`]
//! carries the raw output, the extracted response text, and token usage.
//! Both are owned by exactly one supervision and dropped once the result is
//! handed back to the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default first-response deadline in milliseconds.
pub const DEFAULT_TIME_TO_FIRST_BYTE_MS: u64 = 90_000;

/// Default mid-stream silence deadline in milliseconds.
pub const DEFAULT_INACTIVITY_GAP_MS: u64 = 30_000;

/// One bound of the dual-timeout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeLimit {
    /// Timing never causes failure for this bound.
    Unbounded,
    /// Deadline measured from the moment the bound is armed.
    After(#[serde(with = "duration_millis")] Duration),
}

impl TimeLimit {
    /// Construct a finite limit from milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        TimeLimit::After(Duration::from_millis(ms))
    }

    /// The finite duration, or `None` when unbounded.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            TimeLimit::Unbounded => None,
            TimeLimit::After(d) => Some(*d),
        }
    }
}

impl From<Option<u64>> for TimeLimit {
    fn from(timeout_ms: Option<u64>) -> Self {
        timeout_ms.map_or(TimeLimit::Unbounded, TimeLimit::from_millis)
    }
}

/// The two supervision timers.
///
/// `time_to_first_byte` is armed at spawn and cancelled permanently by the
/// first output chunk longer than ten bytes. `inactivity_gap` is rearmed on
/// every output chunk and covers the stretch between the last chunk and
/// process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub time_to_first_byte: TimeLimit,
    pub inactivity_gap: TimeLimit,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            time_to_first_byte: TimeLimit::from_millis(DEFAULT_TIME_TO_FIRST_BYTE_MS),
            inactivity_gap: TimeLimit::from_millis(DEFAULT_INACTIVITY_GAP_MS),
        }
    }
}

impl TimeoutPolicy {
    /// Policy under which timing never causes failure.
    pub fn unbounded() -> Self {
        Self {
            time_to_first_byte: TimeLimit::Unbounded,
            inactivity_gap: TimeLimit::Unbounded,
        }
    }

    /// Finite policy from millisecond bounds.
    pub fn from_millis(time_to_first_byte_ms: u64, inactivity_gap_ms: u64) -> Self {
        Self {
            time_to_first_byte: TimeLimit::from_millis(time_to_first_byte_ms),
            inactivity_gap: TimeLimit::from_millis(inactivity_gap_ms),
        }
    }
}

/// How the prompt payload reaches the engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputChannel {
    /// Write the payload to the process's stdin and close it immediately.
    #[default]
    Stdin,
    /// Stage the payload to a uniquely-named scratch file and pass its path
    /// as the final argument. The file is removed after the supervision ends.
    ScratchFile,
}

/// A single consultation request for an external reasoning engine.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Identity carried through tracing fields and scratch-file naming.
    pub id: Uuid,
    /// The engine executable.
    pub program: PathBuf,
    /// Model/engine selector, encoded as `--model <selector>`.
    pub model: Option<String>,
    /// Skip the engine's own interactive approval gate.
    pub bypass_approvals: bool,
    /// Operations the engine may perform, encoded comma-joined.
    pub allowed_operations: Option<Vec<String>>,
    /// Full prompt text delivered over the input channel.
    pub prompt: String,
    /// Environment overrides applied on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Working directory for the engine process.
    pub cwd: Option<PathBuf>,
    pub timeouts: TimeoutPolicy,
    pub input_channel: InputChannel,
}

impl InvocationRequest {
    /// Create a request with the required fields.
    pub fn new(program: impl Into<PathBuf>, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            program: program.into(),
            model: None,
            bypass_approvals: false,
            allowed_operations: None,
            prompt: prompt.into(),
            env: HashMap::new(),
            cwd: None,
            timeouts: TimeoutPolicy::default(),
            input_channel: InputChannel::default(),
        }
    }

    /// Set the model/engine selector.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Skip the engine's interactive approval gate.
    pub fn bypass_approvals(mut self, bypass: bool) -> Self {
        self.bypass_approvals = bypass;
        self
    }

    /// Restrict the operations the engine may perform.
    pub fn allowed_operations(
        mut self,
        operations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.allowed_operations = Some(operations.into_iter().map(Into::into).collect());
        self
    }

    /// Add a single environment override.
    pub fn env_insert(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the timeout policy.
    pub fn timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Choose how the prompt reaches the process.
    pub fn input_channel(mut self, channel: InputChannel) -> Self {
        self.input_channel = channel;
        self
    }

    /// Encode the engine's command-line arguments.
    ///
    /// `staged_input` is the scratch path appended when the payload was
    /// staged to a file instead of stdin.
    pub fn build_args(&self, staged_input: Option<&Path>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if self.bypass_approvals {
            args.push("--bypass-approvals".to_string());
        }
        if let Some(operations) = &self.allowed_operations {
            args.push("--allowed-operations".to_string());
            args.push(operations.join(","));
        }
        if let Some(path) = staged_input {
            args.push(path.to_string_lossy().into_owned());
        }
        args
    }
}

/// Token counts attached to an [`InvocationResult`].
///
/// `exact` is true only when the counts came from a terminal structured
/// usage record in the engine's output; estimated counts come from the
/// character heuristics in [`crate::parser`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub exact: bool,
}

impl TokenUsage {
    /// Counts sourced from a structured usage record.
    pub fn exact(input: u64, output: u64, total: u64) -> Self {
        Self {
            input,
            output,
            total,
            exact: true,
        }
    }

    /// Counts derived from the character heuristics.
    pub fn estimated(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input + output,
            exact: false,
        }
    }
}

/// Outcome of one successful engine supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    /// The request this result answers.
    pub id: Uuid,
    /// Everything the engine wrote to its output channel.
    pub raw_output: String,
    /// The canonical response text.
    pub extracted_text: String,
    pub token_usage: TokenUsage,
    /// Wall-clock time from spawn to resolution.
    #[serde(with = "duration_millis")]
    pub processing_duration: Duration,
    pub exit_code: i32,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
