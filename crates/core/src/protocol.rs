//! Engine wire protocol
//!
//! Supervised engines emit newline-delimited records of the shape
//! `{"id": ..., "msg": {"type": ..., ...}}` interleaved with free-form text
//! (banners, progress spinners, stack traces). This module decodes single
//! lines into [`StreamEvent`]s; everything that does not look like a record
//! is left to the plain-text fallbacks in [`crate::parser`].

use serde::Deserialize;

/// One decoded line of engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The engine's response text.
    AgentMessage(String),
    /// Cumulative token usage reported by the engine.
    TokenUsage { input: u64, output: u64, total: u64 },
    /// A record-shaped line this version of the protocol does not understand.
    Unknown(String),
}

/// Envelope for a single output record.
#[derive(Debug, Deserialize)]
struct EngineRecord {
    #[serde(default)]
    #[allow(dead_code)] // correlation id, present on every record but unused here
    id: serde_json::Value,
    msg: EngineMsg,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EngineMsg {
    AgentMessage {
        #[serde(alias = "text")]
        message: String,
    },
    TokenCount {
        #[serde(default)]
        info: Option<UsageInfo>,
        /// Older engine builds put the counts directly on the message.
        #[serde(default)]
        last_token_usage: Option<UsageCounts>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    last_token_usage: Option<UsageCounts>,
    #[serde(default)]
    total_token_usage: Option<UsageCounts>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct UsageCounts {
    #[serde(alias = "input")]
    input_tokens: u64,
    #[serde(alias = "output")]
    output_tokens: u64,
    #[serde(alias = "total", default)]
    total_tokens: Option<u64>,
}

impl UsageCounts {
    fn into_event(self) -> StreamEvent {
        StreamEvent::TokenUsage {
            input: self.input_tokens,
            output: self.output_tokens,
            total: self
                .total_tokens
                .unwrap_or(self.input_tokens + self.output_tokens),
        }
    }
}

/// Whether a line looks like the start of a protocol record.
fn is_record_candidate(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('{') && trimmed.contains("\"msg\"")
}

/// Decode a single output line.
///
/// Returns `None` for lines that do not look like protocol records (plain
/// text stays plain text). Candidate lines that fail to decode, or decode to
/// a message type this module does not know, come back as
/// [`StreamEvent::Unknown`] so a corrupt line never aborts a scan.
pub fn decode_line(line: &str) -> Option<StreamEvent> {
    if !is_record_candidate(line) {
        return None;
    }

    let record: EngineRecord = match serde_json::from_str(line.trim()) {
        Ok(record) => record,
        Err(_) => return Some(StreamEvent::Unknown(line.to_string())),
    };

    match record.msg {
        EngineMsg::AgentMessage { message } => Some(StreamEvent::AgentMessage(message)),
        EngineMsg::TokenCount {
            info,
            last_token_usage,
        } => {
            let counts = info
                .and_then(|i| i.last_token_usage.or(i.total_token_usage))
                .or(last_token_usage);
            match counts {
                Some(counts) => Some(counts.into_event()),
                None => Some(StreamEvent::Unknown(line.to_string())),
            }
        }
        EngineMsg::Unknown => Some(StreamEvent::Unknown(line.to_string())),
    }
}
